use chrono::{Days, NaiveDateTime, NaiveTime};

/// The next wall-clock instant strictly after `now` at one of the fixed
/// daily run times.
pub fn next_run(now: NaiveDateTime, times: &[NaiveTime]) -> NaiveDateTime {
    times
        .iter()
        .map(|time| {
            let candidate = now.date().and_time(*time);
            if candidate <= now {
                candidate + Days::new(1)
            } else {
                candidate
            }
        })
        .min()
        .unwrap_or_else(|| now + Days::new(1))
}
