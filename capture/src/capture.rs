use axum::extract::State;
use axum::Json;
use bytes::Bytes;
use metrics::counter;
use serde_json::Value;
use tracing::instrument;

use relay_common::event::{normalize_area, AccessEvent};

use crate::api::{CaptureError, CaptureResponse, CaptureResponseCode};
use crate::router;

#[instrument(skip_all, fields(profile, area))]
pub async fn event(
    state: State<router::State>,
    body: Bytes,
) -> Result<Json<CaptureResponse>, CaptureError> {
    let parsed: Value = serde_json::from_slice(&body)?;
    let Value::Object(mut attributes) = parsed else {
        return Err(CaptureError::NotAnObject);
    };

    let profile = attributes
        .get("profile")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(CaptureError::MissingProfile)?;
    let area = normalize_area(attributes.get("area").and_then(Value::as_str));

    tracing::Span::current().record("profile", profile.as_str());
    tracing::Span::current().record("area", area.as_deref().unwrap_or(""));

    // Stamp server-side, the reader's clock is not trusted
    let stamp = state.timesource.stamp();
    attributes.insert(
        "attendance_date".to_string(),
        Value::String(stamp.date.clone()),
    );
    attributes.insert(
        "attendance_time".to_string(),
        Value::String(stamp.time.clone()),
    );

    counter!("capture_events_received_total").increment(1);

    let event = AccessEvent {
        profile,
        area,
        day: stamp.day,
        payload: Value::Object(attributes),
    };

    state.sink.send(event).await?;

    Ok(Json(CaptureResponse {
        status: CaptureResponseCode::Success,
        message: "access recorded".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use chrono::NaiveDate;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    use health::HealthRegistry;
    use relay_common::event::AccessEvent;
    use relay_common::time::FixedClock;

    use crate::api::CaptureError;
    use crate::router;
    use crate::sink::EventSink;

    #[derive(Clone, Default)]
    struct MemorySink {
        events: Arc<Mutex<Vec<AccessEvent>>>,
    }

    #[async_trait]
    impl EventSink for MemorySink {
        async fn send(&self, event: AccessEvent) -> Result<(), CaptureError> {
            self.events.lock().await.push(event);
            Ok(())
        }
    }

    fn app(sink: MemorySink) -> Router {
        let clock = FixedClock(
            NaiveDate::from_ymd_opt(2024, 5, 6)
                .unwrap()
                .and_hms_opt(13, 45, 0)
                .unwrap(),
        );
        router::router(clock, HealthRegistry::new("liveness"), sink, false)
    }

    async fn post(app: Router, path: &str, body: String) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn capture_stamps_and_forwards_the_event() {
        let sink = MemorySink::default();
        let payload = json!({
            "profile": "usuario",
            "area": "MT - Mundo do Trabalho",
            "customer": "C1",
            "student": "S1",
            "turma": "T1",
        });

        let (status, body) = post(app(sink.clone()), "/access", payload.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "success", "message": "access recorded"}));

        let events = sink.events.lock().await;
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.profile, "usuario");
        assert_eq!(event.area.as_deref(), Some("MT - Mundo do Trabalho"));
        assert_eq!(event.day, NaiveDate::from_ymd_opt(2024, 5, 6).unwrap());
        assert_eq!(event.payload["attendance_date"], json!("2024-05-06"));
        assert_eq!(event.payload["attendance_time"], json!("13:45:00"));
        assert_eq!(event.payload["student"], json!("S1"));
    }

    #[tokio::test]
    async fn capture_overwrites_caller_supplied_stamps() {
        let sink = MemorySink::default();
        let payload = json!({
            "profile": "voluntario",
            "employee": "EMP-1",
            "attendance_date": "1999-01-01",
            "attendance_time": "00:00:00",
        });

        let (status, _) = post(app(sink.clone()), "/access", payload.to_string()).await;
        assert_eq!(status, StatusCode::OK);

        let events = sink.events.lock().await;
        assert_eq!(events[0].payload["attendance_date"], json!("2024-05-06"));
        assert_eq!(events[0].payload["attendance_time"], json!("13:45:00"));
    }

    #[tokio::test]
    async fn capture_accepts_the_trailing_slash_route() {
        let sink = MemorySink::default();
        let payload = json!({"profile": "voluntario", "employee": "EMP-1"});

        let (status, _) = post(app(sink.clone()), "/access/", payload.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sink.events.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn capture_treats_a_blank_area_as_absent() {
        let sink = MemorySink::default();
        let payload = json!({"profile": "voluntario", "employee": "EMP-1", "area": "  "});

        let (status, _) = post(app(sink.clone()), "/access", payload.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sink.events.lock().await[0].area, None);
    }

    #[tokio::test]
    async fn capture_rejects_an_event_without_a_profile() {
        let sink = MemorySink::default();
        let payload = json!({"employee": "EMP-1"});

        let (status, body) = post(app(sink.clone()), "/access", payload.to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], json!("error"));
        assert_eq!(body["message"], json!("event submitted without a profile"));
        assert!(sink.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn capture_rejects_a_non_object_body() {
        let sink = MemorySink::default();

        let (status, body) = post(app(sink.clone()), "/access", "[1, 2]".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], json!("error"));
    }

    #[tokio::test]
    async fn capture_rejects_a_body_that_is_not_json() {
        let sink = MemorySink::default();
        let response = app(sink)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/access")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        let sink = MemorySink::default();
        let response = app(sink)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/somewhere/else")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
