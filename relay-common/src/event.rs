use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A raw access event as captured at the edge: stamped server-side, not yet
/// classified. The payload keeps every attribute the reader sent, plus the
/// server-assigned `attendance_date`/`attendance_time`.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessEvent {
    pub profile: String,
    pub area: Option<String>,
    /// Calendar day of the server-side stamp, keys the spillover file.
    pub day: NaiveDate,
    pub payload: Value,
}

/// A blank `area` is treated as absent everywhere a routing decision is made.
pub fn normalize_area(area: Option<&str>) -> Option<String> {
    match area {
        Some(area) if !area.trim().is_empty() => Some(area.to_owned()),
        _ => None,
    }
}

/// The downstream endpoint a classified record is forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Staff,
    Participant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaffAttendance {
    pub profile: String,
    #[serde(rename = "employee")]
    pub staff_id: String,
    pub attendance_date: String,
    pub attendance_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantAttendance {
    pub profile: String,
    pub area: String,
    #[serde(rename = "customer")]
    pub organization_customer: String,
    #[serde(rename = "student")]
    pub participant_id: String,
    #[serde(rename = "turma")]
    pub group_id: String,
    pub attendance_date: String,
    pub attendance_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AidRecipientAttendance {
    pub profile: String,
    pub area: String,
    #[serde(rename = "customer")]
    pub organization_customer: String,
    pub attendance_date: String,
    pub attendance_time: String,
}

/// A typed attendance record, serialized flat (no variant tag) the way the
/// attendance API expects it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AttendanceRecord {
    Staff(StaffAttendance),
    Participant(ParticipantAttendance),
    AidRecipient(AidRecipientAttendance),
}

impl AttendanceRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            AttendanceRecord::Staff(_) => "staff",
            AttendanceRecord::Participant(_) => "participant",
            AttendanceRecord::AidRecipient(_) => "aid_recipient",
        }
    }
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("no mapping rule for profile={profile:?}, area={area:?}")]
    Unmapped {
        profile: String,
        area: Option<String>,
    },
    #[error("payload does not satisfy the {kind} schema: {source}")]
    Schema {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub record: AttendanceRecord,
    pub destination: Destination,
}

enum RecordKind {
    Staff,
    Participant,
    AidRecipient,
}

/// Map an event's `(profile, area)` pair to its typed record and destination.
///
/// The mapping table is a fixed enumeration: anything outside it fails with
/// `Unmapped` so the caller can dead-letter the event instead of dropping it.
/// A payload that does not carry the matched variant's required fields fails
/// with `Schema` for the same reason.
pub fn classify(
    profile: &str,
    area: Option<&str>,
    payload: &Value,
) -> Result<ClassifiedEvent, ClassifyError> {
    let area = normalize_area(area);

    let kind = match (profile, area.as_deref()) {
        ("voluntario", None) => RecordKind::Staff,
        ("usuario", Some("MT - Mundo do Trabalho"))
        | ("usuario", Some("SF - Sócio Familiar"))
        | ("usuario", Some("gestantes")) => RecordKind::Participant,
        ("usuario_menor", Some("SF - Sócio Familiar")) => RecordKind::Participant,
        ("usuario", Some("cesta_basica")) => RecordKind::AidRecipient,
        _ => {
            return Err(ClassifyError::Unmapped {
                profile: profile.to_owned(),
                area,
            })
        }
    };

    let record = match kind {
        RecordKind::Staff => AttendanceRecord::Staff(from_payload("staff", payload)?),
        RecordKind::Participant => {
            AttendanceRecord::Participant(from_payload("participant", payload)?)
        }
        RecordKind::AidRecipient => {
            AttendanceRecord::AidRecipient(from_payload("aid_recipient", payload)?)
        }
    };

    // Staff records go to the staff endpoint, every other mapped profile to
    // the customer/participant endpoint.
    let destination = match record {
        AttendanceRecord::Staff(_) => Destination::Staff,
        _ => Destination::Participant,
    };

    Ok(ClassifiedEvent {
        record,
        destination,
    })
}

fn from_payload<T: DeserializeOwned>(
    kind: &'static str,
    payload: &Value,
) -> Result<T, ClassifyError> {
    serde_json::from_value(payload.clone()).map_err(|source| ClassifyError::Schema { kind, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn staff_payload() -> Value {
        json!({
            "profile": "voluntario",
            "employee": "EMP-1",
            "attendance_date": "2024-05-06",
            "attendance_time": "13:45:00",
        })
    }

    fn participant_payload(profile: &str, area: &str) -> Value {
        json!({
            "profile": profile,
            "area": area,
            "customer": "C1",
            "student": "S1",
            "turma": "T1",
            "attendance_date": "2024-05-06",
            "attendance_time": "13:45:00",
        })
    }

    fn aid_recipient_payload() -> Value {
        json!({
            "profile": "usuario",
            "area": "cesta_basica",
            "customer": "C1",
            "attendance_date": "2024-05-06",
            "attendance_time": "13:45:00",
        })
    }

    #[test]
    fn classifies_every_mapped_pair() {
        let classified = classify("voluntario", None, &staff_payload()).unwrap();
        assert_eq!(classified.record.kind(), "staff");
        assert_eq!(classified.destination, Destination::Staff);

        for area in ["MT - Mundo do Trabalho", "SF - Sócio Familiar", "gestantes"] {
            let payload = participant_payload("usuario", area);
            let classified = classify("usuario", Some(area), &payload).unwrap();
            assert_eq!(classified.record.kind(), "participant");
            assert_eq!(classified.destination, Destination::Participant);
        }

        let payload = participant_payload("usuario_menor", "SF - Sócio Familiar");
        let classified = classify("usuario_menor", Some("SF - Sócio Familiar"), &payload).unwrap();
        assert_eq!(classified.record.kind(), "participant");

        let classified = classify("usuario", Some("cesta_basica"), &aid_recipient_payload()).unwrap();
        assert_eq!(classified.record.kind(), "aid_recipient");
        assert_eq!(classified.destination, Destination::Participant);
    }

    #[test]
    fn unknown_pairs_are_a_classification_failure() {
        for (profile, area) in [
            ("voluntario", Some("gestantes")),
            ("usuario", None),
            ("usuario", Some("unknown area")),
            ("usuario_menor", Some("gestantes")),
            ("visitor", None),
        ] {
            match classify(profile, area, &staff_payload()) {
                Err(ClassifyError::Unmapped { profile: p, area: a }) => {
                    assert_eq!(p, profile);
                    assert_eq!(a.as_deref(), area);
                }
                other => panic!("expected Unmapped for ({profile}, {area:?}), got {other:?}"),
            }
        }
    }

    #[test]
    fn blank_area_is_normalized_before_lookup() {
        let classified = classify("voluntario", Some("  "), &staff_payload()).unwrap();
        assert_eq!(classified.record.kind(), "staff");

        let classified = classify("voluntario", Some(""), &staff_payload()).unwrap();
        assert_eq!(classified.record.kind(), "staff");
    }

    #[test]
    fn missing_required_field_is_a_schema_failure() {
        let mut payload = participant_payload("usuario", "gestantes");
        payload.as_object_mut().unwrap().remove("student");

        match classify("usuario", Some("gestantes"), &payload) {
            Err(ClassifyError::Schema { kind, .. }) => assert_eq!(kind, "participant"),
            other => panic!("expected Schema error, got {other:?}"),
        }
    }

    #[test]
    fn mistyped_field_is_a_schema_failure() {
        let mut payload = staff_payload();
        payload["employee"] = json!(42);

        assert!(matches!(
            classify("voluntario", None, &payload),
            Err(ClassifyError::Schema { kind: "staff", .. })
        ));
    }

    #[test]
    fn extra_attributes_are_ignored() {
        let mut payload = staff_payload();
        payload["badge_reader"] = json!("entrance-2");

        let classified = classify("voluntario", None, &payload).unwrap();
        let AttendanceRecord::Staff(staff) = classified.record else {
            panic!("expected a staff record");
        };
        assert_eq!(staff.staff_id, "EMP-1");
    }

    #[test]
    fn records_serialize_flat() {
        let record = AttendanceRecord::Participant(ParticipantAttendance {
            profile: "usuario".to_string(),
            area: "gestantes".to_string(),
            organization_customer: "C1".to_string(),
            participant_id: "S1".to_string(),
            group_id: "T1".to_string(),
            attendance_date: "2024-05-06".to_string(),
            attendance_time: "13:45:00".to_string(),
        });

        let encoded = serde_json::to_value(&record).unwrap();
        assert_eq!(
            encoded,
            json!({
                "profile": "usuario",
                "area": "gestantes",
                "customer": "C1",
                "student": "S1",
                "turma": "T1",
                "attendance_date": "2024-05-06",
                "attendance_time": "13:45:00",
            })
        );
    }
}
