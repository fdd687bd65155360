//! Wire codec round trips: envelope identity, Date-wrapper handling,
//! id scheme, and unknown-discriminant rejection.

use chrono::Utc;
use engram_coord::{
    Envelope, IdKind, LockMode, LockRequestPayload, LockResource, MessageType, decode_envelope,
    wire_id,
};

#[test]
fn encode_decode_preserves_identity() {
    let envelope = Envelope::new(
        "agent-a",
        MessageType::LockRequest,
        &LockRequestPayload {
            resource: LockResource::Memory("M1".to_string()),
            mode: LockMode::Exclusive,
            timeout_ms: Some(30_000),
        },
    )
    .correlated("msg_1700000000000_abcdefghi");

    let decoded = decode_envelope(&envelope.encode()).unwrap();
    assert_eq!(decoded, envelope);
}

#[test]
fn timestamps_encode_as_date_wrapper() {
    let envelope = Envelope::new("a", MessageType::AgentHeartbeat, &serde_json::json!({}));
    let json: serde_json::Value = serde_json::from_str(&envelope.encode()).unwrap();
    assert_eq!(json["timestamp"]["__type"], "Date");
    assert!(json["timestamp"]["value"].as_str().unwrap().contains('T'));
}

#[test]
fn plain_iso8601_timestamps_decode() {
    let json = format!(
        r#"{{"id":"{}","timestamp":"2026-08-01T09:30:00Z","sender":"a","type":"subscribe","payload":{{}}}}"#,
        wire_id(IdKind::Msg)
    );
    let decoded = decode_envelope(&json).unwrap();
    assert_eq!(decoded.msg_type, MessageType::Subscribe);
    assert_eq!(decoded.timestamp.to_rfc3339(), "2026-08-01T09:30:00+00:00");
}

#[test]
fn unknown_discriminant_is_rejected() {
    let json = r#"{"id":"msg_1_abcdefghi","timestamp":"2026-08-01T09:30:00Z","sender":"a","type":"memory.imagined","payload":{}}"#;
    assert!(decode_envelope(json).is_err());
    assert!(decode_envelope("{").is_err());
}

#[test]
fn wire_id_kinds_and_shape() {
    for (kind, prefix) in [
        (IdKind::Msg, "msg"),
        (IdKind::Lock, "lock"),
        (IdKind::Conflict, "conflict"),
        (IdKind::Resume, "resume"),
    ] {
        let id = wire_id(kind);
        let parts: Vec<&str> = id.splitn(3, '_').collect();
        assert_eq!(parts[0], prefix);
        let millis: i64 = parts[1].parse().unwrap();
        assert!((millis - Utc::now().timestamp_millis()).abs() < 60_000);
        assert_eq!(parts[2].len(), 9);
    }
}

#[test]
fn message_order_survives_serialization() {
    let envelopes: Vec<Envelope> = (0..5)
        .map(|i| {
            Envelope::new(
                "a",
                MessageType::MemoryAdded,
                &serde_json::json!({ "memoryId": format!("m{i}") }),
            )
        })
        .collect();

    let frames: Vec<String> = envelopes.iter().map(|e| e.encode()).collect();
    let decoded: Vec<Envelope> = frames.iter().map(|f| decode_envelope(f).unwrap()).collect();
    assert_eq!(decoded, envelopes);
}
