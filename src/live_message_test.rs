use super::*;

#[test]
fn stats_update_carries_object_patch() {
    let msg = parse_message(r#"{"type":"stats_update","data":{"total_posts":5},"timestamp":"t"}"#).unwrap();
    let LiveMessage::StatsUpdate(patch) = msg else {
        panic!("expected stats_update");
    };
    assert_eq!(patch["total_posts"], 5);
}

#[test]
fn stats_update_with_non_object_data_is_rejected() {
    assert!(matches!(
        parse_message(r#"{"type":"stats_update","data":[1]}"#),
        Err(MessageError::InvalidStatsPayload)
    ));
    assert!(matches!(
        parse_message(r#"{"type":"stats_update"}"#),
        Err(MessageError::InvalidStatsPayload)
    ));
}

#[test]
fn missing_type_and_bad_json_are_errors() {
    assert!(matches!(parse_message(r#"{"data":{}}"#), Err(MessageError::MissingType)));
    assert!(matches!(parse_message("not json"), Err(MessageError::Json(_))));
}

#[test]
fn unknown_type_is_kept_for_logging() {
    let msg = parse_message(r#"{"type":"connection_established"}"#).unwrap();
    assert_eq!(msg.kind(), "connection_established");
}

#[test]
fn outbound_messages_are_tagged() {
    let value: Value = serde_json::from_str(&request_update_message()).unwrap();
    assert_eq!(value["type"], "request_update");
    let value: Value = serde_json::from_str(&pong_message(7)).unwrap();
    assert_eq!(value["type"], "pong");
    assert_eq!(value["timestamp"], 7);
}
