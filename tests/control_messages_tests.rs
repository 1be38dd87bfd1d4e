use multitrack_recorder::control::messages::{
    parse_start, InfoMessage, StartedMessage, StoppedMessage,
};
use multitrack_recorder::control::ControlCommand;

fn start(id: &str) -> Option<ControlCommand> {
    Some(ControlCommand::Start {
        voice_channel_id: id.to_string(),
    })
}

#[test]
fn test_start_with_string_id() {
    assert_eq!(parse_start(br#"{"voiceChannelId": "123456789"}"#), start("123456789"));
}

#[test]
fn test_start_with_numeric_id() {
    assert_eq!(parse_start(br#"{"voiceChannelId": 42}"#), start("42"));
}

#[test]
fn test_start_ignores_extra_fields() {
    let payload = br#"{"voiceChannelId": "7", "requestedBy": "someone"}"#;
    assert_eq!(parse_start(payload), start("7"));
}

#[test]
fn test_invalid_start_payloads() {
    let invalid: [&[u8]; 7] = [
        b"",
        b"not json",
        b"{}",
        br#"{"voiceChannelId": null}"#,
        br#"{"voiceChannelId": ""}"#,
        br#"{"voiceChannelId": "general"}"#,
        br#"{"voiceChannelId": -3}"#,
    ];

    for payload in invalid {
        assert_eq!(
            parse_start(payload),
            None,
            "accepted {}",
            String::from_utf8_lossy(payload)
        );
    }
}

#[test]
fn test_started_serialization() {
    let msg = StartedMessage {
        record_id: "123".to_string(),
        voice_channel_id: "456".to_string(),
    };

    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains("\"recordId\":\"123\""));
    assert!(json.contains("\"voiceChannelId\":\"456\""));
}

#[test]
fn test_stopped_serialization() {
    let msg = StoppedMessage {
        ids: vec!["1".to_string(), "2".to_string()],
    };

    let json = serde_json::to_string(&msg).unwrap();
    assert_eq!(json, r#"{"ids":["1","2"]}"#);

    let deserialized: StoppedMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized.ids, vec!["1", "2"]);
}

#[test]
fn test_info_serialization() {
    let msg = InfoMessage {
        data: "No recording".to_string(),
    };

    assert_eq!(serde_json::to_string(&msg).unwrap(), r#"{"data":"No recording"}"#);
}
