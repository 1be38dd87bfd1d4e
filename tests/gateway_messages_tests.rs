use base64::Engine;
use multitrack_recorder::transport::messages::{
    ChannelInfoMessage, JoinReply, MemberEvent, PlayMessage, VoicePacketMessage,
};
use multitrack_recorder::transport::{ChannelRef, Speaker};
use std::collections::HashMap;

#[test]
fn test_voice_packet_decode() {
    let json = format!(
        r#"{{"user_id": "100", "timestamp": 48000, "payload": "{}"}}"#,
        base64::engine::general_purpose::STANDARD.encode([0xf8, 0xff, 0xfe])
    );

    let msg: VoicePacketMessage = serde_json::from_str(&json).unwrap();
    let packet = msg.decode().unwrap();

    assert_eq!(packet.user_id.as_deref(), Some("100"));
    assert_eq!(packet.timestamp, 48000);
    assert_eq!(packet.payload, vec![0xf8, 0xff, 0xfe]);
}

#[test]
fn test_voice_packet_without_speaker() {
    let msg: VoicePacketMessage =
        serde_json::from_str(r#"{"timestamp": 0, "payload": ""}"#).unwrap();
    let packet = msg.decode().unwrap();
    assert!(packet.user_id.is_none());
    assert!(packet.payload.is_empty());

    let msg: VoicePacketMessage =
        serde_json::from_str(r#"{"user_id": "", "timestamp": 0, "payload": ""}"#).unwrap();
    assert!(msg.decode().unwrap().user_id.is_none());
}

#[test]
fn test_voice_packet_bad_payload() {
    let msg: VoicePacketMessage =
        serde_json::from_str(r#"{"user_id": "1", "timestamp": 0, "payload": "not base64!"}"#)
            .unwrap();
    assert!(msg.decode().is_err());
}

#[test]
fn test_channel_info_conversion() {
    let json = r#"{
        "id": "4242",
        "name": "General",
        "guild_id": "42",
        "guild_name": "Guild",
        "kind": "voice"
    }"#;

    let msg: ChannelInfoMessage = serde_json::from_str(json).unwrap();
    assert!(msg.is_voice());

    let channel: ChannelRef = msg.into();
    assert_eq!(channel.id, "4242");
    assert_eq!(channel.guild_name, "Guild");
}

#[test]
fn test_text_channel_is_not_voice() {
    let msg = ChannelInfoMessage {
        id: "1".to_string(),
        name: "chat".to_string(),
        guild_id: "42".to_string(),
        guild_name: "Guild".to_string(),
        kind: "text".to_string(),
    };
    assert!(!msg.is_voice());
}

#[test]
fn test_join_reply_defaults() {
    let reply: JoinReply = serde_json::from_str(r#"{"self_id": "999"}"#).unwrap();
    assert_eq!(reply.self_id, "999");
    assert!(reply.members.is_empty());
    assert!(reply.error.is_none());

    let reply: JoinReply = serde_json::from_str(
        r#"{"self_id": "999", "members": [{"id": "1", "name": "alice", "discrim": "0001"}]}"#,
    )
    .unwrap();
    assert_eq!(reply.members[0].discriminator, "0001");
}

#[test]
fn test_member_events() {
    let joined: MemberEvent =
        serde_json::from_str(r#"{"joined": {"id": "1", "name": "alice", "discrim": "0001"}}"#)
            .unwrap();
    assert_eq!(joined.joined.unwrap().name, "alice");
    assert!(joined.left.is_none());

    let left: MemberEvent = serde_json::from_str(r#"{"left": "1"}"#).unwrap();
    assert!(left.joined.is_none());
    assert_eq!(left.left.as_deref(), Some("1"));
}

#[test]
fn test_member_events_update_join_snapshot() {
    let reply: JoinReply = serde_json::from_str(
        r#"{"self_id": "999", "members": [{"id": "1", "name": "alice", "discrim": "0001"}]}"#,
    )
    .unwrap();
    let mut members: HashMap<String, Speaker> = reply
        .members
        .into_iter()
        .map(|m| (m.id.clone(), m))
        .collect();

    // Someone who joined while the join request was in flight
    let joined: MemberEvent =
        serde_json::from_str(r#"{"joined": {"id": "2", "name": "bob", "discrim": "0002"}}"#)
            .unwrap();
    joined.apply(&mut members);
    assert_eq!(members["2"].name, "bob");
    assert_eq!(members.len(), 2);

    // Already listed in the snapshot: replaced, not duplicated
    let rejoined: MemberEvent =
        serde_json::from_str(r#"{"joined": {"id": "1", "name": "alice2", "discrim": "0001"}}"#)
            .unwrap();
    rejoined.apply(&mut members);
    assert_eq!(members["1"].name, "alice2");
    assert_eq!(members.len(), 2);

    let left: MemberEvent = serde_json::from_str(r#"{"left": "1"}"#).unwrap();
    left.apply(&mut members);
    assert!(!members.contains_key("1"));

    // Leaving twice is harmless
    let left: MemberEvent = serde_json::from_str(r#"{"left": "1"}"#).unwrap();
    left.apply(&mut members);
    assert_eq!(members.len(), 1);
}

#[test]
fn test_play_message_serialization() {
    let msg = PlayMessage {
        payload: base64::engine::general_purpose::STANDARD.encode([0xf8, 0xff, 0xfe]),
    };

    let json = serde_json::to_string(&msg).unwrap();
    assert_eq!(json, r#"{"payload":"+P/+"}"#);
}
