// Integration tests for topic naming and wildcard matching

use voice_assistant::bus::topic::{
    check_subject_safe, from_subject, join_topic, subject_patterns, to_subject, topic_matches,
};

#[test]
fn test_join_topic() {
    assert_eq!(join_topic("assistant", "tts/say"), "assistant/tts/say");
    assert_eq!(join_topic("assistant/", "/tts/say"), "assistant/tts/say");
    assert_eq!(join_topic("", "tts/say"), "tts/say");
    assert_eq!(join_topic("assistant", ""), "assistant");
}

#[test]
fn test_exact_match() {
    assert!(topic_matches("assistant/tts/say", "assistant/tts/say"));
    assert!(!topic_matches("assistant/tts/say", "assistant/tts"));
    assert!(!topic_matches("assistant/tts", "assistant/tts/say"));
}

#[test]
fn test_single_level_wildcard() {
    assert!(topic_matches("assistant/+/play", "assistant/spotify/play"));
    assert!(!topic_matches("assistant/+/play", "assistant/spotify/next"));
    assert!(!topic_matches("assistant/+", "assistant/spotify/play"));
}

#[test]
fn test_multi_level_wildcard() {
    assert!(topic_matches("assistant/#", "assistant/spotify/play_song"));
    assert!(topic_matches("assistant/#", "assistant"));
    assert!(topic_matches("#", "anything/at/all"));
    assert!(!topic_matches("assistant/#", "other/spotify"));
}

#[test]
fn test_nats_subject_mapping() {
    assert_eq!(to_subject("assistant/spotify/play"), "assistant.spotify.play");
    assert_eq!(to_subject("assistant/+/play"), "assistant.*.play");
    assert_eq!(to_subject("assistant/#"), "assistant.>");
    assert_eq!(from_subject("assistant.tts.say"), "assistant/tts/say");
}

#[test]
fn test_parent_level_subscribed_on_nats() {
    // "assistant/#" matches "assistant" itself, which NATS ">" would not
    assert!(topic_matches("assistant/#", "assistant"));
    assert_eq!(subject_patterns("assistant/#"), vec!["assistant", "assistant.>"]);
    assert_eq!(subject_patterns("#"), vec![">"]);
    assert_eq!(subject_patterns("assistant/+/play"), vec!["assistant.*.play"]);
}

#[test]
fn test_topics_without_subject_equivalent_are_refused() {
    assert!(check_subject_safe("assistant/spotify/play_song").is_ok());
    assert!(check_subject_safe("assistant/+/#").is_ok());

    // A dotted level would come back as two levels
    assert_eq!(from_subject(&to_subject("assistant/v1.2/say")), "assistant/v1/2/say");
    assert!(check_subject_safe("assistant/v1.2/say").is_err());
    assert!(check_subject_safe("assistant/tts say").is_err());
    assert!(check_subject_safe("assistant//say").is_err());
}
