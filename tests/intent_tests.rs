// Integration tests for intent matching

use voice_assistant::intent::{Intent, IntentMatcher, Rule, RuleMatcher};

fn matched(text: &str) -> Option<String> {
    let matcher = RuleMatcher::builtin().unwrap();
    matcher.match_text(text).map(|intent| intent.name)
}

#[test]
fn test_play_spotify_phrases() {
    assert_eq!(matched("pon spotify").as_deref(), Some("play_spotify"));
    assert_eq!(matched("Abre Spotify por favor").as_deref(), Some("play_spotify"));
    assert_eq!(matched("reproduce algo en spotify").as_deref(), Some("play_spotify"));
}

#[test]
fn test_tell_joke_phrases() {
    assert_eq!(matched("cuéntame un chiste").as_deref(), Some("tell_joke"));
    assert_eq!(matched("cuentame un chiste").as_deref(), Some("tell_joke"));
    assert_eq!(matched("dime un chiste malo").as_deref(), Some("tell_joke"));
}

#[test]
fn test_next_track_phrases() {
    assert_eq!(matched("siguiente canción").as_deref(), Some("next_track"));
    assert_eq!(matched("pasa de canción").as_deref(), Some("next_track"));
    assert_eq!(matched("salta la canción").as_deref(), Some("next_track"));
    assert_eq!(matched("next").as_deref(), Some("next_track"));
}

#[test]
fn test_play_song_extracts_query() {
    let matcher = RuleMatcher::builtin().unwrap();

    let intent = matcher.match_text("pon la canción bohemian rhapsody").unwrap();
    assert_eq!(intent.name, "play_song_by_name");
    assert_eq!(intent.parameters.get("query").map(String::as_str), Some("bohemian rhapsody"));

    let intent = matcher.match_text("Reproduce canción La Bamba").unwrap();
    assert_eq!(intent.parameters.get("query").map(String::as_str), Some("La Bamba"));
}

#[test]
fn test_song_rule_wins_over_spotify_rule() {
    // Both rules match; the more specific one comes first
    assert_eq!(
        matched("pon la canción despacito en spotify").as_deref(),
        Some("play_song_by_name")
    );
}

#[test]
fn test_unmatched_text() {
    assert_eq!(matched("qué hora es"), None);
    assert_eq!(matched("spotify"), None);
    assert_eq!(matched(""), None);
    assert_eq!(matched("   "), None);
}

#[test]
fn test_matching_is_deterministic() {
    let matcher = RuleMatcher::builtin().unwrap();
    let first = matcher.match_text("pon la canción yellow submarine");
    for _ in 0..10 {
        assert_eq!(matcher.match_text("pon la canción yellow submarine"), first);
    }
}

#[test]
fn test_custom_rules_first_match_wins() {
    let mut matcher = RuleMatcher::new(vec![Rule::new("lights_on", r"\benciende\b.*\bluz\b").unwrap()]);
    matcher.push(Rule::new("anything", r".+").unwrap());

    assert_eq!(matcher.rules().len(), 2);
    assert_eq!(matcher.rules()[0].intent(), "lights_on");
    assert_eq!(matcher.match_text("enciende la luz"), Some(Intent::new("lights_on")));
    assert_eq!(matcher.match_text("apaga la luz"), Some(Intent::new("anything")));
}

#[test]
fn test_invalid_pattern_is_rejected() {
    assert!(Rule::new("broken", r"(unclosed").is_err());
}

#[test]
fn test_empty_capture_is_omitted() {
    let matcher = RuleMatcher::new(vec![Rule::new("say", r"^di(?P<text>.*)$").unwrap()]);

    let intent = matcher.match_text("di").unwrap();
    assert!(intent.parameters.is_empty());

    let intent = matcher.match_text("di   hola ").unwrap();
    assert_eq!(intent.parameters.get("text").map(String::as_str), Some("hola"));
}
