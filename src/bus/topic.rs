//! Topic helpers
//!
//! Topics use MQTT conventions throughout the crate: `/` separated levels,
//! `+` matches exactly one level and a trailing `#` matches the rest.
//! Transports with different naming rules translate at their edge.
//!
//! NATS uses `.` as its level separator, so a topic level containing `.` or
//! whitespace has no faithful subject and is refused by the NATS transport.
//! A trailing `#` also matches its parent level, which NATS `>` does not;
//! [`subject_patterns`] adds the parent subject to keep both brokers in step.

/// Build the fully-qualified topic `<base>/<suffix>`
pub fn join_topic(base: &str, suffix: &str) -> String {
    let base = base.trim_end_matches('/');
    let suffix = suffix.trim_start_matches('/');

    match (base.is_empty(), suffix.is_empty()) {
        (true, _) => suffix.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, suffix),
    }
}

/// Check whether `topic` is matched by the subscription `pattern`
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            // "a/#" also matches the parent level "a"
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Translate a topic (or pattern) into a NATS subject
pub fn to_subject(topic: &str) -> String {
    topic
        .split('/')
        .map(|level| match level {
            "+" => "*",
            "#" => ">",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Check that every level of `topic` survives the round trip through a subject
pub fn check_subject_safe(topic: &str) -> Result<(), String> {
    match topic
        .split('/')
        .find(|level| level.is_empty() || level.contains(|c: char| c == '.' || c.is_whitespace()))
    {
        Some(level) => Err(format!("topic {:?} has level {:?} with no NATS subject equivalent", topic, level)),
        None => Ok(()),
    }
}

/// Subjects to subscribe to so NATS delivers exactly what [`topic_matches`] accepts
pub fn subject_patterns(pattern: &str) -> Vec<String> {
    match pattern.strip_suffix("/#") {
        Some(parent) if !parent.is_empty() => vec![to_subject(parent), to_subject(pattern)],
        _ => vec![to_subject(pattern)],
    }
}

/// Translate an inbound NATS subject back into a topic
pub fn from_subject(subject: &str) -> String {
    subject.replace('.', "/")
}
