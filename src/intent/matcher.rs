use regex::Regex;
use std::collections::BTreeMap;

/// Named parameters extracted from an utterance
pub type Parameters = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub name: String,
    pub parameters: Parameters,
}

impl Intent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Parameters::new(),
        }
    }
}

/// Maps utterance text to an intent
///
/// Implementations must be deterministic and free of side effects.
pub trait IntentMatcher: Send + Sync {
    fn match_text(&self, text: &str) -> Option<Intent>;
}

/// A case-insensitive pattern for one intent
///
/// Named capture groups become parameters (trimmed, empty ones omitted).
#[derive(Debug, Clone)]
pub struct Rule {
    intent: String,
    pattern: Regex,
}

impl Rule {
    pub fn new(intent: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            intent: intent.into(),
            pattern: Regex::new(&format!("(?i){}", pattern))?,
        })
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    fn apply(&self, text: &str) -> Option<Intent> {
        let captures = self.pattern.captures(text)?;

        let parameters = self
            .pattern
            .capture_names()
            .flatten()
            .filter_map(|name| {
                let value = captures.name(name)?.as_str().trim();
                (!value.is_empty()).then(|| (name.to_string(), value.to_string()))
            })
            .collect();

        Some(Intent {
            name: self.intent.clone(),
            parameters,
        })
    }
}

/// Ordered rule list; the first matching rule wins
#[derive(Debug, Clone, Default)]
pub struct RuleMatcher {
    rules: Vec<Rule>,
}

impl RuleMatcher {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Spanish command set, most specific rules first
    pub fn builtin() -> Result<Self, regex::Error> {
        Ok(Self::new(vec![
            Rule::new(
                "next_track",
                r"\b(?:siguiente|pasa(?:\s+de)?|salta(?:\s+de)?)\s+(?:la\s+)?(?:canci[oó]n|tema)\b|\bnext\b",
            )?,
            Rule::new(
                "play_song_by_name",
                r"\b(?:pon|reproduce|toca)\s+(?:la\s+)?canci[oó]n\s+(?P<query>.+)$",
            )?,
            Rule::new("play_spotify", r"\b(?:pon|reproduce|abre)\b.*\bspotify\b")?,
            Rule::new("tell_joke", r"\b(?:cu[eé]nta(?:me)?|dime)\b.*\bchiste\b")?,
        ]))
    }

    /// Append a rule with the lowest priority
    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl IntentMatcher for RuleMatcher {
    fn match_text(&self, text: &str) -> Option<Intent> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        self.rules.iter().find_map(|rule| rule.apply(text))
    }
}
