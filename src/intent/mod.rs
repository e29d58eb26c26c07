mod matcher;

pub use matcher::{Intent, IntentMatcher, Parameters, Rule, RuleMatcher};
