//! Post-processing of environment descriptions produced by the analysis
//! model. The environment must describe only the physical setting; as a
//! safety net against model drift, sentences that appear to talk about
//! characters or actions are dropped before the description is stored.

use std::collections::HashSet;

/// Pluggable text post-processor applied to environment descriptions.
pub trait TextFilter: Send + Sync {
    fn filter(&self, text: &str) -> String;
}

/// Pass-through filter.
pub struct NoopFilter;

impl TextFilter for NoopFilter {
    fn filter(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Heuristic filter: drops sentences containing a mid-sentence capitalized
/// word (likely a proper noun) or a known action verb.
pub struct EnvironmentTextFilter {
    action_verbs: HashSet<&'static str>,
}

impl Default for EnvironmentTextFilter {
    fn default() -> Self {
        let action_verbs = [
            "attacks", "attacked", "swings", "swung", "casts", "runs", "ran", "walks",
            "walked", "fights", "fought", "says", "said", "shouts", "shouted", "draws",
            "drew", "charges", "charged", "leaps", "leapt", "strikes", "struck", "grabs",
            "grabbed", "enters", "entered", "leaves", "left", "speaks", "spoke",
        ]
        .into_iter()
        .collect();

        Self { action_verbs }
    }
}

impl TextFilter for EnvironmentTextFilter {
    fn filter(&self, text: &str) -> String {
        let kept: Vec<&str> = split_sentences(text)
            .into_iter()
            .filter(|s| !self.mentions_character_elements(s))
            .collect();

        let mut out = kept.join(". ");
        if !out.is_empty() && !out.ends_with(['.', '!', '?']) {
            out.push('.');
        }
        out
    }
}

impl EnvironmentTextFilter {
    fn mentions_character_elements(&self, sentence: &str) -> bool {
        for (i, raw) in sentence.split_whitespace().enumerate() {
            let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
            if word.is_empty() {
                continue;
            }

            if self.action_verbs.contains(word.to_lowercase().as_str()) {
                return true;
            }

            // Mid-sentence capitalization suggests a proper noun. The
            // sentence-initial word and the pronoun "I" are exempt.
            if i > 0 && word != "I" && word.chars().next().is_some_and(|c| c.is_uppercase()) {
                return true;
            }
        }
        false
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
