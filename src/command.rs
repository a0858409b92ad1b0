//! Commands and intent classification
//!
//! A command is the normalized transcript of whatever followed the trigger
//! phrase. Classification is an explicit intent table; the matching policy
//! itself is case-insensitive substring search over the free-form text,
//! with exit phrases checked before anything else. An empty command
//! matches no intent.

use crate::config::CoreConfig;

/// A normalized (lower-cased, trimmed) command string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    pub fn normalized(raw: &str) -> Self {
        Self(raw.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a command asks the system to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Shut the whole system down
    Shutdown,

    /// Toggle Normal <-> Hazard mode
    ToggleMode,

    /// On-demand detection scan
    Query,

    /// No configured phrase matched; ignored
    Unknown,
}

/// Maps commands to intents using the configured phrase lists
#[derive(Debug, Clone)]
pub struct IntentMatcher {
    exit_phrases: Vec<String>,
    mode_phrases: Vec<String>,
    query_phrases: Vec<String>,
}

impl IntentMatcher {
    pub fn new(
        exit_phrases: &[String],
        mode_phrases: &[String],
        query_phrases: &[String],
    ) -> Self {
        let lower = |phrases: &[String]| {
            phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect()
        };

        Self {
            exit_phrases: lower(exit_phrases),
            mode_phrases: lower(mode_phrases),
            query_phrases: lower(query_phrases),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(
            &config.exit_phrases,
            &config.mode_phrases,
            &config.query_phrases,
        )
    }

    /// Classify a command. Exit phrases win over everything else.
    pub fn classify(&self, command: &Command) -> Intent {
        if command.is_empty() {
            return Intent::Unknown;
        }

        let text = command.as_str();
        if contains_any(text, &self.exit_phrases) {
            Intent::Shutdown
        } else if contains_any(text, &self.mode_phrases) {
            Intent::ToggleMode
        } else if contains_any(text, &self.query_phrases) {
            Intent::Query
        } else {
            Intent::Unknown
        }
    }
}

fn contains_any(text: &str, phrases: &[String]) -> bool {
    phrases.iter().any(|phrase| text.contains(phrase.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> IntentMatcher {
        IntentMatcher::from_config(&CoreConfig::default())
    }

    #[test]
    fn test_normalization() {
        let command = Command::normalized("  Change MODE \n");
        assert_eq!(command.as_str(), "change mode");
        assert!(!command.is_empty());

        assert!(Command::normalized("   ").is_empty());
        assert!(Command::normalized("").is_empty());
    }

    #[test]
    fn test_classify_core_phrases() {
        let matcher = matcher();

        assert_eq!(
            matcher.classify(&Command::normalized("shut down")),
            Intent::Shutdown
        );
        assert_eq!(
            matcher.classify(&Command::normalized("system shutdown")),
            Intent::Shutdown
        );
        assert_eq!(
            matcher.classify(&Command::normalized("change mode")),
            Intent::ToggleMode
        );
        assert_eq!(
            matcher.classify(&Command::normalized("what is it")),
            Intent::Query
        );
    }

    #[test]
    fn test_substring_policy() {
        let matcher = matcher();

        // Phrases match anywhere inside free-form transcripts
        assert_eq!(
            matcher.classify(&Command::normalized("please change mode now")),
            Intent::ToggleMode
        );
        assert_eq!(
            matcher.classify(&Command::normalized("aura what is it today")),
            Intent::Query
        );
    }

    #[test]
    fn test_exit_wins_over_other_intents() {
        let matcher = matcher();

        let ambiguous = Command::normalized("change mode and then shut down");
        assert_eq!(matcher.classify(&ambiguous), Intent::Shutdown);
    }

    #[test]
    fn test_empty_command_is_a_noop() {
        let matcher = matcher();
        assert_eq!(matcher.classify(&Command::normalized("")), Intent::Unknown);
        assert_eq!(
            matcher.classify(&Command::normalized("   \t ")),
            Intent::Unknown
        );
    }

    #[test]
    fn test_unrecognized_text() {
        let matcher = matcher();
        assert_eq!(
            matcher.classify(&Command::normalized("tell me a joke")),
            Intent::Unknown
        );
    }

    #[test]
    fn test_case_insensitive_phrase_config() {
        let matcher = IntentMatcher::new(
            &["Shut Down".to_string()],
            &["CHANGE MODE".to_string()],
            &[],
        );

        assert_eq!(
            matcher.classify(&Command::normalized("SHUT DOWN")),
            Intent::Shutdown
        );
        assert_eq!(
            matcher.classify(&Command::normalized("change mode")),
            Intent::ToggleMode
        );
    }
}
