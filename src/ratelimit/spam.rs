//! Content heuristics for chat messages

use regex::Regex;
use thiserror::Error;

use crate::config::SpamSettings;

#[derive(Debug, Error)]
pub enum SpamError {
    #[error("Invalid spam pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Outcome of [`SpamGuard::inspect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamVerdict {
    Clean,
    RepeatedCharacters,
    BannedWord,
    SuspiciousPattern,
}

impl SpamVerdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, SpamVerdict::Clean)
    }

    /// Metric label for the rule that fired
    pub fn rule(&self) -> &'static str {
        match self {
            SpamVerdict::Clean => "clean",
            SpamVerdict::RepeatedCharacters => "repeated_chars",
            SpamVerdict::BannedWord => "banned_word",
            SpamVerdict::SuspiciousPattern => "suspicious_pattern",
        }
    }
}

/// Rejects messages with long character runs, banned words or suspicious patterns.
///
/// Patterns are compiled once at construction; [`SpamGuard::inspect`] is a
/// pure function of the content.
pub struct SpamGuard {
    enabled: bool,
    max_repeated_chars: usize,
    banned_words: Vec<Regex>,
    suspicious: Vec<Regex>,
}

impl SpamGuard {
    pub fn new(settings: &SpamSettings) -> Result<Self, SpamError> {
        let banned_words = settings
            .banned_words
            .iter()
            .filter(|w| !w.trim().is_empty())
            .map(|word| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(word.trim()));
                compile(&pattern)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let suspicious = settings
            .suspicious_patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enabled: settings.enabled,
            max_repeated_chars: settings.max_repeated_chars,
            banned_words,
            suspicious,
        })
    }

    /// A guard that accepts everything
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_repeated_chars: usize::MAX,
            banned_words: Vec::new(),
            suspicious: Vec::new(),
        }
    }

    pub fn inspect(&self, content: &str) -> SpamVerdict {
        if !self.enabled {
            return SpamVerdict::Clean;
        }

        if has_repeated_run(content, self.max_repeated_chars) {
            return SpamVerdict::RepeatedCharacters;
        }

        if self.banned_words.iter().any(|re| re.is_match(content)) {
            return SpamVerdict::BannedWord;
        }

        if self.suspicious.iter().any(|re| re.is_match(content)) {
            return SpamVerdict::SuspiciousPattern;
        }

        SpamVerdict::Clean
    }
}

fn compile(pattern: &str) -> Result<Regex, SpamError> {
    Regex::new(pattern).map_err(|source| SpamError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// True when some character repeats more than `max` times in a row.
fn has_repeated_run(content: &str, max: usize) -> bool {
    let mut prev = None;
    let mut run = 0usize;

    for c in content.chars() {
        if Some(c) == prev {
            run += 1;
            if run > max {
                return true;
            }
        } else {
            prev = Some(c);
            run = 1;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(banned: &[&str]) -> SpamGuard {
        let settings = SpamSettings {
            banned_words: banned.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        SpamGuard::new(&settings).unwrap()
    }

    #[test]
    fn test_clean_message() {
        assert_eq!(guard(&["scam"]).inspect("hello there"), SpamVerdict::Clean);
    }

    #[test]
    fn test_repeated_characters() {
        let guard = guard(&[]);
        assert_eq!(guard.inspect("heyyyyy"), SpamVerdict::Clean);
        assert_eq!(guard.inspect("heyyyyyy"), SpamVerdict::RepeatedCharacters);
        assert_eq!(guard.inspect("!!!!!!"), SpamVerdict::RepeatedCharacters);
    }

    #[test]
    fn test_banned_words_match_whole_words_only() {
        let guard = guard(&["scam"]);
        assert_eq!(guard.inspect("this is a Scam"), SpamVerdict::BannedWord);
        assert_eq!(guard.inspect("scampi for dinner"), SpamVerdict::Clean);
    }

    #[test]
    fn test_suspicious_patterns() {
        let guard = guard(&[]);
        assert_eq!(
            guard.inspect("free stuff at https://bit.ly/abc"),
            SpamVerdict::SuspiciousPattern
        );
        assert_eq!(guard.inspect("WATCH THIS"), SpamVerdict::SuspiciousPattern);
        assert_eq!(guard.inspect("GG WP"), SpamVerdict::Clean);
    }

    #[test]
    fn test_disabled_guard_accepts_everything() {
        assert!(SpamGuard::disabled().inspect("aaaaaaaaaaa").is_clean());
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let settings = SpamSettings {
            suspicious_patterns: vec!["(unclosed".to_string()],
            ..Default::default()
        };
        assert!(SpamGuard::new(&settings).is_err());
    }
}
