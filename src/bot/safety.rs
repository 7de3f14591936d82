// src/bot/safety.rs - Restricted words, toxicity and link filtering in one verdict

use log::debug;
use regex::Regex;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::bot::toxicity::ToxicityDetector;
use crate::types::ChatSafetyConfig;

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:https?://)?[\w\-]+\.[\w\.-]+(?:/[^\s]*)?").expect("url pattern is a valid regex")
    })
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:https?://)?[\da-z\.-]+\.[a-z\.]{2,6}[/\w\.-]*/?$").expect("link pattern is a valid regex")
    })
}

/// Every URL-looking fragment of `text`, in order of appearance.
pub fn extract_urls(text: &str) -> Vec<String> {
    url_pattern().find_iter(text).map(|m| m.as_str().to_string()).collect()
}

/// Whether `text` as a whole is a single link (used to validate whitelist input).
pub fn is_link(text: &str) -> bool {
    link_pattern().is_match(&text.trim().to_lowercase())
}

/// Strip the scheme and surrounding slashes so equivalent spellings compare equal.
pub fn normalize_link(link: &str) -> String {
    let lowered = link.trim().to_lowercase();
    let without_scheme = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);

    without_scheme.trim_start_matches('/').trim_end_matches(['/', '.']).to_string()
}

pub fn whitelist_contains(link: &str, whitelist: &[String]) -> bool {
    let normalized = normalize_link(link);
    whitelist.iter().any(|entry| normalize_link(entry) == normalized)
}

/// Why a message was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum ViolationReason {
    /// A configured word appears literally in the text
    RestrictedWord,
    /// The toxicity detector matched a token against a toxic term
    Toxic { term: String, score: f64 },
    /// A link that is blocked or not whitelisted
    BadLink,
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationReason::RestrictedWord => f.write_str("bad-word"),
            ViolationReason::Toxic { term, score } => write!(f, "bad-word: {} ({:.3})", term, score),
            ViolationReason::BadLink => f.write_str("bad-link"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SafetyVerdict {
    Safe,
    Unsafe(ViolationReason),
}

impl SafetyVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, SafetyVerdict::Safe)
    }
}

/// Runs the configured checks in order and stops at the first violation.
#[derive(Clone)]
pub struct ContentSafetyEvaluator {
    detector: Arc<ToxicityDetector>,
    threshold_adjust: f64,
}

impl ContentSafetyEvaluator {
    pub fn new(detector: Arc<ToxicityDetector>) -> Self {
        Self { detector, threshold_adjust: 0.0 }
    }

    pub fn with_threshold_adjust(mut self, threshold_adjust: f64) -> Self {
        self.threshold_adjust = threshold_adjust;
        self
    }

    pub fn evaluate(&self, config: &ChatSafetyConfig, text: &str) -> SafetyVerdict {
        if !config.moderation.enabled || text.is_empty() {
            return SafetyVerdict::Safe;
        }

        let restricted = &config.restricted_words;
        if restricted.enabled {
            if let Some(word) = restricted.words.iter().find(|w| !w.is_empty() && text.contains(w.as_str())) {
                debug!("Restricted word '{}' found", word);
                return SafetyVerdict::Unsafe(ViolationReason::RestrictedWord);
            }

            let toxicity = self.detector.classify(text, self.threshold_adjust);
            if toxicity.is_toxic {
                return SafetyVerdict::Unsafe(ViolationReason::Toxic {
                    term: toxicity.term,
                    score: toxicity.score,
                });
            }
        }

        let links = &config.link_filtering;
        if links.enabled {
            let urls = extract_urls(text);

            if links.block_all && !urls.is_empty() {
                return SafetyVerdict::Unsafe(ViolationReason::BadLink);
            }

            if let Some(url) = urls.iter().find(|url| !whitelist_contains(url, &links.whitelist)) {
                debug!("Link '{}' is not whitelisted", url);
                return SafetyVerdict::Unsafe(ViolationReason::BadLink);
            }
        }

        SafetyVerdict::Safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::toxicity::{ToxicTerm, ToxicityModel};
    use crate::types::ChatSettings;
    use std::collections::HashMap;

    fn evaluator() -> ContentSafetyEvaluator {
        let mut vocabulary = HashMap::new();
        vocabulary.insert("idiot".to_string(), vec![1.0, 0.0]);
        vocabulary.insert("hello".to_string(), vec![0.0, 1.0]);
        let terms = vec![ToxicTerm { term: "idiot".to_string(), vector: vec![1.0, 0.0] }];
        let model = ToxicityModel::from_parts(vocabulary, terms, 0.8).unwrap();
        ContentSafetyEvaluator::new(Arc::new(ToxicityDetector::new(model)))
    }

    fn enabled_settings() -> ChatSettings {
        ChatSettings::default()
            .with_moderation_enabled(true)
            .with_restricted_words_enabled(true)
            .with_link_filter_enabled(true)
    }

    #[test]
    fn test_disabled_moderation_is_always_safe() {
        let settings = enabled_settings().with_moderation_enabled(false);
        let evaluator = evaluator();
        assert_eq!(evaluator.evaluate(&settings, "badword1 idiot spam.com"), SafetyVerdict::Safe);
        assert_eq!(evaluator.evaluate(&enabled_settings(), ""), SafetyVerdict::Safe);
    }

    #[test]
    fn test_restricted_word_substring() {
        let verdict = evaluator().evaluate(&enabled_settings(), "this has xxbadword2xx inside");
        assert_eq!(verdict, SafetyVerdict::Unsafe(ViolationReason::RestrictedWord));
        assert_eq!(ViolationReason::RestrictedWord.to_string(), "bad-word");
    }

    #[test]
    fn test_toxic_word() {
        let verdict = evaluator().evaluate(&enabled_settings(), "Hello, idiot!");
        match verdict {
            SafetyVerdict::Unsafe(reason @ ViolationReason::Toxic { .. }) => {
                assert_eq!(reason.to_string(), "bad-word: idiot (1.000)");
            }
            other => panic!("expected toxic verdict, got {:?}", other),
        }
    }

    #[test]
    fn test_words_disabled_skips_word_checks() {
        let settings = enabled_settings().with_restricted_words_enabled(false);
        assert!(evaluator().evaluate(&settings, "badword1 idiot").is_safe());
    }

    #[test]
    fn test_link_whitelist() {
        let evaluator = evaluator();
        let settings = enabled_settings();

        assert!(evaluator.evaluate(&settings, "see https://example.com/").is_safe());
        assert!(evaluator.evaluate(&settings, "trustedsite.org and example.com").is_safe());
        assert_eq!(
            evaluator.evaluate(&settings, "go to https://scam.io/win"),
            SafetyVerdict::Unsafe(ViolationReason::BadLink)
        );
        // whitelisted domain does not cover deeper paths
        assert!(!evaluator.evaluate(&settings, "example.com/other").is_safe());
    }

    #[test]
    fn test_block_all_links() {
        let settings = enabled_settings().with_block_all(true);
        assert_eq!(
            evaluator().evaluate(&settings, "https://example.com"),
            SafetyVerdict::Unsafe(ViolationReason::BadLink)
        );
        assert!(evaluator().evaluate(&settings, "no links here").is_safe());
    }

    #[test]
    fn test_link_helpers() {
        assert_eq!(
            extract_urls("visit https://a.com/x and b.org now"),
            vec!["https://a.com/x".to_string(), "b.org".to_string()]
        );
        assert!(extract_urls("plain words").is_empty());

        assert_eq!(normalize_link("HTTPS://Example.com/"), "example.com");
        assert_eq!(normalize_link("http://example.com/path/"), "example.com/path");

        assert!(is_link("example.com"));
        assert!(is_link("https://sub.example.org/path"));
        assert!(!is_link("hello world"));
        assert!(!is_link("nodots"));

        let whitelist = vec!["https://example.com/".to_string()];
        assert!(whitelist_contains("example.com", &whitelist));
        assert!(!whitelist_contains("example.org", &whitelist));
    }
}
