//! Page state classification
//!
//! Text and markup heuristics the workflows rely on are isolated here so the
//! phrase list and structural matchers can change without touching the
//! readiness probe or the verification gate.

/// Phrases that indicate a human-verification interstitial.
///
/// Completion wording ("verification successful") sits in the same set as
/// challenge wording, so a match means "verification-related text is present"
/// rather than "a challenge is currently unsolved".
pub const DEFAULT_VERIFICATION_PHRASES: &[&str] = &[
    "verifying you are human",
    "verify you are human",
    "prove you are human",
    "captcha",
    "checking your browser",
    "verification successful",
    "verification complete",
];

/// Structural matchers for the collapsed references control, most specific first
pub const DEFAULT_CONTROL_MATCHERS: &[&str] = &[
    r#"div[role="button"][aria-controls*="bibl"][aria-expanded="false"]"#,
    r#"[role="button"][aria-controls*="ref"][aria-expanded="false"]"#,
    r#"button[aria-controls*="ref"][aria-expanded="false"]"#,
];

/// Classifies page state from what can be observed in the document
pub trait PageStateClassifier: Send + Sync + 'static {
    /// Whether the page text shows a verification interstitial
    fn is_verification(&self, page_text: &str) -> bool;

    /// Ordered CSS selectors locating the collapsible control
    fn control_matchers(&self) -> &[String];
}

/// Case-insensitive phrase matching plus a fixed matcher list
#[derive(Debug, Clone)]
pub struct PhraseClassifier {
    phrases: Vec<String>,
    matchers: Vec<String>,
}

impl Default for PhraseClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_VERIFICATION_PHRASES.iter().copied(),
            DEFAULT_CONTROL_MATCHERS.iter().copied(),
        )
    }
}

impl PhraseClassifier {
    /// Build a classifier from custom phrases and matchers
    pub fn new<P, M>(phrases: P, matchers: M) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            matchers: matchers.into_iter().map(Into::into).collect(),
        }
    }

    /// Phrases checked by [`PageStateClassifier::is_verification`]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

impl PageStateClassifier for PhraseClassifier {
    fn is_verification(&self, page_text: &str) -> bool {
        let haystack = page_text.to_lowercase();
        self.phrases.iter().any(|p| haystack.contains(p.as_str()))
    }

    fn control_matchers(&self) -> &[String] {
        &self.matchers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_challenge_phrase_case_insensitive() {
        let classifier = PhraseClassifier::default();
        assert!(classifier.is_verification("Please VERIFY you are human to continue"));
        assert!(classifier.is_verification("Solve this CAPTCHA"));
    }

    #[test]
    fn test_completion_phrase_also_matches() {
        let classifier = PhraseClassifier::default();
        assert!(classifier.is_verification("Verification successful. Redirecting..."));
    }

    #[test]
    fn test_ordinary_page_is_clear() {
        let classifier = PhraseClassifier::default();
        assert!(!classifier.is_verification("An article about distributed systems."));
        assert!(!classifier.is_verification(""));
    }

    #[test]
    fn test_custom_phrases_are_lowercased() {
        let classifier = PhraseClassifier::new(["Hold On"], ["#more"]);
        assert!(classifier.is_verification("hold on while we check"));
        assert_eq!(classifier.control_matchers(), &["#more".to_string()]);
    }

    #[test]
    fn test_empty_phrase_ignored() {
        let classifier = PhraseClassifier::new([""], Vec::<String>::new());
        assert!(classifier.phrases().is_empty());
        assert!(!classifier.is_verification("anything"));
    }

    #[test]
    fn test_default_matchers_most_specific_first() {
        let classifier = PhraseClassifier::default();
        assert!(classifier.control_matchers()[0].contains("bibl"));
        assert_eq!(classifier.control_matchers().len(), DEFAULT_CONTROL_MATCHERS.len());
    }
}
