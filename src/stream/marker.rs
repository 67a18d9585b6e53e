//! Feature marker extraction.
//!
//! The assistant may end a reply with `FEATURES:["image","meme"]`. The
//! marker is stripped from user-visible text and parsed into
//! [`FeatureId`]s. Providers that never emit the marker are covered by a
//! heuristic pass that looks for bracketed identifiers such as `[ghibli]`.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::features::{FeatureId, push_unique};

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"FEATURES:\[(.*?)\]").unwrap_or_else(|_| unreachable!("static pattern"))
});

static BRACKETED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([a-z][a-z-]*)\]").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Result of scanning one piece of text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extraction {
    /// Text to show the user.
    pub display_text: String,
    /// Registered features found in the text, first-seen order.
    pub features: Vec<FeatureId>,
    /// Whether a well-formed structured marker was found and removed.
    pub structured: bool,
}

/// Stateless marker extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureMarkerExtractor;

impl FeatureMarkerExtractor {
    /// Create an extractor.
    pub fn new() -> Self {
        Self
    }

    /// Scan `text` for the first feature marker.
    ///
    /// - Well-formed marker: removed from the display text; its ids are
    ///   filtered against the registry (unknown ids are dropped).
    /// - Malformed marker JSON: no features, text left untouched.
    /// - No marker: bracketed registry ids (`[image]`) count as implicit
    ///   suggestions; text left untouched.
    pub fn extract(&self, text: &str) -> Extraction {
        let Some(captures) = MARKER_RE.captures(text) else {
            return Extraction {
                display_text: text.to_owned(),
                features: self.implicit_features(text),
                structured: false,
            };
        };
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            return Extraction {
                display_text: text.to_owned(),
                ..Extraction::default()
            };
        };

        let ids = match serde_json::from_str::<Vec<String>>(&format!("[{}]", inner.as_str())) {
            Ok(ids) => ids,
            Err(e) => {
                debug!(error = %e, marker = whole.as_str(), "malformed feature marker left in place");
                return Extraction {
                    display_text: text.to_owned(),
                    ..Extraction::default()
                };
            }
        };

        let mut features = Vec::new();
        for id in &ids {
            match FeatureId::parse(id) {
                Some(feature) => push_unique(&mut features, feature),
                None => debug!(id = id.as_str(), "dropping unregistered feature id"),
            }
        }

        let mut display_text = String::with_capacity(text.len());
        display_text.push_str(&text[..whole.start()]);
        display_text.push_str(&text[whole.end()..]);

        Extraction {
            display_text,
            features,
            structured: true,
        }
    }

    /// Registry ids written as `[id]` anywhere in `text`.
    pub fn implicit_features(&self, text: &str) -> Vec<FeatureId> {
        let mut features = Vec::new();
        for captures in BRACKETED_RE.captures_iter(text) {
            if let Some(feature) = captures.get(1).and_then(|m| FeatureId::parse(m.as_str())) {
                push_unique(&mut features, feature);
            }
        }
        features
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn extract(text: &str) -> Extraction {
        FeatureMarkerExtractor::new().extract(text)
    }

    #[test]
    fn marker_removed_and_parsed() {
        let out = extract("Here you go! FEATURES:[\"image\",\"meme\"]");
        assert_eq!(out.display_text, "Here you go! ");
        assert_eq!(out.features, vec![FeatureId::Image, FeatureId::Meme]);
        assert!(out.structured);
    }

    #[test]
    fn malformed_marker_left_untouched() {
        let text = "Hmm FEATURES:[not-json] ok";
        let out = extract(text);
        assert_eq!(out.display_text, text);
        assert!(out.features.is_empty());
        assert!(!out.structured);
    }

    #[test]
    fn unknown_ids_are_dropped() {
        let out = extract("FEATURES:[\"image\",\"podcast\",\"video\"]");
        assert_eq!(out.features, vec![FeatureId::Image, FeatureId::Video]);
        assert_eq!(out.display_text, "");
    }

    #[test]
    fn duplicates_collapse() {
        let out = extract("FEATURES:[\"gif\",\"gif\"]");
        assert_eq!(out.features, vec![FeatureId::Gif]);
    }

    #[test]
    fn only_first_marker_is_removed() {
        let out = extract("a FEATURES:[\"gif\"] b FEATURES:[\"meme\"]");
        assert_eq!(out.display_text, "a  b FEATURES:[\"meme\"]");
        assert_eq!(out.features, vec![FeatureId::Gif]);
    }

    #[test]
    fn empty_marker_is_structured_with_no_features() {
        let out = extract("Nothing to suggest. FEATURES:[]");
        assert!(out.structured);
        assert!(out.features.is_empty());
        assert_eq!(out.display_text, "Nothing to suggest. ");
    }

    #[test]
    fn bracketed_ids_are_implicit_suggestions() {
        let text = "You could try [ghibli] or [action-figure], or even [sparkles].";
        let out = extract(text);
        assert_eq!(out.display_text, text);
        assert_eq!(out.features, vec![FeatureId::Ghibli, FeatureId::ActionFigure]);
        assert!(!out.structured);
    }

    #[test]
    fn plain_text_has_no_features() {
        let out = extract("Just chatting.");
        assert!(out.features.is_empty());
        assert_eq!(out.display_text, "Just chatting.");
    }
}
