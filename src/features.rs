//! Closed registry of feature identifiers the assistant may suggest.
//!
//! Both streaming tiers share this registry. Identifiers outside it are
//! discarded wherever they are parsed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A studio feature the assistant can point the user at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureId {
    /// Text-to-image generation.
    Image,
    /// Boxed action-figure renders.
    ActionFigure,
    /// Ghibli-style illustration.
    Ghibli,
    /// Cartoon conversion.
    Cartoon,
    /// Meme composer.
    Meme,
    /// Animated GIF maker.
    Gif,
    /// Short video generation.
    Video,
}

impl FeatureId {
    /// Every registered feature, in display order.
    pub const ALL: [FeatureId; 7] = [
        Self::Image,
        Self::ActionFigure,
        Self::Ghibli,
        Self::Cartoon,
        Self::Meme,
        Self::Gif,
        Self::Video,
    ];

    /// Wire identifier (`"action-figure"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::ActionFigure => "action-figure",
            Self::Ghibli => "ghibli",
            Self::Cartoon => "cartoon",
            Self::Meme => "meme",
            Self::Gif => "gif",
            Self::Video => "video",
        }
    }

    /// One-line description used in the synthesized system instruction.
    pub fn description(self) -> &'static str {
        match self {
            Self::Image => "generate an image from a text prompt",
            Self::ActionFigure => "turn a photo into a boxed action figure",
            Self::Ghibli => "restyle a photo as Studio Ghibli-style art",
            Self::Cartoon => "convert a photo into a cartoon",
            Self::Meme => "compose a meme with captions",
            Self::Gif => "create an animated GIF",
            Self::Video => "generate a short video clip",
        }
    }

    /// Look up a wire identifier. Matching is exact after trimming.
    pub fn parse(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL.into_iter().find(|f| f.as_str() == id)
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for identifiers outside the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown feature identifier: {0}")]
pub struct UnknownFeature(pub String);

impl FromStr for FeatureId {
    type Err = UnknownFeature;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownFeature(s.to_owned()))
    }
}

/// Append `id` unless already present, keeping first-seen order.
pub(crate) fn push_unique(ids: &mut Vec<FeatureId>, id: FeatureId) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}
