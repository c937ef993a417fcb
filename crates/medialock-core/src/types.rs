use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MediaError;

/// Kind of media payload. Selects the key-derivation info string and
/// whether a sidecar index may be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaType {
    pub const ALL: [MediaType; 4] = [
        MediaType::Image,
        MediaType::Video,
        MediaType::Audio,
        MediaType::Document,
    ];

    /// Canonical upper-case label (`IMAGE`, `VIDEO`, ...)
    pub fn label(self) -> &'static str {
        match self {
            MediaType::Image => "IMAGE",
            MediaType::Video => "VIDEO",
            MediaType::Audio => "AUDIO",
            MediaType::Document => "DOCUMENT",
        }
    }

    /// Only streamable media carries a sidecar.
    pub fn is_streamable(self) -> bool {
        matches!(self, MediaType::Video | MediaType::Audio)
    }

    /// Parse a label, falling back to `Document` for anything unknown.
    pub fn from_label_lenient(label: &str) -> Self {
        label.parse().unwrap_or(MediaType::Document)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MediaType {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MediaType::ALL
            .into_iter()
            .find(|t| t.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MediaError::UnsupportedMediaType(s.to_string()))
    }
}
