//! Separation model identifiers.
//!
//! Each deployed worker family runs exactly one model. The model
//! determines the stem set a successful separation must produce, which
//! is what Result Intake validates reports against.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical four-stem output shared by the currently deployed models.
pub const FOUR_STEMS: [&str; 4] = ["vocals", "drums", "bass", "other"];

/// A separation model family a worker can declare as its capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelId {
    /// SCNet (sparse compression network).
    Scnet,
    /// DTTNet (dual-path transformer).
    Dttnet,
}

impl ModelId {
    /// Stem names a worker running this model must deliver — exactly
    /// these, no missing or extra keys.
    pub fn stem_names(&self) -> &'static [&'static str] {
        match self {
            Self::Scnet | Self::Dttnet => &FOUR_STEMS,
        }
    }

    /// All known models.
    pub fn all() -> &'static [ModelId] {
        &[Self::Scnet, Self::Dttnet]
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scnet => "scnet",
            Self::Dttnet => "dttnet",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ModelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scnet" => Ok(Self::Scnet),
            "dttnet" => Ok(Self::Dttnet),
            other => Err(format!("unknown model: {other}")),
        }
    }
}
