use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MetaError;

/// SciCrunch resolver identifier for SPM.
pub const SPM_TOOLCHAIN: &str = "http://scicrunch.org/resolver/SCR_007037";
/// SciCrunch resolver identifier for FSL.
pub const FSL_TOOLCHAIN: &str = "http://scicrunch.org/resolver/SCR_002823";

/// Study identifier derived from the archive name.
///
/// Ordering is lexical over the identifier string; the merged stacks rely on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StudyId(String);

impl StudyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StudyId {
    type Err = MetaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized != "."
            && normalized != ".."
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
        if !is_valid {
            return Err(MetaError::InvalidStudyId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Originating analysis software of a study, as declared by its provenance agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolchainKind {
    Spm,
    Fsl,
    Unrecognized(String),
}

impl ToolchainKind {
    pub fn classify(identifier: &str) -> Self {
        match identifier.trim() {
            SPM_TOOLCHAIN => ToolchainKind::Spm,
            FSL_TOOLCHAIN => ToolchainKind::Fsl,
            other => ToolchainKind::Unrecognized(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ToolchainKind::Spm => "spm",
            ToolchainKind::Fsl => "fsl",
            ToolchainKind::Unrecognized(identifier) => identifier,
        }
    }
}

impl fmt::Display for ToolchainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolchainKind::Spm => write!(f, "SPM"),
            ToolchainKind::Fsl => write!(f, "FSL"),
            ToolchainKind::Unrecognized(identifier) => write!(f, "unrecognized ({identifier})"),
        }
    }
}
