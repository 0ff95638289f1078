use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MetaError {
    #[error("invalid study identifier: {0}")]
    InvalidStudyId(String),

    #[error("archive name does not carry a study identifier: {0}")]
    InvalidArchiveName(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("data directory not found: {0}")]
    MissingDataDir(String),

    #[error("provenance document missing from extracted study: {0}")]
    MissingProvenance(String),

    #[error("design file not found: {0}")]
    #[diagnostic(help("the group model needs the .mat, .grp and .con files of the design"))]
    MissingDesign(String),

    #[error("reference template unavailable; set FSLDIR or `template` in the config")]
    MissingTemplate,

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("metadata query failed: {0}")]
    QueryFailed(String),

    #[error("unexpected metadata query result: {0}")]
    QueryParse(String),

    #[error("unknown neuroimaging software: {toolchain}")]
    #[diagnostic(help("only SPM and FSL results can be harmonized"))]
    UnrecognizedToolchain { toolchain: String },

    #[error("{operation} failed: {message}")]
    EngineFailure { operation: String, message: String },

    #[error("study {0} was recorded twice")]
    DuplicateStudy(String),

    #[error(
        "effect and variance indices disagree (effects only: {effects_only:?}, variances only: {variances_only:?})"
    )]
    IndexMismatch {
        effects_only: Vec<String>,
        variances_only: Vec<String>,
    },

    #[error("no study contributed maps to the meta-analysis")]
    EmptyAnalysis,

    #[error("study {study} failed")]
    Study {
        study: String,
        #[source]
        source: Box<MetaError>,
    },
}

impl MetaError {
    pub fn in_study(self, study: impl Into<String>) -> Self {
        MetaError::Study {
            study: study.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, past any study context.
    pub fn root(&self) -> &MetaError {
        match self {
            MetaError::Study { source, .. } => source.root(),
            other => other,
        }
    }
}
