//! Locating a study's statistical maps in its NIDM-Results provenance graph.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::engine::{ToolStatus, find_in_path};
use crate::error::MetaError;

/// Placeholder used by exporters for locations relative to the pack root.
pub const LOCAL_URI_PREFIX: &str = "file://.";

/// Contrast map, its standard error map and the mask used by the same
/// estimation, plus the specific software agent that ran it.
pub const ARTIFACT_QUERY: &str = r#"
prefix prov: <http://www.w3.org/ns/prov#>
prefix nidm: <http://purl.org/nidash/nidm#>

prefix contrast_estimation: <http://purl.org/nidash/nidm#NIDM_0000001>
prefix contrast_map: <http://purl.org/nidash/nidm#NIDM_0000002>
prefix stderr_map: <http://purl.org/nidash/nidm#NIDM_0000013>
prefix contrast_name: <http://purl.org/nidash/nidm#NIDM_0000085>
prefix mask_map: <http://purl.org/nidash/nidm#NIDM_0000054>

SELECT DISTINCT ?contrastName ?con_file ?std_file ?mask_file ?software WHERE {
 ?con_id a contrast_map: ;
      contrast_name: ?contrastName ;
      prov:atLocation ?con_file ;
      prov:wasGeneratedBy ?con_est .
 ?std_id a stderr_map: ;
      prov:atLocation ?std_file ;
      prov:wasGeneratedBy ?con_est .
 ?mask_id a mask_map: ;
      prov:atLocation ?mask_file .
 ?soft_id a ?software .
 ?con_est a contrast_estimation: ;
          prov:wasAssociatedWith ?soft_id ;
          prov:used ?mask_id .

  FILTER(?software NOT IN (prov:SoftwareAgent, prov:Agent))
}
"#;

const QUERY_VARS: [&str; 5] = ["contrastName", "con_file", "std_file", "mask_file", "software"];

/// One row of the artifact query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceRecord {
    pub contrast_name: String,
    pub effect_location: String,
    pub stderr_location: String,
    pub mask_location: String,
    pub toolchain_id: String,
}

pub trait ProvenanceQuery: Send + Sync {
    /// Evaluate `query` against the provenance document and return its bindings.
    fn select(
        &self,
        document: &Utf8Path,
        query: &str,
    ) -> Result<Vec<HashMap<String, String>>, MetaError>;
}

pub struct ArtifactResolver<Q: ProvenanceQuery> {
    query: Q,
}

impl<Q: ProvenanceQuery> ArtifactResolver<Q> {
    pub fn new(query: Q) -> Self {
        Self { query }
    }

    pub fn resolve(&self, document: &Utf8Path) -> Result<Vec<ProvenanceRecord>, MetaError> {
        self.query
            .select(document, ARTIFACT_QUERY)?
            .into_iter()
            .map(record_from_row)
            .collect()
    }
}

fn record_from_row(mut row: HashMap<String, String>) -> Result<ProvenanceRecord, MetaError> {
    let mut take = |var: &str| {
        row.remove(var)
            .ok_or_else(|| MetaError::QueryParse(format!("row is missing ?{var}")))
    };
    Ok(ProvenanceRecord {
        contrast_name: take(QUERY_VARS[0])?,
        effect_location: take(QUERY_VARS[1])?,
        stderr_location: take(QUERY_VARS[2])?,
        mask_location: take(QUERY_VARS[3])?,
        toolchain_id: take(QUERY_VARS[4])?,
    })
}

/// Resolve a `prov:atLocation` value against the extracted study directory.
pub fn resolve_location(study_dir: &Utf8Path, location: &str) -> Utf8PathBuf {
    match location.strip_prefix(LOCAL_URI_PREFIX) {
        Some(rest) => Utf8PathBuf::from(format!("{study_dir}{rest}")),
        None => match location.strip_prefix("file://") {
            Some(absolute) => Utf8PathBuf::from(absolute),
            None => study_dir.join(location),
        },
    }
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    results: SparqlBindings,
}

#[derive(Debug, Deserialize)]
struct SparqlBindings {
    bindings: Vec<HashMap<String, SparqlTerm>>,
}

#[derive(Debug, Deserialize)]
struct SparqlTerm {
    value: String,
}

/// Parse a W3C SPARQL 1.1 JSON results document into plain bindings.
pub fn parse_sparql_json(content: &str) -> Result<Vec<HashMap<String, String>>, MetaError> {
    let parsed: SparqlResults =
        serde_json::from_str(content).map_err(|err| MetaError::QueryParse(err.to_string()))?;
    Ok(parsed
        .results
        .bindings
        .into_iter()
        .map(|binding| {
            binding
                .into_iter()
                .map(|(var, term)| (var, term.value))
                .collect()
        })
        .collect())
}

/// Runs queries through an external SPARQL processor (Jena `arq` by default).
#[derive(Debug, Clone)]
pub struct SparqlCliQuery {
    program: String,
}

impl SparqlCliQuery {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// A program given with a directory part is used as is; a bare name is
    /// looked up on `PATH`.
    pub fn locate(&self) -> Option<PathBuf> {
        let program = Path::new(&self.program);
        if program.components().count() > 1 {
            return program.is_file().then(|| program.to_path_buf());
        }
        find_in_path(&self.program)
    }

    pub fn tool_info(&self) -> ToolStatus {
        ToolStatus {
            name: self.program.clone(),
            path: self.locate().map(|path| path.to_string_lossy().to_string()),
        }
    }
}

impl ProvenanceQuery for SparqlCliQuery {
    fn select(
        &self,
        document: &Utf8Path,
        query: &str,
    ) -> Result<Vec<HashMap<String, String>>, MetaError> {
        let program = self
            .locate()
            .ok_or_else(|| MetaError::MissingTool(self.program.clone()))?;
        let mut query_file = tempfile::Builder::new()
            .prefix("nidm-ibma-query")
            .suffix(".rq")
            .tempfile()
            .map_err(|err| MetaError::Filesystem(err.to_string()))?;
        query_file
            .write_all(query.as_bytes())
            .map_err(|err| MetaError::Filesystem(err.to_string()))?;

        let output = Command::new(&program)
            .arg("--data")
            .arg(document.as_std_path())
            .arg("--query")
            .arg(query_file.path())
            .arg("--results=JSON")
            .output()
            .map_err(|err| MetaError::QueryFailed(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(MetaError::QueryFailed(if stderr.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                stderr
            }));
        }
        parse_sparql_json(&String::from_utf8_lossy(&output.stdout))
    }
}
