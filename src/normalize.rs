//! Toolchain-specific harmonization into FSL's template space and scale.
//!
//! SPM maps are resliced onto the MNI152 2mm template. FSL maps already live
//! there but are scaled to a target intensity of 10000 instead of 100, so
//! effect and standard error maps are divided by the rescale divisor.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::{StudyId, ToolchainKind};
use crate::engine::{ImageEngine, Operation};
use crate::error::MetaError;
use crate::provenance::{ProvenanceRecord, resolve_location};

pub const DEFAULT_RESCALE_DIVISOR: f64 = 100.0;

/// Effect, standard error and mask of one study in the common reference
/// geometry and scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarmonizedTriple {
    pub effect: Utf8PathBuf,
    pub stderr: Utf8PathBuf,
    pub mask: Utf8PathBuf,
}

/// Where a study's maps live and where its derived maps go.
#[derive(Debug, Clone, Copy)]
pub struct StudyContext<'a> {
    pub id: &'a StudyId,
    pub study_dir: &'a Utf8Path,
    pub work_dir: &'a Utf8Path,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    template: Option<Utf8PathBuf>,
    rescale_divisor: f64,
}

impl Normalizer {
    pub fn new(template: Option<Utf8PathBuf>, rescale_divisor: f64) -> Self {
        Self {
            template,
            rescale_divisor,
        }
    }

    pub fn harmonize(
        &self,
        engine: &dyn ImageEngine,
        kind: &ToolchainKind,
        record: &ProvenanceRecord,
        study: StudyContext<'_>,
    ) -> Result<HarmonizedTriple, MetaError> {
        let effect = resolve_location(study.study_dir, &record.effect_location);
        let stderr = resolve_location(study.study_dir, &record.stderr_location);
        let mask = resolve_location(study.study_dir, &record.mask_location);

        match kind {
            ToolchainKind::Spm => {
                let template = self.template.as_ref().ok_or(MetaError::MissingTemplate)?;
                let reslice = |input: &Utf8Path| -> Result<Utf8PathBuf, MetaError> {
                    let output = derived_path(study.work_dir, study.id, input, "r");
                    engine.run(
                        &Operation::Reslice {
                            input: input.to_path_buf(),
                            reference: template.clone(),
                            output: output.clone(),
                        },
                        study.study_dir,
                    )?;
                    Ok(output)
                };
                Ok(HarmonizedTriple {
                    effect: reslice(&effect)?,
                    stderr: reslice(&stderr)?,
                    mask: reslice(&mask)?,
                })
            }
            ToolchainKind::Fsl => {
                let rescale = |input: &Utf8Path| -> Result<Utf8PathBuf, MetaError> {
                    let output = derived_path(study.work_dir, study.id, input, "s");
                    engine.run(
                        &Operation::Divide {
                            input: input.to_path_buf(),
                            divisor: self.rescale_divisor,
                            output: output.clone(),
                        },
                        study.study_dir,
                    )?;
                    Ok(output)
                };
                Ok(HarmonizedTriple {
                    effect: rescale(&effect)?,
                    stderr: rescale(&stderr)?,
                    mask,
                })
            }
            ToolchainKind::Unrecognized(identifier) => Err(MetaError::UnrecognizedToolchain {
                toolchain: identifier.clone(),
            }),
        }
    }
}

/// `<work_dir>/<study>_<stem>_<suffix>`, where stem is the file name up to its
/// first dot.
pub fn derived_path(
    work_dir: &Utf8Path,
    study: &StudyId,
    source: &Utf8Path,
    suffix: &str,
) -> Utf8PathBuf {
    let stem = source
        .file_name()
        .and_then(|name| name.split('.').next())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("map");
    work_dir.join(format!("{study}_{stem}_{suffix}"))
}
