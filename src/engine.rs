//! Boundary to the external numeric image engine.
//!
//! Every voxel-level step of the pipeline is described by a typed [`Operation`].
//! [`FslEngine`] turns operations into FSL command lines and runs them as
//! blocking child processes; [`DryRunEngine`] only records what would run.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::MetaError;

pub const FLIRT: &str = "flirt";
pub const FSLMATHS: &str = "fslmaths";
pub const FSLMERGE: &str = "fslmerge";
pub const FLAMEO: &str = "flameo";

/// Inputs of the group-level mixed-effects estimation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixedEffectsSpec {
    pub effects: Utf8PathBuf,
    pub variances: Utf8PathBuf,
    pub mask: Utf8PathBuf,
    pub design_matrix: Utf8PathBuf,
    pub group_spec: Utf8PathBuf,
    pub contrasts: Utf8PathBuf,
    pub log_dir: Utf8PathBuf,
    pub run_mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Affine resampling into `reference` using the input's sform.
    Reslice {
        input: Utf8PathBuf,
        reference: Utf8PathBuf,
        output: Utf8PathBuf,
    },
    Divide {
        input: Utf8PathBuf,
        divisor: f64,
        output: Utf8PathBuf,
    },
    Square {
        input: Utf8PathBuf,
        output: Utf8PathBuf,
    },
    /// Voxel-wise minimum of two volumes.
    Minimum {
        input: Utf8PathBuf,
        other: Utf8PathBuf,
        output: Utf8PathBuf,
    },
    /// Zero voxels below `threshold`, then set every non-zero voxel to 1.
    Binarize {
        input: Utf8PathBuf,
        threshold: f64,
        output: Utf8PathBuf,
    },
    /// Concatenate volumes along the fourth axis, in the given order.
    Merge {
        inputs: Vec<Utf8PathBuf>,
        output: Utf8PathBuf,
    },
    MixedEffects(MixedEffectsSpec),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Reslice { .. } => "reslice",
            Operation::Divide { .. } => "divide",
            Operation::Square { .. } => "square",
            Operation::Minimum { .. } => "minimum",
            Operation::Binarize { .. } => "binarize",
            Operation::Merge { .. } => "merge",
            Operation::MixedEffects(_) => "mixed-effects",
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            Operation::Reslice { .. } => FLIRT,
            Operation::Divide { .. }
            | Operation::Square { .. }
            | Operation::Minimum { .. }
            | Operation::Binarize { .. } => FSLMATHS,
            Operation::Merge { .. } => FSLMERGE,
            Operation::MixedEffects(_) => FLAMEO,
        }
    }

    pub fn output(&self) -> &Utf8Path {
        match self {
            Operation::Reslice { output, .. }
            | Operation::Divide { output, .. }
            | Operation::Square { output, .. }
            | Operation::Minimum { output, .. }
            | Operation::Binarize { output, .. }
            | Operation::Merge { output, .. } => output,
            Operation::MixedEffects(spec) => &spec.log_dir,
        }
    }

    /// Ordered FSL arguments for this operation.
    pub fn fsl_args(&self) -> Vec<String> {
        match self {
            Operation::Reslice {
                input,
                reference,
                output,
            } => vec![
                "-in".to_string(),
                input.to_string(),
                "-ref".to_string(),
                reference.to_string(),
                "-applyxfm".to_string(),
                "-usesqform".to_string(),
                "-out".to_string(),
                output.to_string(),
            ],
            Operation::Divide {
                input,
                divisor,
                output,
            } => vec![
                input.to_string(),
                "-div".to_string(),
                divisor.to_string(),
                output.to_string(),
            ],
            Operation::Square { input, output } => {
                vec![input.to_string(), "-sqr".to_string(), output.to_string()]
            }
            Operation::Minimum {
                input,
                other,
                output,
            } => vec![
                input.to_string(),
                "-min".to_string(),
                other.to_string(),
                output.to_string(),
            ],
            Operation::Binarize {
                input,
                threshold,
                output,
            } => vec![
                input.to_string(),
                "-thr".to_string(),
                threshold.to_string(),
                "-bin".to_string(),
                output.to_string(),
            ],
            Operation::Merge { inputs, output } => {
                let mut args = vec!["-t".to_string(), output.to_string()];
                args.extend(inputs.iter().map(|input| input.to_string()));
                args
            }
            Operation::MixedEffects(spec) => vec![
                format!("--cope={}", spec.effects),
                format!("--vc={}", spec.variances),
                format!("--mask={}", spec.mask),
                format!("--ld={}", spec.log_dir),
                format!("--dm={}", spec.design_matrix),
                format!("--cs={}", spec.group_spec),
                format!("--tc={}", spec.contrasts),
                format!("--runmode={}", spec.run_mode),
            ],
        }
    }
}

/// A fully reconstructed external command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Utf8PathBuf,
}

impl Invocation {
    pub fn for_operation(operation: &Operation, working_dir: &Utf8Path) -> Self {
        Self {
            program: operation.program().to_string(),
            args: operation.fsl_args(),
            working_dir: working_dir.to_path_buf(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

pub trait ImageEngine: Send + Sync {
    /// Run `operation` to completion with `working_dir` as the current directory.
    fn run(&self, operation: &Operation, working_dir: &Utf8Path) -> Result<(), MetaError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FslEngine {
    fsl_dir: Option<Utf8PathBuf>,
}

impl FslEngine {
    pub fn new(fsl_dir: Option<Utf8PathBuf>) -> Self {
        Self { fsl_dir }
    }

    pub fn locate(&self, program: &str) -> Option<PathBuf> {
        if let Some(dir) = &self.fsl_dir {
            let candidate = dir.join("bin").join(program);
            if candidate.as_std_path().exists() {
                return Some(candidate.into_std_path_buf());
            }
        }
        find_in_path(program)
    }

    pub fn tool_info(&self) -> Vec<ToolStatus> {
        [FLIRT, FSLMATHS, FSLMERGE, FLAMEO]
            .iter()
            .map(|name| ToolStatus {
                name: name.to_string(),
                path: self
                    .locate(name)
                    .map(|path| path.to_string_lossy().to_string()),
            })
            .collect()
    }
}

impl ImageEngine for FslEngine {
    fn run(&self, operation: &Operation, working_dir: &Utf8Path) -> Result<(), MetaError> {
        let invocation = Invocation::for_operation(operation, working_dir);
        let program = self
            .locate(&invocation.program)
            .ok_or_else(|| MetaError::MissingTool(invocation.program.clone()))?;
        tracing::debug!(command = %invocation, cwd = %working_dir, "running");

        let output = Command::new(&program)
            .args(&invocation.args)
            .current_dir(working_dir.as_std_path())
            .output()
            .map_err(|err| MetaError::EngineFailure {
                operation: operation.name().to_string(),
                message: format!("{}: {err}", program.display()),
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("`{invocation}` exited with {}", output.status)
        } else {
            stderr
        };
        Err(MetaError::EngineFailure {
            operation: operation.name().to_string(),
            message,
        })
    }
}

/// Records invocations instead of running them.
#[derive(Debug, Default)]
pub struct DryRunEngine {
    planned: Mutex<Vec<Invocation>>,
}

impl DryRunEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn planned(&self) -> Vec<Invocation> {
        self.planned
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl ImageEngine for DryRunEngine {
    fn run(&self, operation: &Operation, working_dir: &Utf8Path) -> Result<(), MetaError> {
        let invocation = Invocation::for_operation(operation, working_dir);
        tracing::info!(command = %invocation, "dry run");
        self.planned
            .lock()
            .map_err(|_| MetaError::EngineFailure {
                operation: operation.name().to_string(),
                message: "dry-run plan lock poisoned".to_string(),
            })?
            .push(invocation);
        Ok(())
    }
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divide_arguments_are_ordered() {
        let op = Operation::Divide {
            input: Utf8PathBuf::from("/s/cope1.nii.gz"),
            divisor: 100.0,
            output: Utf8PathBuf::from("/w/s1_cope1_s"),
        };
        assert_eq!(op.program(), FSLMATHS);
        assert_eq!(
            op.fsl_args(),
            vec!["/s/cope1.nii.gz", "-div", "100", "/w/s1_cope1_s"]
        );
    }

    #[test]
    fn binarize_threshold_is_rendered_exactly() {
        let op = Operation::Binarize {
            input: Utf8PathBuf::from("/w/meta_analysis_mask"),
            threshold: 0.9,
            output: Utf8PathBuf::from("/w/meta_analysis_mask"),
        };
        assert_eq!(
            op.fsl_args(),
            vec![
                "/w/meta_analysis_mask",
                "-thr",
                "0.9",
                "-bin",
                "/w/meta_analysis_mask"
            ]
        );
    }

    #[test]
    fn dry_run_records_invocations() {
        let engine = DryRunEngine::new();
        let op = Operation::Square {
            input: Utf8PathBuf::from("a"),
            output: Utf8PathBuf::from("b"),
        };
        engine.run(&op, Utf8Path::new("/w")).unwrap();
        let planned = engine.planned();
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].to_string(), "fslmaths a -sqr b");
        assert_eq!(planned[0].working_dir, Utf8PathBuf::from("/w"));
    }
}
