use camino::{Utf8Path, Utf8PathBuf};

use crate::engine::{ImageEngine, MixedEffectsSpec, Operation};
use crate::error::MetaError;
use crate::merge::MergedVolumes;

pub const STATS_DIR_NAME: &str = "stats";
pub const DEFAULT_RUN_MODE: &str = "flame1";

/// Design matrix, covariance groups and contrasts of the third-level model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignFiles {
    pub matrix: Utf8PathBuf,
    pub groups: Utf8PathBuf,
    pub contrasts: Utf8PathBuf,
}

impl DesignFiles {
    /// `<dir>/<name>.mat`, `<dir>/<name>.grp` and `<dir>/<name>.con`.
    pub fn in_dir(dir: &Utf8Path, name: &str) -> Self {
        Self {
            matrix: dir.join(format!("{name}.mat")),
            groups: dir.join(format!("{name}.grp")),
            contrasts: dir.join(format!("{name}.con")),
        }
    }

    pub fn verify(&self) -> Result<(), MetaError> {
        for path in [&self.matrix, &self.groups, &self.contrasts] {
            if !path.as_std_path().is_file() {
                return Err(MetaError::MissingDesign(path.to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GroupModel {
    design: DesignFiles,
    run_mode: String,
}

impl GroupModel {
    pub fn new(design: DesignFiles, run_mode: impl Into<String>) -> Self {
        Self {
            design,
            run_mode: run_mode.into(),
        }
    }

    pub fn design(&self) -> &DesignFiles {
        &self.design
    }

    /// Run the mixed-effects estimator once. Failures are not retried.
    pub fn estimate(
        &self,
        engine: &dyn ImageEngine,
        merged: &MergedVolumes,
        mask: &Utf8Path,
        work_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, MetaError> {
        let log_dir = work_dir.join(STATS_DIR_NAME);
        engine.run(
            &Operation::MixedEffects(MixedEffectsSpec {
                effects: merged.effects.clone(),
                variances: merged.variances.clone(),
                mask: mask.to_path_buf(),
                design_matrix: self.design.matrix.clone(),
                group_spec: self.design.groups.clone(),
                contrasts: self.design.contrasts.clone(),
                log_dir: log_dir.clone(),
                run_mode: self.run_mode.clone(),
            }),
            work_dir,
        )?;
        Ok(log_dir)
    }
}
