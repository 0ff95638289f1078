//! Group mask as the running intersection of every study's analysis mask.

use camino::{Utf8Path, Utf8PathBuf};

use crate::engine::{ImageEngine, Operation};
use crate::error::MetaError;

pub const GROUP_MASK_NAME: &str = "meta_analysis_mask";
pub const DEFAULT_MASK_THRESHOLD: f64 = 0.9;

#[derive(Debug)]
pub struct MaskAggregator {
    output: Utf8PathBuf,
    current: Option<Utf8PathBuf>,
    studies: usize,
}

impl MaskAggregator {
    pub fn new(work_dir: &Utf8Path) -> Self {
        Self {
            output: work_dir.join(GROUP_MASK_NAME),
            current: None,
            studies: 0,
        }
    }

    pub fn output(&self) -> &Utf8Path {
        &self.output
    }

    pub fn studies(&self) -> usize {
        self.studies
    }

    /// Fold one harmonized study mask into the group mask.
    ///
    /// The first mask is adopted as is; every later one is intersected into
    /// the fixed output path, which then feeds the next intersection.
    pub fn update(
        &mut self,
        engine: &dyn ImageEngine,
        mask: &Utf8Path,
        working_dir: &Utf8Path,
    ) -> Result<(), MetaError> {
        match &self.current {
            None => {
                self.current = Some(mask.to_path_buf());
            }
            Some(current) => {
                engine.run(
                    &Operation::Minimum {
                        input: mask.to_path_buf(),
                        other: current.clone(),
                        output: self.output.clone(),
                    },
                    working_dir,
                )?;
                self.current = Some(self.output.clone());
            }
        }
        self.studies += 1;
        Ok(())
    }

    /// Binarize the group mask at `threshold` into the fixed output path.
    pub fn finalize(
        self,
        engine: &dyn ImageEngine,
        threshold: f64,
        working_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, MetaError> {
        let current = self.current.ok_or(MetaError::EmptyAnalysis)?;
        engine.run(
            &Operation::Binarize {
                input: current,
                threshold,
                output: self.output.clone(),
            },
            working_dir,
        )?;
        Ok(self.output)
    }
}
