use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::StudyId;
use crate::error::MetaError;
use crate::merge::{MergePlan, plan_merge};

/// Artifact path per study. Iteration order carries no meaning.
pub type StudyIndex = HashMap<StudyId, Utf8PathBuf>;

/// Effect and variance maps of every study that made it through harmonization.
#[derive(Debug, Default)]
pub struct StudyAccumulator {
    effects: StudyIndex,
    variances: StudyIndex,
}

impl StudyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        study: StudyId,
        effect: &Utf8Path,
        variance: &Utf8Path,
    ) -> Result<(), MetaError> {
        if self.effects.contains_key(&study) || self.variances.contains_key(&study) {
            return Err(MetaError::DuplicateStudy(study.to_string()));
        }
        self.effects.insert(study.clone(), effect.to_path_buf());
        self.variances.insert(study, variance.to_path_buf());
        Ok(())
    }

    pub fn contains(&self, study: &StudyId) -> bool {
        self.effects.contains_key(study)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn effects(&self) -> &StudyIndex {
        &self.effects
    }

    pub fn variances(&self) -> &StudyIndex {
        &self.variances
    }

    /// Close the accumulation phase and fix the study order of the stacks.
    pub fn into_merge_plan(self) -> Result<MergePlan, MetaError> {
        plan_merge(&self.effects, &self.variances)
    }
}
