//! Second phase of the analysis: impose study order and stack the maps.
//!
//! Slice `i` of the merged effect volume and slice `i` of the merged variance
//! volume must describe the same study. Both indices are sorted on their own
//! by ascending study id and their key sets are checked before anything is
//! written.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::accumulator::StudyIndex;
use crate::domain::StudyId;
use crate::engine::{ImageEngine, Operation};
use crate::error::MetaError;

pub const MERGED_EFFECTS_NAME: &str = "copes.nii.gz";
pub const MERGED_VARIANCES_NAME: &str = "varcopes.nii.gz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub studies: Vec<StudyId>,
    pub effects: Vec<Utf8PathBuf>,
    pub variances: Vec<Utf8PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedVolumes {
    pub effects: Utf8PathBuf,
    pub variances: Utf8PathBuf,
    pub studies: Vec<StudyId>,
}

fn ordered(index: &StudyIndex) -> Vec<(&StudyId, &Utf8PathBuf)> {
    let mut entries: Vec<_> = index.iter().collect();
    entries.sort_by(|left, right| left.0.cmp(right.0));
    entries
}

pub fn plan_merge(effects: &StudyIndex, variances: &StudyIndex) -> Result<MergePlan, MetaError> {
    let effect_keys: BTreeSet<&StudyId> = effects.keys().collect();
    let variance_keys: BTreeSet<&StudyId> = variances.keys().collect();
    if effect_keys != variance_keys {
        return Err(MetaError::IndexMismatch {
            effects_only: effect_keys
                .difference(&variance_keys)
                .map(|id| id.to_string())
                .collect(),
            variances_only: variance_keys
                .difference(&effect_keys)
                .map(|id| id.to_string())
                .collect(),
        });
    }
    if effect_keys.is_empty() {
        return Err(MetaError::EmptyAnalysis);
    }

    let effects = ordered(effects);
    let variances = ordered(variances);
    Ok(MergePlan {
        studies: effects.iter().map(|(id, _)| (*id).clone()).collect(),
        effects: effects.into_iter().map(|(_, path)| path.clone()).collect(),
        variances: variances.into_iter().map(|(_, path)| path.clone()).collect(),
    })
}

#[derive(Debug, Clone)]
pub struct StackMerger {
    effects_output: Utf8PathBuf,
    variances_output: Utf8PathBuf,
}

impl StackMerger {
    pub fn new(work_dir: &Utf8Path) -> Self {
        Self {
            effects_output: work_dir.join(MERGED_EFFECTS_NAME),
            variances_output: work_dir.join(MERGED_VARIANCES_NAME),
        }
    }

    pub fn merge(
        &self,
        engine: &dyn ImageEngine,
        plan: MergePlan,
        working_dir: &Utf8Path,
    ) -> Result<MergedVolumes, MetaError> {
        engine.run(
            &Operation::Merge {
                inputs: plan.effects,
                output: self.effects_output.clone(),
            },
            working_dir,
        )?;
        engine.run(
            &Operation::Merge {
                inputs: plan.variances,
                output: self.variances_output.clone(),
            },
            working_dir,
        )?;
        Ok(MergedVolumes {
            effects: self.effects_output.clone(),
            variances: self.variances_output.clone(),
            studies: plan.studies,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn index(entries: &[(&str, &str)]) -> StudyIndex {
        entries
            .iter()
            .map(|(id, path)| (id.parse().unwrap(), Utf8PathBuf::from(*path)))
            .collect()
    }

    #[test]
    fn mismatched_keys_are_reported() {
        let effects = index(&[("s1", "e1"), ("s2", "e2")]);
        let variances = index(&[("s1", "v1"), ("s3", "v3")]);
        let err = plan_merge(&effects, &variances).unwrap_err();
        assert_matches!(
            err,
            MetaError::IndexMismatch { effects_only, variances_only }
                if effects_only == vec!["s2"] && variances_only == vec!["s3"]
        );
    }

    #[test]
    fn empty_indices_cannot_be_merged() {
        let err = plan_merge(&StudyIndex::new(), &StudyIndex::new()).unwrap_err();
        assert_matches!(err, MetaError::EmptyAnalysis);
    }
}
