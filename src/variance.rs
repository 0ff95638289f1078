use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::StudyId;
use crate::engine::{ImageEngine, Operation};
use crate::error::MetaError;

/// Path of the variance map derived for `study`.
pub fn variance_path(work_dir: &Utf8Path, study: &StudyId) -> Utf8PathBuf {
    work_dir.join(format!("{study}_varcope"))
}

/// Square a harmonized standard error map into a variance map.
pub fn derive_variance(
    engine: &dyn ImageEngine,
    stderr: &Utf8Path,
    output: &Utf8Path,
    working_dir: &Utf8Path,
) -> Result<Utf8PathBuf, MetaError> {
    engine.run(
        &Operation::Square {
            input: stderr.to_path_buf(),
            output: output.to_path_buf(),
        },
        working_dir,
    )?;
    Ok(output.to_path_buf())
}
