//! Discovery and extraction of per-study NIDM-Results packs.

use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use zip::ZipArchive;

use crate::domain::StudyId;
use crate::error::MetaError;

pub const DEFAULT_ARCHIVE_SUFFIX: &str = ".nidm.zip";
pub const DEFAULT_PROVENANCE_DOCUMENT: &str = "nidm.ttl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyArchive {
    pub id: StudyId,
    pub path: Utf8PathBuf,
}

/// An extracted pack and the provenance document inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedStudy {
    pub id: StudyId,
    pub dir: Utf8PathBuf,
    pub document: Utf8PathBuf,
}

/// List `<studyId><suffix>` archives in `data_dir`, ordered by file name.
pub fn discover(data_dir: &Utf8Path, suffix: &str) -> Result<Vec<StudyArchive>, MetaError> {
    if !data_dir.as_std_path().is_dir() {
        return Err(MetaError::MissingDataDir(data_dir.to_string()));
    }
    let pattern = Regex::new(&format!("^(?P<id>.+){}$", regex::escape(suffix)))
        .map_err(|err| MetaError::InvalidConfig(err.to_string()))?;

    let mut archives = Vec::new();
    let entries = data_dir
        .read_dir_utf8()
        .map_err(|err| MetaError::Filesystem(format!("read {data_dir}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| MetaError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if !path.as_std_path().is_file() {
            continue;
        }
        let Some(captures) = pattern.captures(entry.file_name()) else {
            continue;
        };
        let id: StudyId = captures["id"]
            .parse()
            .map_err(|_| MetaError::InvalidArchiveName(entry.file_name().to_string()))?;
        archives.push(StudyArchive {
            id,
            path: path.to_path_buf(),
        });
    }
    archives.sort_by(|left, right| left.path.cmp(&right.path));
    Ok(archives)
}

/// Extract `archive` into `<extract_root>/<studyId>`, replacing any previous
/// extraction, and check that the provenance document is present.
pub fn extract_study(
    archive: &StudyArchive,
    extract_root: &Utf8Path,
    document_name: &str,
) -> Result<ExtractedStudy, MetaError> {
    fs::create_dir_all(extract_root.as_std_path())
        .map_err(|err| MetaError::Filesystem(err.to_string()))?;

    let staging = tempfile::Builder::new()
        .prefix("nidm-ibma-extract")
        .tempdir_in(extract_root.as_std_path())
        .map_err(|err| MetaError::Filesystem(err.to_string()))?;
    extract_zip(archive.path.as_std_path(), staging.path())?;

    let dir = extract_root.join(archive.id.as_str());
    atomic_rename_dir(staging.path(), dir.as_std_path())
        .map_err(|err| MetaError::Filesystem(format!("install {dir}: {err}")))?;

    let document = dir.join(document_name);
    if !document.as_std_path().is_file() {
        return Err(MetaError::MissingProvenance(document.to_string()));
    }
    Ok(ExtractedStudy {
        id: archive.id.clone(),
        dir,
        document,
    })
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), MetaError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| MetaError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| MetaError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| MetaError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(MetaError::Filesystem(format!(
                    "zip entry path traversal detected in {}",
                    zip_path.display()
                )));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| MetaError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| MetaError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| MetaError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| MetaError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}
