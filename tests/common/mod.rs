#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use nidm_ibma::config::{Config, ConfigLoader, ResolvedConfig};
use nidm_ibma::domain::{FSL_TOOLCHAIN, SPM_TOOLCHAIN};
use nidm_ibma::engine::{ImageEngine, Operation};
use nidm_ibma::error::MetaError;
use nidm_ibma::provenance::ProvenanceQuery;

/// Write an executable shell script, creating its parent directory.
#[cfg(unix)]
pub fn write_script(path: &Utf8Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

pub fn write_volume(path: &Utf8Path, values: &[f64]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, render(values)).unwrap();
}

pub fn read_volume(path: &Utf8Path) -> Vec<f64> {
    parse(&fs::read_to_string(path).unwrap())
}

/// One row per stacked volume, in stack order.
pub fn read_stack(path: &Utf8Path) -> Vec<Vec<f64>> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(parse)
        .collect()
}

fn render(values: &[f64]) -> String {
    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse(content: &str) -> Vec<f64> {
    content
        .split_whitespace()
        .map(|value| value.parse().unwrap())
        .collect()
}

/// In-process stand-in for FSL over whitespace-separated voxel files.
///
/// Reslicing keeps values unchanged: every fixture already shares one grid.
#[derive(Default)]
pub struct VoxelEngine {
    operations: Mutex<Vec<Operation>>,
    fail_on: Option<&'static str>,
}

impl VoxelEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(operation: &'static str) -> Self {
        Self {
            operations: Mutex::new(Vec::new()),
            fail_on: Some(operation),
        }
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().unwrap().clone()
    }

    fn apply(&self, operation: &Operation) -> Result<(), String> {
        match operation {
            Operation::Reslice { input, output, .. } => {
                write_volume(output, &try_read(input)?);
            }
            Operation::Divide {
                input,
                divisor,
                output,
            } => {
                let values = try_read(input)?;
                write_volume(output, &values.iter().map(|v| v / divisor).collect::<Vec<_>>());
            }
            Operation::Square { input, output } => {
                let values = try_read(input)?;
                write_volume(output, &values.iter().map(|v| v * v).collect::<Vec<_>>());
            }
            Operation::Minimum {
                input,
                other,
                output,
            } => {
                let left = try_read(input)?;
                let right = try_read(other)?;
                if left.len() != right.len() {
                    return Err("volumes differ in size".to_string());
                }
                let values: Vec<f64> = left.iter().zip(&right).map(|(a, b)| a.min(*b)).collect();
                write_volume(output, &values);
            }
            Operation::Binarize {
                input,
                threshold,
                output,
            } => {
                let values = try_read(input)?;
                let binary: Vec<f64> = values
                    .iter()
                    .map(|v| if *v >= *threshold && *v != 0.0 { 1.0 } else { 0.0 })
                    .collect();
                write_volume(output, &binary);
            }
            Operation::Merge { inputs, output } => {
                let mut lines = Vec::new();
                for input in inputs {
                    lines.push(render(&try_read(input)?));
                }
                fs::write(output, lines.join("\n")).map_err(|err| err.to_string())?;
            }
            Operation::MixedEffects(spec) => {
                fs::create_dir_all(&spec.log_dir).map_err(|err| err.to_string())?;
                for input in [&spec.effects, &spec.variances, &spec.mask] {
                    if !input.exists() {
                        return Err(format!("missing input {input}"));
                    }
                }
                fs::write(spec.log_dir.join("zstat1"), "").map_err(|err| err.to_string())?;
            }
        }
        Ok(())
    }
}

fn try_read(path: &Utf8Path) -> Result<Vec<f64>, String> {
    fs::read_to_string(path)
        .map(|content| parse(&content))
        .map_err(|err| format!("{path}: {err}"))
}

impl ImageEngine for VoxelEngine {
    fn run(&self, operation: &Operation, working_dir: &Utf8Path) -> Result<(), MetaError> {
        assert!(working_dir.is_absolute(), "relative working dir {working_dir}");
        self.operations.lock().unwrap().push(operation.clone());
        if self.fail_on == Some(operation.name()) {
            return Err(MetaError::EngineFailure {
                operation: operation.name().to_string(),
                message: "exit status: 1".to_string(),
            });
        }
        self.apply(operation)
            .map_err(|message| MetaError::EngineFailure {
                operation: operation.name().to_string(),
                message,
            })
    }
}

/// Canned query results keyed by the extracted study directory name.
#[derive(Default)]
pub struct MockQuery {
    rows: HashMap<String, Vec<HashMap<String, String>>>,
}

impl MockQuery {
    pub fn insert(&mut self, study: &str, rows: Vec<HashMap<String, String>>) {
        self.rows.insert(study.to_string(), rows);
    }
}

impl ProvenanceQuery for MockQuery {
    fn select(
        &self,
        document: &Utf8Path,
        _query: &str,
    ) -> Result<Vec<HashMap<String, String>>, MetaError> {
        let study = document
            .parent()
            .and_then(|dir| dir.file_name())
            .unwrap_or_default();
        Ok(self.rows.get(study).cloned().unwrap_or_default())
    }
}

pub fn row(contrast: &str, con: &str, std: &str, mask: &str, software: &str) -> HashMap<String, String> {
    [
        ("contrastName", contrast),
        ("con_file", con),
        ("std_file", std),
        ("mask_file", mask),
        ("software", software),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect()
}

pub struct StudyMaps<'a> {
    pub effect: &'a [f64],
    pub stderr: &'a [f64],
    pub mask: &'a [f64],
}

/// A data dir of study archives, a work dir and a design dir in one tempdir.
pub struct Workspace {
    _temp: TempDir,
    pub root: Utf8PathBuf,
    pub query: MockQuery,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("data")).unwrap();
        let design = root.join("design");
        fs::create_dir_all(&design).unwrap();
        for ext in ["mat", "grp", "con"] {
            fs::write(design.join(format!("simple_meta_analysis.{ext}")), "").unwrap();
        }
        Self {
            _temp: temp,
            root,
            query: MockQuery::default(),
        }
    }

    pub fn data_dir(&self) -> Utf8PathBuf {
        self.root.join("data")
    }

    pub fn work_dir(&self) -> Utf8PathBuf {
        self.root.join("work")
    }

    pub fn config(&self) -> ResolvedConfig {
        ConfigLoader::resolve_config(
            Config {
                data_dir: Some(self.data_dir()),
                work_dir: Some(self.work_dir()),
                design_dir: Some(self.root.join("design")),
                ..Config::default()
            },
            Some(Utf8PathBuf::from("/opt/fsl")),
        )
        .unwrap()
    }

    /// Write `<id>.nidm.zip` with a provenance document and the three maps.
    pub fn add_archive(&self, id: &str, maps: &StudyMaps<'_>) {
        let path = self.data_dir().join(format!("{id}.nidm.zip"));
        let file = fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        let entries = [
            ("nidm.ttl", "@prefix prov: <http://www.w3.org/ns/prov#> .\n".to_string()),
            ("Contrast.nii.gz", render(maps.effect)),
            ("ContrastStandardError.nii.gz", render(maps.stderr)),
            ("Mask.nii.gz", render(maps.mask)),
        ];
        for (name, content) in entries {
            writer.start_file(name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    pub fn add_spm_study(&mut self, id: &str, maps: &StudyMaps<'_>) {
        self.add_archive(id, maps);
        self.query.insert(
            id,
            vec![row(
                "pain",
                "Contrast.nii.gz",
                "ContrastStandardError.nii.gz",
                "Mask.nii.gz",
                SPM_TOOLCHAIN,
            )],
        );
    }

    pub fn add_fsl_study(&mut self, id: &str, maps: &StudyMaps<'_>) {
        self.add_archive(id, maps);
        self.query.insert(
            id,
            vec![row(
                "pain",
                "Contrast.nii.gz",
                "ContrastStandardError.nii.gz",
                "file://./Mask.nii.gz",
                FSL_TOOLCHAIN,
            )],
        );
    }
}
