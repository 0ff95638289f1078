use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::archive::{DEFAULT_ARCHIVE_SUFFIX, DEFAULT_PROVENANCE_DOCUMENT};
use crate::error::MetaError;
use crate::group_model::DEFAULT_RUN_MODE;
use crate::mask::DEFAULT_MASK_THRESHOLD;
use crate::normalize::DEFAULT_RESCALE_DIVISOR;

pub const DEFAULT_CONFIG_FILE: &str = "nidm-ibma.json";
pub const DEFAULT_CONTRAST: &str = "pain";
pub const DEFAULT_DESIGN_NAME: &str = "simple_meta_analysis";
pub const DEFAULT_QUERY_PROGRAM: &str = "arq";
const TEMPLATE_IN_FSLDIR: &str = "data/standard/MNI152_T1_2mm";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub work_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub extract_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub design_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub design_name: Option<String>,
    #[serde(default)]
    pub contrast: Option<String>,
    #[serde(default)]
    pub archive_suffix: Option<String>,
    #[serde(default)]
    pub provenance_document: Option<String>,
    #[serde(default)]
    pub template: Option<Utf8PathBuf>,
    #[serde(default)]
    pub fsl_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub rescale_divisor: Option<f64>,
    #[serde(default)]
    pub mask_threshold: Option<f64>,
    #[serde(default)]
    pub run_mode: Option<String>,
    #[serde(default)]
    pub query_program: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_dir: Utf8PathBuf,
    pub work_dir: Utf8PathBuf,
    pub extract_dir: Utf8PathBuf,
    pub design_dir: Utf8PathBuf,
    pub design_name: String,
    pub contrast: String,
    pub archive_suffix: String,
    pub provenance_document: String,
    pub template: Option<Utf8PathBuf>,
    pub fsl_dir: Option<Utf8PathBuf>,
    pub rescale_divisor: f64,
    pub mask_threshold: f64,
    pub run_mode: String,
    pub query_program: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the config file if one exists. An explicit path must exist; the
    /// default file is optional.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MetaError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default(), fsl_dir_from_env());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| MetaError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| MetaError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config, fsl_dir_from_env())
    }

    pub fn resolve_config(
        config: Config,
        env_fsl_dir: Option<Utf8PathBuf>,
    ) -> Result<ResolvedConfig, MetaError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(MetaError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let rescale_divisor = config.rescale_divisor.unwrap_or(DEFAULT_RESCALE_DIVISOR);
        if !rescale_divisor.is_finite() || rescale_divisor == 0.0 {
            return Err(MetaError::InvalidConfig(format!(
                "rescale_divisor must be finite and non-zero, got {rescale_divisor}"
            )));
        }
        let mask_threshold = config.mask_threshold.unwrap_or(DEFAULT_MASK_THRESHOLD);
        if !(0.0..=1.0).contains(&mask_threshold) {
            return Err(MetaError::InvalidConfig(format!(
                "mask_threshold must lie in [0, 1], got {mask_threshold}"
            )));
        }

        let work_dir = config.work_dir.unwrap_or_else(|| Utf8PathBuf::from("work"));
        let extract_dir = config
            .extract_dir
            .unwrap_or_else(|| work_dir.join("studies"));
        let fsl_dir = config.fsl_dir.or(env_fsl_dir);
        let template = config
            .template
            .or_else(|| fsl_dir.as_ref().map(|dir| dir.join(TEMPLATE_IN_FSLDIR)));

        Ok(ResolvedConfig {
            schema_version,
            data_dir: config
                .data_dir
                .unwrap_or_else(|| Utf8PathBuf::from("data/pain")),
            work_dir,
            extract_dir,
            design_dir: config
                .design_dir
                .unwrap_or_else(|| Utf8PathBuf::from("fsl_design")),
            design_name: config
                .design_name
                .unwrap_or_else(|| DEFAULT_DESIGN_NAME.to_string()),
            contrast: config
                .contrast
                .unwrap_or_else(|| DEFAULT_CONTRAST.to_string()),
            archive_suffix: config
                .archive_suffix
                .unwrap_or_else(|| DEFAULT_ARCHIVE_SUFFIX.to_string()),
            provenance_document: config
                .provenance_document
                .unwrap_or_else(|| DEFAULT_PROVENANCE_DOCUMENT.to_string()),
            template,
            fsl_dir,
            rescale_divisor,
            mask_threshold,
            run_mode: config
                .run_mode
                .unwrap_or_else(|| DEFAULT_RUN_MODE.to_string()),
            query_program: config
                .query_program
                .unwrap_or_else(|| DEFAULT_QUERY_PROGRAM.to_string()),
        })
    }
}

fn fsl_dir_from_env() -> Option<Utf8PathBuf> {
    std::env::var("FSLDIR")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(Utf8PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_fsldir() {
        let resolved =
            ConfigLoader::resolve_config(Config::default(), Some(Utf8PathBuf::from("/opt/fsl")))
                .unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.contrast, "pain");
        assert_eq!(resolved.extract_dir, Utf8PathBuf::from("work/studies"));
        assert_eq!(
            resolved.template,
            Some(Utf8PathBuf::from("/opt/fsl/data/standard/MNI152_T1_2mm"))
        );
        assert_eq!(resolved.rescale_divisor, 100.0);
        assert_eq!(resolved.mask_threshold, 0.9);
    }
}
