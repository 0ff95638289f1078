use std::fs;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::accumulator::StudyAccumulator;
use crate::archive::{self, StudyArchive};
use crate::config::ResolvedConfig;
use crate::domain::{StudyId, ToolchainKind};
use crate::engine::{ImageEngine, Invocation};
use crate::error::MetaError;
use crate::group_model::{DesignFiles, GroupModel};
use crate::mask::MaskAggregator;
use crate::merge::{MergedVolumes, StackMerger};
use crate::normalize::{HarmonizedTriple, Normalizer, StudyContext};
use crate::provenance::{ArtifactResolver, ProvenanceQuery};
use crate::variance::{derive_variance, variance_path};

pub const SUMMARY_FILE: &str = "run-summary.json";

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    NoArtifacts,
    NoMatchingContrast { contrasts: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StudyOutcome {
    Included {
        toolchain: String,
        harmonized: HarmonizedTriple,
        variance: Utf8PathBuf,
    },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, Serialize)]
pub struct StudyReport {
    pub study: StudyId,
    pub archive: Utf8PathBuf,
    pub outcome: StudyOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub tool: String,
    pub started_at: String,
    pub finished_at: String,
    pub contrast: String,
    pub work_dir: Utf8PathBuf,
    pub studies: Vec<StudyReport>,
    pub group_mask: Utf8PathBuf,
    pub merged: MergedVolumes,
    pub stats_dir: Utf8PathBuf,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<Invocation>,
}

impl RunSummary {
    pub fn included(&self) -> impl Iterator<Item = &StudyReport> {
        self.studies
            .iter()
            .filter(|report| matches!(report.outcome, StudyOutcome::Included { .. }))
    }
}

/// Resolved directories of one run, all absolute.
#[derive(Debug, Clone)]
struct RunLayout {
    data_dir: Utf8PathBuf,
    work_dir: Utf8PathBuf,
    extract_dir: Utf8PathBuf,
}

pub struct MetaAnalysis<Q: ProvenanceQuery, E: ImageEngine> {
    config: ResolvedConfig,
    resolver: ArtifactResolver<Q>,
    engine: E,
}

impl<Q: ProvenanceQuery, E: ImageEngine> MetaAnalysis<Q, E> {
    pub fn new(config: ResolvedConfig, query: Q, engine: E) -> Self {
        Self {
            config,
            resolver: ArtifactResolver::new(query),
            engine,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Harmonize every study, then merge and fit the group model.
    ///
    /// Any fatal error aborts the run at once; nothing is merged from a
    /// partial study loop.
    pub fn run(&self, sink: &dyn ProgressSink) -> Result<RunSummary, MetaError> {
        let started_at = iso_timestamp();
        let layout = RunLayout {
            data_dir: absolutize(&self.config.data_dir)?,
            work_dir: absolutize(&self.config.work_dir)?,
            extract_dir: absolutize(&self.config.extract_dir)?,
        };
        let design = DesignFiles::in_dir(
            &absolutize(&self.config.design_dir)?,
            &self.config.design_name,
        );
        design.verify()?;
        let template = self
            .config
            .template
            .as_deref()
            .map(absolutize)
            .transpose()?;
        let normalizer = Normalizer::new(template, self.config.rescale_divisor);
        let group_model = GroupModel::new(design, self.config.run_mode.clone());

        fs::create_dir_all(layout.work_dir.as_std_path())
            .map_err(|err| MetaError::Filesystem(format!("create {}: {err}", layout.work_dir)))?;

        let archives = archive::discover(&layout.data_dir, &self.config.archive_suffix)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Discover; {} archives in {}",
                archives.len(),
                layout.data_dir
            ),
            elapsed: None,
        });
        tracing::info!(count = archives.len(), dir = %layout.data_dir, "discovered study archives");

        let mut masks = MaskAggregator::new(&layout.work_dir);
        let mut accumulator = StudyAccumulator::new();
        let mut reports = Vec::with_capacity(archives.len());

        for study in &archives {
            let start = Instant::now();
            let outcome = self
                .process_study(
                    study,
                    &layout,
                    &normalizer,
                    &mut masks,
                    &mut accumulator,
                    sink,
                )
                .map_err(|err| err.in_study(study.id.as_str()))?;
            sink.event(ProgressEvent {
                message: format!("phase=Study; {} done", study.id),
                elapsed: Some(start.elapsed()),
            });
            reports.push(StudyReport {
                study: study.id.clone(),
                archive: study.path.clone(),
                outcome,
            });
        }

        sink.event(ProgressEvent {
            message: format!("phase=Mask; binarizing intersection of {} masks", masks.studies()),
            elapsed: None,
        });
        let group_mask = masks.finalize(&self.engine, self.config.mask_threshold, &layout.work_dir)?;

        sink.event(ProgressEvent {
            message: format!("phase=Merge; stacking {} studies", accumulator.len()),
            elapsed: None,
        });
        let plan = accumulator.into_merge_plan()?;
        let merged = StackMerger::new(&layout.work_dir).merge(&self.engine, plan, &layout.work_dir)?;
        tracing::info!(
            order = ?merged.studies.iter().map(StudyId::as_str).collect::<Vec<_>>(),
            "merged study maps"
        );

        sink.event(ProgressEvent {
            message: format!("phase=Model; {} {}", crate::engine::FLAMEO, self.config.run_mode),
            elapsed: None,
        });
        let start = Instant::now();
        let stats_dir = group_model.estimate(&self.engine, &merged, &group_mask, &layout.work_dir)?;
        sink.event(ProgressEvent {
            message: format!("phase=Model; results in {stats_dir}"),
            elapsed: Some(start.elapsed()),
        });

        Ok(RunSummary {
            tool: format!("nidm-ibma/{}", env!("CARGO_PKG_VERSION")),
            started_at,
            finished_at: iso_timestamp(),
            contrast: self.config.contrast.clone(),
            work_dir: layout.work_dir,
            studies: reports,
            group_mask,
            merged,
            stats_dir,
            planned: Vec::new(),
        })
    }

    fn process_study(
        &self,
        study: &StudyArchive,
        layout: &RunLayout,
        normalizer: &Normalizer,
        masks: &mut MaskAggregator,
        accumulator: &mut StudyAccumulator,
        sink: &dyn ProgressSink,
    ) -> Result<StudyOutcome, MetaError> {
        sink.event(ProgressEvent {
            message: format!("phase=Extract; study {}", study.id),
            elapsed: None,
        });
        let extracted = archive::extract_study(
            study,
            &layout.extract_dir,
            &self.config.provenance_document,
        )?;

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; querying {}", extracted.document),
            elapsed: None,
        });
        let records = self.resolver.resolve(&extracted.document)?;
        if records.is_empty() {
            tracing::warn!(study = %study.id, "query returned no results; study skipped");
            return Ok(StudyOutcome::Skipped {
                reason: SkipReason::NoArtifacts,
            });
        }

        let mut ignored = Vec::new();
        let mut outcome = None;
        for record in records {
            if record.contrast_name != self.config.contrast {
                tracing::info!(study = %study.id, contrast = %record.contrast_name, "ignoring contrast");
                ignored.push(record.contrast_name);
                continue;
            }
            if accumulator.contains(&study.id) {
                return Err(MetaError::DuplicateStudy(study.id.to_string()));
            }

            let kind = ToolchainKind::classify(&record.toolchain_id);
            tracing::info!(study = %study.id, toolchain = %kind, "harmonizing");
            sink.event(ProgressEvent {
                message: format!("phase=Harmonize; study {} analyzed with {kind}", study.id),
                elapsed: None,
            });
            let harmonized = normalizer.harmonize(
                &self.engine,
                &kind,
                &record,
                StudyContext {
                    id: &study.id,
                    study_dir: &extracted.dir,
                    work_dir: &layout.work_dir,
                },
            )?;

            let variance = derive_variance(
                &self.engine,
                &harmonized.stderr,
                &variance_path(&layout.work_dir, &study.id),
                &layout.work_dir,
            )?;
            masks.update(&self.engine, &harmonized.mask, &layout.work_dir)?;
            accumulator.record(study.id.clone(), &harmonized.effect, &variance)?;

            outcome = Some(StudyOutcome::Included {
                toolchain: kind.label().to_string(),
                harmonized,
                variance,
            });
        }

        Ok(outcome.unwrap_or_else(|| {
            tracing::warn!(study = %study.id, contrast = %self.config.contrast, "no matching contrast; study skipped");
            StudyOutcome::Skipped {
                reason: SkipReason::NoMatchingContrast { contrasts: ignored },
            }
        }))
    }
}

/// Write the summary next to the run outputs, replacing any previous one.
pub fn write_summary(work_dir: &Utf8Path, summary: &RunSummary) -> Result<Utf8PathBuf, MetaError> {
    let path = work_dir.join(SUMMARY_FILE);
    let tmp_path = path.with_extension("json.tmp");
    let content = serde_json::to_vec_pretty(summary)
        .map_err(|err| MetaError::Filesystem(err.to_string()))?;
    fs::write(tmp_path.as_std_path(), &content)
        .map_err(|err| MetaError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| MetaError::Filesystem(err.to_string()))?;
    Ok(path)
}

fn absolutize(path: &Utf8Path) -> Result<Utf8PathBuf, MetaError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|err| MetaError::Filesystem(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd)
        .map(|cwd| cwd.join(path))
        .map_err(|_| MetaError::Filesystem("non-utf8 working directory".to_string()))
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
