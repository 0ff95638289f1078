use std::io::{self, Write};

use serde::Serialize;

use crate::engine::ToolStatus;
use crate::pipeline::{ProgressEvent, ProgressSink, RunSummary, SkipReason, StudyOutcome};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_tools(tools: &[ToolStatus]) -> io::Result<()> {
        Self::print_json(&tools)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn render_summary(summary: &RunSummary) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "contrast '{}': {} of {} studies included\n",
            summary.contrast,
            summary.included().count(),
            summary.studies.len()
        ));
        for report in &summary.studies {
            let line = match &report.outcome {
                StudyOutcome::Included { toolchain, .. } => format!("included ({toolchain})"),
                StudyOutcome::Skipped {
                    reason: SkipReason::NoArtifacts,
                } => "skipped: query returned no results".to_string(),
                StudyOutcome::Skipped {
                    reason: SkipReason::NoMatchingContrast { contrasts },
                } => format!("skipped: only contrasts {}", contrasts.join(", ")),
            };
            out.push_str(&format!("  {:<24} {line}\n", report.study.as_str()));
        }
        out.push_str(&format!("group mask: {}\n", summary.group_mask));
        out.push_str(&format!("effects:    {}\n", summary.merged.effects));
        out.push_str(&format!("variances:  {}\n", summary.merged.variances));
        out.push_str(&format!("stats:      {}\n", summary.stats_dir));
        for invocation in &summary.planned {
            out.push_str(&format!("would run: {invocation}\n"));
        }
        out
    }

    pub fn render_tools(tools: &[ToolStatus]) -> String {
        tools
            .iter()
            .map(|tool| match &tool.path {
                Some(path) => format!("{:<10} {path}\n", tool.name),
                None => format!("{:<10} missing\n", tool.name),
            })
            .collect()
    }
}
