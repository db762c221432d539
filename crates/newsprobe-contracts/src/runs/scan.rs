use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context;
use indexmap::IndexMap;

use super::stats::ReplyMeans;
use super::summary::{read_summary, RunSummary};
use super::SUMMARY_FILE;

const RULE_WIDTH: usize = 136;

/// One run folder and what could be read from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanLine {
    pub run: String,
    pub outcome: Result<RunSummary, String>,
}

/// Six-character tag for a dialog id: `ask_share_strict` -> `ask_ss`,
/// `intro_profile` -> `int_pr`, `context` -> `con___`.
pub fn abbreviate(dialog_id: &str) -> String {
    let mut parts = dialog_id.split('_').filter(|part| !part.is_empty());
    let head = parts
        .next()
        .map(|part| part.chars().take(3).collect::<String>())
        .unwrap_or_default();
    let rest = parts.collect::<Vec<&str>>();
    let tail = match rest.as_slice() {
        [] => String::new(),
        [only] => only.chars().take(2).collect(),
        many => many
            .iter()
            .take(2)
            .filter_map(|part| part.chars().next())
            .collect(),
    };
    format!("{head:_<3}_{tail:_<2}")
}

/// Reads the summary of every run folder under `results_dir`, oldest first,
/// starting at `since` when that run exists.
pub fn scan_runs(results_dir: &Path, since: Option<&str>) -> anyhow::Result<Vec<ScanLine>> {
    let mut runs = std::fs::read_dir(results_dir)
        .with_context(|| format!("failed listing {}", results_dir.display()))?
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect::<Vec<String>>();
    runs.sort();

    if let Some(since) = since {
        if let Some(start) = runs.iter().position(|run| run == since) {
            runs.drain(..start);
        }
    }

    Ok(runs
        .into_iter()
        .map(|run| {
            let path = results_dir.join(&run).join(SUMMARY_FILE);
            let outcome = if path.is_file() {
                read_summary(&path).map_err(|err| format!("{err:#}"))
            } else {
                Err(format!("no {SUMMARY_FILE}"))
            };
            ScanLine { run, outcome }
        })
        .collect())
}

fn format_means(means: Option<ReplyMeans>) -> String {
    match means {
        Some(means) => format!("{:<5.3} {:<5.3} {:<5.3}", means.yes, means.no, means.unknown),
        None => format!("{:<5} {:<5} {:<5}", "-", "-", "-"),
    }
}

fn dialog_tags(ids: &[String], legend: &mut IndexMap<String, String>) -> String {
    ids.iter()
        .map(|id| {
            let tag = abbreviate(id);
            legend.entry(id.clone()).or_insert_with(|| tag.clone());
            tag
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn render_scan(lines: &[ScanLine]) -> String {
    let mut legend = IndexMap::new();
    let mut body = String::new();
    for line in lines {
        match &line.outcome {
            Ok(summary) => {
                let mut model = summary.model.clone();
                if model.chars().count() > 30 {
                    model = format!("{}...", model.chars().take(30).collect::<String>());
                }
                let pre = dialog_tags(&summary.dialogs_pre, &mut legend);
                let post = dialog_tags(&summary.dialogs_post, &mut legend);
                let _ = writeln!(
                    body,
                    "{}  {:<12} {:<33} {:<22} {:<17} {}  {}",
                    line.run,
                    summary.experiment,
                    model,
                    pre,
                    post,
                    format_means(summary.with_image),
                    format_means(summary.without_image)
                );
            }
            Err(reason) => {
                let _ = writeln!(body, "{}  {reason}", line.run);
            }
        }
    }

    let rule = "_".repeat(RULE_WIDTH);
    let mut out = String::new();
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "shortcuts:");
    for (id, tag) in &legend {
        let _ = writeln!(out, "{id:<25}: {tag}");
    }
    let _ = writeln!(out, "{rule}\n");
    let _ = writeln!(
        out,
        "{:<19}{:<13}{:<34}{:<23}{:<18}YES+i NO+i  UN+i   YES-i NO-i  UN-i",
        "     result", "experiment", "model", "dialogs_pre", "dialogs_post"
    );
    let _ = writeln!(out, "{rule}");
    out.push_str(&body);
    let _ = writeln!(out, "{rule}");
    out
}
