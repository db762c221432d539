use std::cmp::Ordering;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::results::ExecutionResult;
use crate::classify::ClassificationArrays;
use crate::config::Experiment;

pub const SUMMARY_LABEL: &str = "mean [std]";

#[derive(Debug, Clone, PartialEq)]
pub struct StatsRow {
    pub news_id: String,
    /// One yes-fraction per column; `None` when the item has no samples.
    pub values: Vec<Option<f64>>,
}

/// Yes-fraction per news item and image condition, plus the column means.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsTable {
    pub header: Vec<String>,
    pub rows: Vec<StatsRow>,
    pub summary: Vec<(f64, f64)>,
}

/// Mean share of each reply class across the news items of one condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyMeans {
    pub yes: f64,
    pub no: f64,
    pub unknown: f64,
}

fn columns(experiment: Experiment) -> Vec<(&'static str, bool)> {
    match experiment {
        Experiment::Both => vec![("YES (img+txt)", true), ("YES (txt)", false)],
        Experiment::NewsImage => vec![("Fraction of YES", true)],
        Experiment::NewsNoimage => vec![("Fraction of YES", false)],
    }
}

/// Numeric ids sort by value and ahead of textual ones.
fn compare_ids(left: &str, right: &str) -> Ordering {
    match (left.parse::<i64>(), right.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => left.cmp(right),
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

impl StatsTable {
    pub fn compute(result: &ExecutionResult) -> Self {
        let columns = columns(result.experiment);
        let mut ids = result.per_news.keys().cloned().collect::<Vec<String>>();
        ids.sort_by(|a, b| compare_ids(a, b));

        let rows = ids
            .into_iter()
            .map(|news_id| {
                let conditions = &result.per_news[&news_id];
                let values = columns
                    .iter()
                    .map(|(_, with_img)| {
                        conditions
                            .get(*with_img)
                            .and_then(ClassificationArrays::yes_fraction)
                    })
                    .collect();
                StatsRow { news_id, values }
            })
            .collect::<Vec<StatsRow>>();

        let summary = (0..columns.len())
            .map(|column| {
                let present = rows
                    .iter()
                    .filter_map(|row| row.values[column])
                    .collect::<Vec<f64>>();
                mean_std(&present)
            })
            .collect();

        Self {
            header: std::iter::once("News")
                .chain(columns.iter().map(|(name, _)| *name))
                .map(str::to_string)
                .collect(),
            rows,
            summary,
        }
    }

    /// Table as text cells, header first and summary last.
    pub fn records(&self) -> Vec<Vec<String>> {
        let mut records = vec![self.header.clone()];
        for row in &self.rows {
            let mut record = vec![row.news_id.clone()];
            record.extend(
                row.values
                    .iter()
                    .map(|value| format!("{:.3}", value.unwrap_or(0.0))),
            );
            records.push(record);
        }
        let mut summary = vec![SUMMARY_LABEL.to_string()];
        summary.extend(
            self.summary
                .iter()
                .map(|(mean, std)| format!("{mean:.3} [{std:.3}]")),
        );
        records.push(summary);
        records
    }

    pub fn write_csv(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("failed creating {}", path.display()))?;
        for record in self.records() {
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Left-aligned columns separated by two spaces.
    pub fn render_columns(&self) -> String {
        let records = self.records();
        let widths = (0..self.header.len())
            .map(|column| {
                records
                    .iter()
                    .map(|record| record[column].chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect::<Vec<usize>>();

        let mut out = String::new();
        for record in &records {
            let line = record
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{cell:<width$}"))
                .collect::<Vec<String>>()
                .join("  ");
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }
}

/// Mean yes/no/unknown shares for one condition, skipping items without
/// samples. `None` when the condition was not run.
pub fn condition_means(result: &ExecutionResult, with_img: bool) -> Option<ReplyMeans> {
    let arrays = result
        .per_news
        .values()
        .filter_map(|conditions| conditions.get(with_img))
        .filter(|arrays| !arrays.is_empty())
        .collect::<Vec<&ClassificationArrays>>();
    if arrays.is_empty() {
        return None;
    }
    let count = |flags: &[bool]| flags.iter().filter(|flag| **flag).count() as f64;
    let n = arrays.len() as f64;
    let mut means = ReplyMeans::default();
    for arrays in &arrays {
        let total = arrays.len() as f64;
        means.yes += count(&arrays.yes) / total / n;
        means.no += count(&arrays.no) / total / n;
        means.unknown += count(&arrays.unknown) / total / n;
    }
    Some(means)
}

#[cfg(test)]
mod tests {
    use super::{condition_means, StatsTable};
    use crate::classify::{ClassificationArrays, Reply};
    use crate::config::Experiment;
    use crate::runs::results::ExecutionResult;

    fn arrays(replies: &[Reply]) -> ClassificationArrays {
        let mut arrays = ClassificationArrays::default();
        for reply in replies {
            arrays.push(*reply);
        }
        arrays
    }

    fn both_result() -> ExecutionResult {
        let mut result = ExecutionResult::new("gpt-4o", Experiment::Both);
        result.record("10", true, arrays(&[Reply::Yes, Reply::Yes]));
        result.record("10", false, arrays(&[Reply::Yes, Reply::No]));
        result.record("2", true, arrays(&[Reply::No, Reply::No]));
        result.record("2", false, arrays(&[Reply::Unknown, Reply::Yes]));
        result.record("9", true, arrays(&[]));
        result.record("9", false, arrays(&[Reply::Yes, Reply::Yes]));
        result
    }

    #[test]
    fn both_conditions_csv_layout() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("res.csv");
        StatsTable::compute(&both_result()).write_csv(&path)?;

        let written = std::fs::read_to_string(&path)?;
        let lines = written.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "News,YES (img+txt),YES (txt)");
        assert_eq!(lines[1], "2,0.000,0.500");
        assert_eq!(lines[2], "9,0.000,1.000");
        assert_eq!(lines[3], "10,1.000,0.500");
        // the empty image array of item 9 is left out of the mean
        assert_eq!(lines[4], "mean [std],0.500 [0.500],0.667 [0.236]");
        assert_eq!(lines.len(), 5);
        Ok(())
    }

    #[test]
    fn single_condition_has_one_column_and_text_ids_sort_last() {
        let mut result = ExecutionResult::new("gpt-4o", Experiment::NewsNoimage);
        result.record("f001", false, arrays(&[Reply::Yes]));
        result.record("3", false, arrays(&[Reply::No, Reply::Yes]));
        let table = StatsTable::compute(&result);
        let records = table.records();
        assert_eq!(records[0], vec!["News", "Fraction of YES"]);
        assert_eq!(records[1], vec!["3", "0.500"]);
        assert_eq!(records[2], vec!["f001", "1.000"]);
        assert_eq!(records[3], vec!["mean [std]", "0.750 [0.250]"]);
    }

    #[test]
    fn columns_are_aligned_for_the_transcript() {
        let rendered = StatsTable::compute(&both_result()).render_columns();
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "News        YES (img+txt)  YES (txt)");
        assert_eq!(lines[1], "2           0.000          0.500");
        assert_eq!(lines[4], "mean [std]  0.500 [0.500]  0.667 [0.236]");
    }

    #[test]
    fn condition_means_cover_all_reply_classes() {
        let result = both_result();
        let without = condition_means(&result, false).unwrap_or_default();
        assert!((without.yes - 2.0 / 3.0).abs() < 1e-9);
        assert!((without.no - 1.0 / 6.0).abs() < 1e-9);
        assert!((without.unknown - 1.0 / 6.0).abs() < 1e-9);

        let mut only_text = ExecutionResult::new("gpt-4", Experiment::NewsNoimage);
        only_text.record("1", false, arrays(&[Reply::Yes]));
        assert!(condition_means(&only_text, true).is_none());
    }
}
