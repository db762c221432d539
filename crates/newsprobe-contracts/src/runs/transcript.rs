use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context;

use super::stats::StatsTable;
use crate::prompt::ComposedPrompt;

const HEAVY_RULE: usize = 60;

/// One processed news item as it appears in the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub news_id: String,
    /// Empty when the item ran without an image.
    pub image_name: String,
    /// Already pruned of image payloads.
    pub prompt: ComposedPrompt,
    pub completions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptHeader {
    pub command: String,
    pub host: String,
    pub config: String,
}

pub fn render_transcript(
    header: &TranscriptHeader,
    table: &StatsTable,
    entries: &[TranscriptEntry],
) -> String {
    let heavy = "=".repeat(HEAVY_RULE);
    let light = "-".repeat(HEAVY_RULE);
    let mut out = String::new();

    let _ = write!(out, "{heavy}\n\n");
    let _ = write!(out, "executing:\n{}\non host {}\n\n", header.command, header.host);
    let _ = write!(out, "{heavy}\n\n");
    out.push_str(&header.config);
    if !header.config.ends_with('\n') {
        out.push('\n');
    }
    let _ = write!(out, "\n{heavy}\n\n");
    out.push_str(&table.render_columns());

    let _ = writeln!(out, "\n{heavy}");
    for entry in entries {
        if entry.image_name.is_empty() {
            let _ = write!(
                out,
                "\n---------------- News {} with no image -------------------\n\n",
                entry.news_id
            );
        } else {
            let _ = write!(
                out,
                "\n-------------- News {} with image {} ---------------\n\n",
                entry.news_id, entry.image_name
            );
        }

        match &entry.prompt {
            ComposedPrompt::Text(text) => {
                let _ = write!(out, "PROMPT:\n{text}\n\n");
            }
            ComposedPrompt::Chat(messages) => {
                for message in messages {
                    let _ = writeln!(out, "ROLE: {}", message.role.as_str());
                    let _ = write!(out, "PROMPT:\n{}\n\n", message.text().unwrap_or_default());
                }
            }
        }

        for (index, completion) in entry.completions.iter().enumerate() {
            let _ = write!(out, "{light}\n\n");
            let _ = write!(out, "COMPLETION #{index}:\n{completion}\n\n");
        }
        let _ = writeln!(out, "{heavy}");
    }
    out
}

pub fn write_transcript(
    path: &Path,
    header: &TranscriptHeader,
    table: &StatsTable,
    entries: &[TranscriptEntry],
) -> anyhow::Result<()> {
    std::fs::write(path, render_transcript(header, table, entries))
        .with_context(|| format!("failed writing transcript {}", path.display()))
}
