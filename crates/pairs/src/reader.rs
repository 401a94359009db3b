//! Reads labeled sentence pairs from JSONL files.

use std::io::BufRead;
use std::path::Path;

use serde_json::Value;

use crate::types::{PairRecord, PairSummary, Task};

/// Static methods for reading sentence-pair data.
pub struct PairReader;

impl PairReader {
    /// Read all labeled pairs from a JSONL file.
    ///
    /// Each line is a JSON object holding the task's two text columns and
    /// an integer `label`. Rows whose label is not 0 or 1 (unlabeled test
    /// rows carry -1) are skipped. Blank lines are ignored; any other
    /// malformed line is an error naming the line number.
    pub fn read_jsonl(path: &Path, task: Task) -> anyhow::Result<Vec<PairRecord>> {
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let (anchor_field, target_field) = task.text_fields();
        let label_field = task.label_field();

        let mut records = Vec::new();
        let mut skipped = 0usize;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(trimmed).map_err(|e| {
                anyhow::anyhow!("{}:{}: invalid JSON: {e}", path.display(), line_no + 1)
            })?;

            let anchor = text_field(&value, anchor_field).ok_or_else(|| {
                anyhow::anyhow!(
                    "{}:{}: missing text field '{anchor_field}'",
                    path.display(),
                    line_no + 1
                )
            })?;
            let target = text_field(&value, target_field).ok_or_else(|| {
                anyhow::anyhow!(
                    "{}:{}: missing text field '{target_field}'",
                    path.display(),
                    line_no + 1
                )
            })?;
            let label = value.get(label_field).and_then(Value::as_i64).ok_or_else(|| {
                anyhow::anyhow!(
                    "{}:{}: missing integer field '{label_field}'",
                    path.display(),
                    line_no + 1
                )
            })?;

            match label {
                0 | 1 => records.push(PairRecord {
                    anchor: anchor.to_string(),
                    target: target.to_string(),
                    label: label as u8,
                }),
                _ => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::warn!(
                skipped,
                path = %path.display(),
                "Skipped rows without a binary label"
            );
        }
        tracing::debug!(
            count = records.len(),
            path = %path.display(),
            task = %task,
            "Read sentence pairs"
        );

        Ok(records)
    }

    /// Label counts for a JSONL file.
    pub fn read_summary(path: &Path, task: Task) -> anyhow::Result<PairSummary> {
        let records = Self::read_jsonl(path, task)?;
        Ok(summarize(&records))
    }
}

/// Count positive and negative pairs.
pub fn summarize(records: &[PairRecord]) -> PairSummary {
    let positive = records.iter().filter(|r| r.label == 1).count();
    PairSummary {
        total: records.len(),
        positive,
        negative: records.len() - positive,
    }
}

fn text_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}
