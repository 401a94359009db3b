//! Named scalar metrics and the sinks that record them.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

pub const TRAIN_LOSS: &str = "loss/train";
pub const DIFF_POS: &str = "diff/pos";
pub const DIFF_NEG: &str = "diff/neg";
pub const SIM_POS: &str = "sim/pos";
pub const SIM_NEG: &str = "sim/neg";
/// `sim/pos − sim/neg`, the model-selection metric.
pub const HP_METRIC: &str = "hp_metric";

/// Destination for named scalar metrics.
pub trait MetricSink {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize);
}

/// One recorded metric value. NaN is serialized as JSON `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub step: usize,
    pub name: String,
    #[serde(deserialize_with = "nan_from_null")]
    pub value: f64,
}

fn nan_from_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// In-memory metric log.
#[derive(Debug, Default)]
pub struct MetricsHistory {
    entries: Vec<MetricRecord>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[MetricRecord] {
        &self.entries
    }

    /// All `(step, value)` pairs recorded under `name`, in insertion order.
    pub fn series(&self, name: &str) -> Vec<(usize, f64)> {
        self.entries
            .iter()
            .filter(|e| e.name == name)
            .map(|e| (e.step, e.value))
            .collect()
    }

    /// Most recent value recorded under `name`.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.entries.iter().rev().find(|e| e.name == name).map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MetricSink for MetricsHistory {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) {
        self.entries.push(MetricRecord {
            step,
            name: name.to_string(),
            value,
        });
    }
}

/// Appends one JSON object per metric to a file.
///
/// ```text
/// {"step":50,"name":"loss/train","value":1.93}
/// ```
///
/// Write failures are logged and do not interrupt training.
pub struct JsonlMetricSink {
    writer: BufWriter<File>,
}

impl JsonlMetricSink {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open metrics log {}: {e}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl MetricSink for JsonlMetricSink {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) {
        let record = MetricRecord {
            step,
            name: name.to_string(),
            value,
        };
        let result = serde_json::to_writer(&mut self.writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        if let Err(e) = result {
            tracing::warn!(name, step, "Failed to write metric: {e}");
        }
    }
}

impl Drop for JsonlMetricSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Fans one metric out to several sinks.
pub struct MultiSink<'a> {
    sinks: Vec<&'a mut dyn MetricSink>,
}

impl<'a> MultiSink<'a> {
    pub fn new(sinks: Vec<&'a mut dyn MetricSink>) -> Self {
        Self { sinks }
    }
}

impl MetricSink for MultiSink<'_> {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) {
        for sink in self.sinks.iter_mut() {
            sink.log_scalar(name, value, step);
        }
    }
}

/// Evaluation metrics for one batch or averaged over a split.
///
/// A label subset absent from the batch leaves its entries NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub diff_pos: f64,
    pub diff_neg: f64,
    pub sim_pos: f64,
    pub sim_neg: f64,
    pub hp_metric: f64,
}

impl EvalMetrics {
    pub fn new(diff_pos: f64, diff_neg: f64, sim_pos: f64, sim_neg: f64) -> Self {
        Self {
            diff_pos,
            diff_neg,
            sim_pos,
            sim_neg,
            hp_metric: sim_pos - sim_neg,
        }
    }

    /// Average per field, skipping NaN entries. A field that is NaN in every
    /// batch stays NaN. Returns `None` for an empty slice.
    pub fn mean(batches: &[EvalMetrics]) -> Option<EvalMetrics> {
        if batches.is_empty() {
            return None;
        }
        let avg = |f: fn(&EvalMetrics) -> f64| nan_mean(batches.iter().map(f));
        let diff_pos = avg(|m| m.diff_pos);
        let diff_neg = avg(|m| m.diff_neg);
        let sim_pos = avg(|m| m.sim_pos);
        let sim_neg = avg(|m| m.sim_neg);
        Some(EvalMetrics::new(diff_pos, diff_neg, sim_pos, sim_neg))
    }

    /// Emit all five values under their metric names.
    pub fn log_to(&self, sink: &mut dyn MetricSink, step: usize) {
        sink.log_scalar(DIFF_POS, self.diff_pos, step);
        sink.log_scalar(DIFF_NEG, self.diff_neg, step);
        sink.log_scalar(SIM_POS, self.sim_pos, step);
        sink.log_scalar(SIM_NEG, self.sim_neg, step);
        sink.log_scalar(HP_METRIC, self.hp_metric, step);
    }

    pub fn display(&self) -> String {
        format!(
            "diff_pos={:.4} diff_neg={:.4} sim_pos={:.3} sim_neg={:.3} hp={:.3}",
            self.diff_pos, self.diff_neg, self.sim_pos, self.sim_neg, self.hp_metric
        )
    }
}

/// Mean of the non-NaN values; NaN if there are none.
pub fn nan_mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}
