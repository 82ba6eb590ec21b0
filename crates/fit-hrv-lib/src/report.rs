use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

/// Column titles of the emitted series.
pub const SERIES_HEADER: [&str; 3] = ["Duration", "Avg HR", "HRV"];
/// Placeholder replaced by the series literal in HTML templates.
pub const HRVDATA_PLACEHOLDER: &str = "%HRVDATA%";
/// Built-in report page.
pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/hrv_report.html");

/// One emitted window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvRow {
    /// Seconds from stream start to the window end
    pub elapsed_s: f64,
    pub avg_heart_rate: f64,
    pub hrv: f64,
}

/// Append-only HRV time series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HrvSeries {
    pub rows: Vec<HrvRow>,
}

impl HrvSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: HrvRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header row followed by `[elapsed_s, avg_hr, hrv]` rows.
    pub fn to_table(&self) -> Value {
        let mut table = vec![json!(SERIES_HEADER)];
        table.extend(
            self.rows
                .iter()
                .map(|row| json!([row.elapsed_s, row.avg_heart_rate, row.hrv])),
        );
        Value::Array(table)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_table())?)
    }
}

/// Substitute the series into `template` at [`HRVDATA_PLACEHOLDER`].
pub fn render_html(template: &str, series: &HrvSeries) -> Result<String> {
    if !template.contains(HRVDATA_PLACEHOLDER) {
        anyhow::bail!("template has no {} placeholder", HRVDATA_PLACEHOLDER);
    }
    Ok(template.replace(HRVDATA_PLACEHOLDER, &series.to_json()?))
}

pub fn write_html(path: &Path, template: &str, series: &HrvSeries) -> Result<()> {
    let html = render_html(template, series)?;
    fs::write(path, html).with_context(|| format!("writing report {}", path.display()))
}

pub fn write_csv(path: &Path, series: &HrvSeries) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(SERIES_HEADER)?;
    for row in &series.rows {
        writer.write_record(&[
            row.elapsed_s.to_string(),
            row.avg_heart_rate.to_string(),
            row.hrv.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
