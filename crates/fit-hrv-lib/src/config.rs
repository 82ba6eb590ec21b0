use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Minimum spacing between two estimates, as a fraction of the window.
pub const MIN_SPACING_FRACTION: f64 = 0.5;

/// Sliding window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Target window length in minutes.
    pub window_minutes: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_minutes: 1.0,
        }
    }
}

impl WindowConfig {
    pub fn new(window_minutes: f64) -> Result<Self> {
        let cfg = Self { window_minutes };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.window_minutes.is_finite() && self.window_minutes > 0.0,
            "window_minutes must be a positive number, got {}",
            self.window_minutes
        );
        Ok(())
    }

    /// Minutes that must pass after an estimate before the next one is attempted.
    pub fn min_spacing_minutes(&self) -> f64 {
        MIN_SPACING_FRACTION * self.window_minutes
    }
}

pub fn parse_config(text: &str) -> Result<WindowConfig> {
    let cfg: WindowConfig = toml::from_str(text).context("parsing window config")?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn read_config(path: &Path) -> Result<WindowConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("invalid config {}", path.display()))
}
