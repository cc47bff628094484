use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisSection,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisSection {
    #[serde(default = "default_frame_length")]
    pub frame_length: usize,
    #[serde(default = "default_band_start")]
    pub band_start: i64,
    #[serde(default = "default_band_end")]
    pub band_end: i64,
    #[serde(default = "default_advanced")]
    pub advanced: bool,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            frame_length: default_frame_length(),
            band_start: default_band_start(),
            band_end: default_band_end(),
            advanced: default_advanced(),
        }
    }
}

fn default_frame_length() -> usize { 256 }
fn default_band_start() -> i64 { 0 }
fn default_band_end() -> i64 { 630 }
fn default_advanced() -> bool { true }

pub fn load_config(path: &PathBuf) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}
