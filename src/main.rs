mod audio;
mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use audio::analysis::{AnalysisConfig, Analyzer, FeatureSet};
use cli::Cli;

#[derive(Serialize)]
struct Report<'a> {
    file: String,
    sample_rate: u32,
    sample_count: usize,
    #[serde(flatten)]
    features: &'a FeatureSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    full_spectrum_db: Option<Vec<f32>>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect sonalyze.toml / global config
    let config_path = cli.config.clone().or_else(|| {
        let local = std::path::PathBuf::from("sonalyze.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("sonalyze").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("sonalyze").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });
    if let Some(ref path) = config_path {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            // Merge: config values apply only when CLI is at its default
            if cli.frame_length == 256 {
                cli.frame_length = cfg.analysis.frame_length;
            }
            if cli.band_start == 0 {
                cli.band_start = cfg.analysis.band_start;
            }
            if cli.band_end == 630 {
                cli.band_end = cfg.analysis.band_end;
            }
            if !cli.no_advanced {
                cli.no_advanced = !cfg.analysis.advanced;
            }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    let input = cli.input.as_ref().context("Input WAV file is required")?;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    log::info!("sonalyze - frame-based audio feature extraction");
    log::info!("Input: {}", input.display());
    log::info!(
        "Frame length: {}, band: {}-{} Hz",
        cli.frame_length,
        cli.band_start,
        cli.band_end
    );

    // 1. Decode audio
    log::info!("Decoding audio...");
    let audio_data = audio::decode::decode_wav(input)?;

    // 2. Whole-file spectrum (plotting path), before the buffer moves
    let full_spectrum_db = cli
        .full_spectrum
        .then(|| audio::spectrum::full_spectrum(&audio_data.samples, audio_data.sample_rate));

    // 3. Run the analysis pipeline
    log::info!("Analyzing audio...");
    let analyzer = Analyzer::load(
        audio_data.samples,
        audio_data.sample_rate,
        AnalysisConfig {
            frame_length: cli.frame_length,
            band_start: cli.band_start,
            band_end: cli.band_end,
            advanced: !cli.no_advanced,
        },
    )?;
    let set = analyzer.snapshot().context("Analysis produced no snapshot")?;
    log::info!(
        "Computed {} frames of {} samples each",
        set.volume.len(),
        set.frame_length
    );

    // 4. Emit JSON
    let report = Report {
        file: input.display().to_string(),
        sample_rate: analyzer.sample_rate(),
        sample_count: analyzer.sample_count(),
        features: &*set,
        full_spectrum_db,
    };
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    match cli.output {
        Some(ref path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Done! Output: {}", path.display());
        }
        None => println!("{json}"),
    }

    Ok(())
}
