use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use super::features::{self, Band};
use super::spectrum::{self, FrameSpectrum, DEFAULT_FRAME_LENGTH};

/// Contract violations that abort a computation pass. Degenerate numerics
/// and out-of-range configuration never surface here; those are recovered
/// locally (per-frame zero substitution, clamp/swap/default).
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no samples loaded, load a file first")]
    NoSamples,
    #[error("{missing} must be computed before {feature}")]
    MissingPrerequisite {
        feature: &'static str,
        missing: &'static str,
    },
    #[error("recompute cancelled")]
    Cancelled,
}

/// Analysis parameters supplied by the caller. Band bounds are accepted
/// signed so out-of-range input can be repaired instead of rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalysisConfig {
    /// Samples per frame. 0 or larger than the buffer falls back to 256.
    pub frame_length: usize,
    /// Band-restricted feature range start, Hz. Negative clamps to 0.
    pub band_start: i64,
    /// Band-restricted feature range end, Hz. Swapped with start if reversed.
    pub band_end: i64,
    /// Compute the advanced parameters (band-energy ratio, spectral crest).
    /// When false those two series come back empty, not zeroed.
    pub advanced: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            frame_length: DEFAULT_FRAME_LENGTH,
            band_start: 0,
            band_end: 630,
            advanced: true,
        }
    }
}

impl AnalysisConfig {
    /// Lenient repair: clamp negative bounds to 0, swap reversed bounds,
    /// default an unusable frame length.
    fn normalized(mut self, sample_count: usize) -> Self {
        if self.band_start < 0 {
            self.band_start = 0;
        }
        if self.band_end < 0 {
            self.band_end = 0;
        }
        if self.band_start > self.band_end {
            std::mem::swap(&mut self.band_start, &mut self.band_end);
        }
        if self.frame_length == 0 || self.frame_length > sample_count {
            self.frame_length = DEFAULT_FRAME_LENGTH;
        }
        self
    }

    fn band(&self) -> Band {
        Band {
            start: self.band_start as usize,
            end: self.band_end as usize,
        }
    }
}

/// Cooperative cancellation for an in-flight recompute. Checked at each
/// wave barrier; a cancelled run publishes nothing.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One internally consistent result set: every series was computed from the
/// same spectra under the same normalized configuration.
#[derive(Clone, Debug, Serialize)]
pub struct FeatureSet {
    pub frame_length: usize,
    pub band_start: usize,
    pub band_end: usize,
    pub volume: Vec<f32>,
    pub centroid: Vec<f32>,
    pub effective_bandwidth: Vec<f32>,
    pub band_energy: Vec<f32>,
    pub band_energy_ratio: Vec<f32>,
    pub spectral_flatness: Vec<f32>,
    pub spectral_crest: Vec<f32>,
    /// Linear-magnitude spectrum per frame, shared input of every series.
    #[serde(skip)]
    pub spectra: Vec<FrameSpectrum>,
}

/// Owns the sample buffer and configuration, runs the two-wave pipeline and
/// publishes finished snapshots.
///
/// The buffer is immutable for the lifetime of the analyzer; a new file
/// means a new analyzer. Readers that hold a snapshot keep seeing it until
/// they ask again, and a snapshot swap is the only mutation a recompute
/// performs, so results are always fully-old or fully-new.
pub struct Analyzer {
    samples: Arc<[f32]>,
    sample_rate: u32,
    config: Mutex<AnalysisConfig>,
    snapshot: RwLock<Option<Arc<FeatureSet>>>,
}

impl Analyzer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, config: AnalysisConfig) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            config: Mutex::new(config),
            snapshot: RwLock::new(None),
        }
    }

    /// Load a buffer and immediately bring it to a consistent state: the
    /// returned analyzer already has a published snapshot for `config`.
    pub fn load(
        samples: Vec<f32>,
        sample_rate: u32,
        config: AnalysisConfig,
    ) -> Result<Self, AnalysisError> {
        let analyzer = Self::new(samples, sample_rate, config);
        analyzer.recompute(None, &CancelToken::new())?;
        Ok(analyzer)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Configuration as of the last `recompute` (normalized form).
    pub fn config(&self) -> AnalysisConfig {
        *self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Latest published result set, or None before the first completed run.
    pub fn snapshot(&self) -> Option<Arc<FeatureSet>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Spectrum of one frame under the current configuration. The dB path
    /// is for plotting; the feature pipeline always reads linear magnitudes.
    #[allow(dead_code)]
    pub fn frame_spectrum(
        &self,
        frame_index: usize,
        scale_to_db: bool,
    ) -> Result<FrameSpectrum, AnalysisError> {
        if self.samples.is_empty() {
            return Err(AnalysisError::NoSamples);
        }
        let frame_length = self.config().frame_length;
        Ok(spectrum::frame_spectrum(
            &self.samples,
            self.sample_rate,
            frame_index,
            frame_length,
            scale_to_db,
        ))
    }

    /// Run the full pipeline: eager spectra, then wave 1 (volume, centroid,
    /// band energy, flatness, crest) and wave 2 (effective bandwidth, band
    /// energy ratio), each wave fully joined before the next starts. The
    /// finished set is published atomically; a reader never observes a
    /// partially updated mix of old and new series.
    pub fn recompute(
        &self,
        new_config: Option<AnalysisConfig>,
        cancel: &CancelToken,
    ) -> Result<Arc<FeatureSet>, AnalysisError> {
        if self.samples.is_empty() {
            return Err(AnalysisError::NoSamples);
        }

        let config = {
            let mut held = self.config.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(next) = new_config {
                *held = next;
            }
            *held = held.normalized(self.samples.len());
            *held
        };
        let band = config.band();
        let count = self.samples.len() / config.frame_length;

        log::info!(
            "Recompute: {} frames of {} samples, band {}-{} Hz",
            count,
            config.frame_length,
            band.start,
            band.end
        );

        // Every calculator reads the same per-frame spectra, so compute them
        // once per run instead of once per feature.
        let spectra: Vec<FrameSpectrum> = (0..count)
            .into_par_iter()
            .map(|i| {
                spectrum::frame_spectrum(
                    &self.samples,
                    self.sample_rate,
                    i,
                    config.frame_length,
                    false,
                )
            })
            .collect();
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        // Wave 1: no calculator here depends on another's output.
        let ((volume, centroid), (band_energy, (spectral_flatness, spectral_crest))) =
            rayon::join(
                || {
                    rayon::join(
                        || features::volume(&spectra, config.frame_length),
                        || features::centroid(&spectra),
                    )
                },
                || {
                    rayon::join(
                        || features::band_energy(&spectra, band),
                        || {
                            rayon::join(
                                || features::spectral_flatness(&spectra, band),
                                || {
                                    if config.advanced {
                                        features::spectral_crest(&spectra, band)
                                    } else {
                                        Vec::new()
                                    }
                                },
                            )
                        },
                    )
                },
            );
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        // Wave 2: consumes wave-1 series, which are fully materialized now.
        let (effective_bandwidth, band_energy_ratio) = rayon::join(
            || features::effective_bandwidth(&spectra, &centroid),
            || {
                if config.advanced {
                    features::band_energy_ratio(&band_energy, &volume)
                } else {
                    Ok(Vec::new())
                }
            },
        );
        let effective_bandwidth = effective_bandwidth?;
        let band_energy_ratio = band_energy_ratio?;
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let set = Arc::new(FeatureSet {
            frame_length: config.frame_length,
            band_start: band.start,
            band_end: band.end,
            volume,
            centroid,
            effective_bandwidth,
            band_energy,
            band_energy_ratio,
            spectral_flatness,
            spectral_crest,
            spectra,
        });

        // The single synchronization point: swap in the finished snapshot.
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&set));
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 22050;

    // Phase runs in f64; f32 loses the phase entirely at large sample indices.
    fn sine(freq: f64, count: usize) -> Vec<f32> {
        (0..count)
            .map(|i| {
                (2.0 * std::f64::consts::PI * freq * i as f64 / SAMPLE_RATE as f64).sin() as f32
            })
            .collect()
    }

    fn run(samples: Vec<f32>, config: AnalysisConfig) -> Arc<FeatureSet> {
        let analyzer = Analyzer::new(samples, SAMPLE_RATE, config);
        analyzer
            .recompute(None, &CancelToken::new())
            .expect("recompute")
    }

    #[test]
    fn series_lengths_match_frame_count() {
        let samples = sine(440.0, 10_000);
        for frame_length in [1usize, 7, 256, 1024, 9999] {
            let set = run(
                samples.clone(),
                AnalysisConfig {
                    frame_length,
                    ..AnalysisConfig::default()
                },
            );
            let expected = samples.len() / frame_length;
            assert_eq!(set.volume.len(), expected);
            assert_eq!(set.centroid.len(), expected);
            assert_eq!(set.effective_bandwidth.len(), expected);
            assert_eq!(set.band_energy.len(), expected);
            assert_eq!(set.band_energy_ratio.len(), expected);
            assert_eq!(set.spectral_flatness.len(), expected);
            assert_eq!(set.spectral_crest.len(), expected);
            assert_eq!(set.spectra.len(), expected);
        }
    }

    #[test]
    fn dc_bin_is_zero_in_every_frame() {
        let set = run(sine(440.0, 8192), AnalysisConfig::default());
        for spectrum in &set.spectra {
            assert_eq!(spectrum[0], 0.0);
        }
    }

    #[test]
    fn silent_buffer_yields_exact_zeros() {
        let set = run(vec![0.0; 2048], AnalysisConfig::default());
        assert_eq!(set.volume.len(), 8);
        for i in 0..8 {
            assert_eq!(set.volume[i], 0.0);
            assert_eq!(set.band_energy[i], 0.0);
            assert_eq!(set.spectral_crest[i], 0.0);
            assert_eq!(set.band_energy_ratio[i], 0.0);
        }
    }

    #[test]
    fn reversed_band_bounds_are_swapped() {
        let samples = sine(523.25, 8192);
        let reversed = run(
            samples.clone(),
            AnalysisConfig {
                band_start: 630,
                band_end: 0,
                ..AnalysisConfig::default()
            },
        );
        let normal = run(
            samples,
            AnalysisConfig {
                band_start: 0,
                band_end: 630,
                ..AnalysisConfig::default()
            },
        );
        assert_eq!(reversed.band_energy, normal.band_energy);
        assert_eq!(reversed.band_energy_ratio, normal.band_energy_ratio);
        assert_eq!(reversed.spectral_flatness, normal.spectral_flatness);
        assert_eq!(reversed.spectral_crest, normal.spectral_crest);
        assert_eq!(reversed.band_start, 0);
        assert_eq!(reversed.band_end, 630);
    }

    #[test]
    fn negative_band_bounds_clamp_to_zero() {
        let samples = sine(440.0, 4096);
        let clamped = run(
            samples.clone(),
            AnalysisConfig {
                band_start: -100,
                band_end: 630,
                ..AnalysisConfig::default()
            },
        );
        let normal = run(samples, AnalysisConfig::default());
        assert_eq!(clamped.band_energy, normal.band_energy);
        assert_eq!(clamped.band_start, 0);
    }

    #[test]
    fn recompute_is_bit_identical() {
        let analyzer = Analyzer::new(sine(440.0, 16384), SAMPLE_RATE, AnalysisConfig::default());
        let cancel = CancelToken::new();
        let first = analyzer.recompute(None, &cancel).expect("first run");
        let second = analyzer.recompute(None, &cancel).expect("second run");
        assert_eq!(first.volume, second.volume);
        assert_eq!(first.centroid, second.centroid);
        assert_eq!(first.effective_bandwidth, second.effective_bandwidth);
        assert_eq!(first.band_energy, second.band_energy);
        assert_eq!(first.band_energy_ratio, second.band_energy_ratio);
        assert_eq!(first.spectral_flatness, second.spectral_flatness);
        assert_eq!(first.spectral_crest, second.spectral_crest);
    }

    #[test]
    fn bandwidth_reproducible_from_captured_centroid() {
        let set = run(sine(880.0, 8192), AnalysisConfig::default());
        let recomputed =
            features::effective_bandwidth(&set.spectra, &set.centroid).expect("prereq present");
        assert_eq!(recomputed, set.effective_bandwidth);
    }

    #[test]
    fn pure_sine_has_constant_centroid_and_tight_bandwidth() {
        // One frame per second at 1 Hz bin resolution: a 1000 Hz sine with
        // an integer number of cycles per frame lands on exactly one bin.
        let set = run(
            sine(1000.0, 2 * SAMPLE_RATE as usize),
            AnalysisConfig {
                frame_length: SAMPLE_RATE as usize,
                ..AnalysisConfig::default()
            },
        );
        assert_eq!(set.centroid.len(), 2);
        for &c in &set.centroid {
            assert!((c - 1000.0).abs() < 10.0, "centroid {c} too far from 1000");
        }
        for &bw in &set.effective_bandwidth {
            assert!(bw < 1.0, "effective bandwidth {bw} not near zero");
        }
    }

    #[test]
    fn sine_centroid_constant_across_256_sample_frames() {
        // 2756.25 Hz is exactly 32 cycles per 256-sample frame, so every
        // frame holds identical content and an identical centroid.
        let set = run(
            sine(2756.25, SAMPLE_RATE as usize),
            AnalysisConfig {
                frame_length: 256,
                ..AnalysisConfig::default()
            },
        );
        assert_eq!(set.centroid.len(), 86);
        let first = set.centroid[0];
        assert!((first - 2756.0).abs() < 30.0, "centroid {first} off target");
        for &c in &set.centroid {
            assert!((c - first).abs() < 1e-3);
        }
    }

    #[test]
    fn basic_mode_skips_advanced_series() {
        let set = run(
            sine(440.0, 4096),
            AnalysisConfig {
                advanced: false,
                ..AnalysisConfig::default()
            },
        );
        assert!(set.band_energy_ratio.is_empty());
        assert!(set.spectral_crest.is_empty());
        // Non-gated series are unaffected
        assert_eq!(set.volume.len(), 16);
        assert_eq!(set.spectral_flatness.len(), 16);
    }

    #[test]
    fn load_publishes_a_snapshot_immediately() {
        let analyzer =
            Analyzer::load(sine(440.0, 4096), SAMPLE_RATE, AnalysisConfig::default())
                .expect("load");
        let set = analyzer.snapshot().expect("consistent after load");
        assert_eq!(set.volume.len(), 16);
    }

    #[test]
    fn empty_buffer_is_a_state_error() {
        let analyzer = Analyzer::new(Vec::new(), SAMPLE_RATE, AnalysisConfig::default());
        let err = analyzer
            .recompute(None, &CancelToken::new())
            .expect_err("no samples");
        assert!(matches!(err, AnalysisError::NoSamples));
    }

    #[test]
    fn cancelled_run_publishes_nothing() {
        let analyzer = Analyzer::new(sine(440.0, 4096), SAMPLE_RATE, AnalysisConfig::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = analyzer
            .recompute(None, &cancel)
            .expect_err("cancelled run");
        assert!(matches!(err, AnalysisError::Cancelled));
        assert!(analyzer.snapshot().is_none());
    }

    #[test]
    fn old_snapshot_stays_until_new_one_is_ready() {
        let analyzer = Analyzer::new(sine(440.0, 4096), SAMPLE_RATE, AnalysisConfig::default());
        let first = analyzer
            .recompute(None, &CancelToken::new())
            .expect("first run");

        // A cancelled reconfigure must leave the old snapshot visible
        let cancel = CancelToken::new();
        cancel.cancel();
        let _ = analyzer.recompute(
            Some(AnalysisConfig {
                frame_length: 512,
                ..AnalysisConfig::default()
            }),
            &cancel,
        );
        let visible = analyzer.snapshot().expect("snapshot still published");
        assert_eq!(visible.frame_length, first.frame_length);
        assert_eq!(visible.volume, first.volume);
    }

    #[test]
    fn invalid_frame_length_defaults_to_256() {
        let set = run(
            sine(440.0, 2048),
            AnalysisConfig {
                frame_length: 0,
                ..AnalysisConfig::default()
            },
        );
        assert_eq!(set.frame_length, 256);
        assert_eq!(set.volume.len(), 8);

        let set = run(
            sine(440.0, 2048),
            AnalysisConfig {
                frame_length: 1_000_000,
                ..AnalysisConfig::default()
            },
        );
        assert_eq!(set.frame_length, 256);
    }

    #[test]
    fn frame_spectrum_accessor_matches_pipeline() {
        let analyzer = Analyzer::new(sine(440.0, 4096), SAMPLE_RATE, AnalysisConfig::default());
        let set = analyzer
            .recompute(None, &CancelToken::new())
            .expect("recompute");
        let accessor = analyzer.frame_spectrum(3, false).expect("in range");
        assert_eq!(accessor, set.spectra[3]);
    }
}
