use rayon::prelude::*;

use super::analysis::AnalysisError;
use super::spectrum::FrameSpectrum;

/// Inclusive integer-Hz frequency range for the band-restricted features.
/// Always comes out of config normalization, so `start <= end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Band {
    pub start: usize,
    pub end: usize,
}

/// Degenerate per-frame results (NaN or ±∞ from dividing by zero) become 0
/// so one silent frame never corrupts a whole series.
fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Short-time energy: sum of squared magnitudes over the frame length.
pub fn volume(spectra: &[FrameSpectrum], frame_length: usize) -> Vec<f32> {
    spectra
        .par_iter()
        .map(|spectrum| {
            let sum: f32 = spectrum.iter().map(|&m| m * m).sum();
            finite_or_zero(sum / frame_length as f32)
        })
        .collect()
}

/// Spectral centroid: magnitude-weighted mean bin index.
pub fn centroid(spectra: &[FrameSpectrum]) -> Vec<f32> {
    spectra
        .par_iter()
        .map(|spectrum| {
            let mut weighted = 0.0f32;
            let mut total = 0.0f32;
            for (s, &m) in spectrum.iter().enumerate() {
                weighted += s as f32 * m;
                total += m;
            }
            finite_or_zero(weighted / total)
        })
        .collect()
}

/// Effective bandwidth: power-weighted variance around the frame's centroid.
/// The centroid series must come from the same spectra.
pub fn effective_bandwidth(
    spectra: &[FrameSpectrum],
    centroid: &[f32],
) -> Result<Vec<f32>, AnalysisError> {
    if centroid.len() != spectra.len() {
        return Err(AnalysisError::MissingPrerequisite {
            feature: "effective bandwidth",
            missing: "frequency centroid",
        });
    }
    Ok(spectra
        .par_iter()
        .zip(centroid.par_iter())
        .map(|(spectrum, &center)| {
            let mut weighted = 0.0f32;
            let mut power = 0.0f32;
            for (s, &m) in spectrum.iter().enumerate() {
                let dist = s as f32 - center;
                weighted += dist * dist * m * m;
                power += m * m;
            }
            finite_or_zero(weighted / power)
        })
        .collect())
}

/// Mean squared magnitude over the band, truncated per frame to the bins the
/// spectrum actually has.
pub fn band_energy(spectra: &[FrameSpectrum], band: Band) -> Vec<f32> {
    spectra
        .par_iter()
        .map(|spectrum| {
            let stop = (band.end + 1).min(spectrum.len());
            let mut sum = 0.0f32;
            let mut bins = 0u32;
            for &m in spectrum.iter().take(stop).skip(band.start) {
                sum += m * m;
                bins += 1;
            }
            finite_or_zero(sum / bins as f32)
        })
        .collect()
}

/// Band energy divided by volume, frame by frame. Both input series must
/// already be computed for the same frames.
pub fn band_energy_ratio(
    band_energy: &[f32],
    volume: &[f32],
) -> Result<Vec<f32>, AnalysisError> {
    if band_energy.len() != volume.len() {
        return Err(AnalysisError::MissingPrerequisite {
            feature: "band energy ratio",
            missing: "volume and band energy",
        });
    }
    Ok(band_energy
        .par_iter()
        .zip(volume.par_iter())
        .map(|(&energy, &vol)| finite_or_zero(energy / vol))
        .collect())
}

/// Spectral flatness: geometric over arithmetic mean power in the band.
/// Zero bins are skipped in the geometric mean; accumulation runs in f64
/// because the product underflows f32 for wide bands.
pub fn spectral_flatness(spectra: &[FrameSpectrum], band: Band) -> Vec<f32> {
    spectra
        .par_iter()
        .map(|spectrum| {
            let stop = (band.end + 1).min(spectrum.len());
            let width = stop.saturating_sub(band.start) as f64;
            let mut geometric = 1.0f64;
            let mut power = 0.0f64;
            for &m in spectrum.iter().take(stop).skip(band.start) {
                if m == 0.0 {
                    continue;
                }
                geometric *= (m as f64).powf(2.0 / width);
                power += m as f64 * m as f64;
            }
            finite_or_zero((geometric / (power / width)) as f32)
        })
        .collect()
}

/// Spectral crest factor: peak power over the whole spectrum divided by the
/// mean power in the band. The divisor is the nominal band width even when a
/// short spectrum truncates the iteration.
pub fn spectral_crest(spectra: &[FrameSpectrum], band: Band) -> Vec<f32> {
    spectra
        .par_iter()
        .map(|spectrum| {
            let peak = spectrum.iter().map(|&m| m * m).fold(0.0f32, f32::max);
            let stop = (band.end + 1).min(spectrum.len());
            let mut power = 0.0f32;
            for &m in spectrum.iter().take(stop).skip(band.start) {
                power += m * m;
            }
            let mean = power / (band.end - band.start + 1) as f32;
            finite_or_zero(peak / mean)
        })
        .collect()
}
