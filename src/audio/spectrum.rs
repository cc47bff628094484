use rustfft::{num_complex::Complex, FftPlanner};

/// Fallback frame length used when the caller hands us an unusable one.
pub const DEFAULT_FRAME_LENGTH: usize = 256;

/// Magnitude spectrum of one frame, indexed by integer Hz bin.
pub type FrameSpectrum = Vec<f32>;

/// Compute the magnitude spectrum of one frame, collapsed onto integer-Hz bins.
///
/// The frame window starts at `frame_index * frame_length`. An out-of-range
/// start falls back to 0, and a window running past the end of the buffer is
/// truncated to the remaining samples. A frame length of 0 or larger than the
/// buffer is corrected to [`DEFAULT_FRAME_LENGTH`] rather than rejected.
///
/// Multiple transform bins that land on the same integer-Hz bin keep the
/// maximum magnitude (peak hold). Integer bins with no contributing transform
/// output are filled by linear interpolation between their nearest populated
/// neighbors; bins missing a neighbor on either side stay 0. Bin 0 is always
/// forced to 0 so no downstream feature sees the DC offset.
///
/// `scale_to_db` converts magnitudes to `20·log10` decibels. This is the
/// plotting path; the feature pipeline always reads linear magnitudes.
pub fn frame_spectrum(
    samples: &[f32],
    sample_rate: u32,
    frame_index: usize,
    frame_length: usize,
    scale_to_db: bool,
) -> FrameSpectrum {
    let frame_length = if frame_length == 0 || frame_length > samples.len() {
        DEFAULT_FRAME_LENGTH
    } else {
        frame_length
    };

    let mut start = frame_index * frame_length;
    if start > samples.len() {
        start = 0;
    }
    let len = frame_length.min(samples.len() - start);
    if len == 0 {
        return vec![0.0];
    }

    // Forward transform over the effective window, no scaling, no window
    // function. Only the first half carries information for real input.
    let mut buffer: Vec<Complex<f32>> = samples[start..start + len]
        .iter()
        .map(|&s| Complex::new(s, 0.0))
        .collect();
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(len);
    fft.process(&mut buffer);

    let hz_per_bin = sample_rate as f64 / len as f64;
    let mut sparse: Vec<Option<f32>> = Vec::with_capacity(len / 2 + 1);

    for (k, c) in buffer.iter().take(len / 2 + 1).enumerate() {
        let x = (hz_per_bin * k as f64) as usize;
        let magnitude = c.norm();
        let value = if scale_to_db {
            20.0 * magnitude.log10()
        } else {
            magnitude
        };
        if x >= sparse.len() {
            sparse.resize(x + 1, None);
        }
        // Peak hold: keep the largest value seen for each integer bin.
        match sparse[x] {
            Some(held) if held >= value => {}
            _ => sparse[x] = Some(value),
        }
    }

    let mut spectrum = fill_gaps(&sparse);
    spectrum[0] = 0.0;
    spectrum
}

/// dB-scaled spectrum of the entire buffer, treated as a single frame.
pub fn full_spectrum(samples: &[f32], sample_rate: u32) -> FrameSpectrum {
    frame_spectrum(samples, sample_rate, 0, samples.len(), true)
}

/// Fill unpopulated integer bins by linear interpolation between the nearest
/// populated bin on each side. Bins without a populated neighbor on either
/// side are left at 0.
fn fill_gaps(sparse: &[Option<f32>]) -> Vec<f32> {
    let mut out = vec![0.0; sparse.len()];
    for i in 0..sparse.len() {
        if let Some(v) = sparse[i] {
            out[i] = v;
            continue;
        }
        let prev = sparse[..i]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(j, s)| s.map(|v| (j, v)));
        let next = sparse[i + 1..]
            .iter()
            .enumerate()
            .find_map(|(j, s)| s.map(|v| (i + 1 + j, v)));
        if let (Some((pi, pv)), Some((ni, nv))) = (prev, next) {
            let step = (nv - pv) / (ni - pi) as f32;
            out[i] = pv + step * (i - pi) as f32;
        }
    }
    out
}
