use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sonalyze", about = "Frame-based descriptive feature extraction for mono WAV files")]
pub struct Cli {
    /// Input WAV file (22050 Hz, 16-bit, mono)
    pub input: Option<PathBuf>,

    /// Output JSON file (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Frame length in samples
    #[arg(long, default_value_t = 256)]
    pub frame_length: usize,

    /// Band-restricted feature range start (Hz)
    #[arg(long, default_value_t = 0)]
    pub band_start: i64,

    /// Band-restricted feature range end (Hz)
    #[arg(long, default_value_t = 630)]
    pub band_end: i64,

    /// Skip the advanced parameters (band-energy ratio, spectral crest)
    #[arg(long)]
    pub no_advanced: bool,

    /// Include the dB-scaled whole-file spectrum in the output
    #[arg(long)]
    pub full_spectrum: bool,

    /// Config file path
    #[arg(long)]
    pub config: Option<PathBuf>,
}
