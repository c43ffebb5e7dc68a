//! The fixed MP4 conversion preset.
//!
//! Every job runs the same argument list; only the virtual filenames and the
//! configured encoder knobs vary. Container negotiation and per-job tuning
//! are out of scope by design.

use clipmill_core::config::ConversionConfig;

/// Build the transcode argument list for one job.
///
/// `input` and `output` are virtual filenames inside the engine's namespace.
/// The machine-readable progress stream is requested on stdout
/// (`-progress pipe:1`) with periodic statistics suppressed, and existing
/// outputs are overwritten without prompting.
pub fn conversion_args(input: &str, output: &str, config: &ConversionConfig) -> Vec<String> {
    vec![
        "-i".to_string(),
        input.to_string(),
        "-c:v".to_string(),
        config.video_codec.clone(),
        "-preset".to_string(),
        config.preset.clone(),
        "-movflags".to_string(),
        config.movflags.clone(),
        "-crf".to_string(),
        config.crf.to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-y".to_string(),
        output.to_string(),
    ]
}
