//! Discovery of optional external tools
//!
//! The orchestrator itself never runs these binaries; what is found is
//! reported through [`Capabilities`](crate::types::Capabilities) so callers
//! can warn about engine features that will fail with an environment error.

use std::path::PathBuf;

use crate::config::ToolsConfig;

/// Name of the transcoder binary looked up on `PATH`
pub const TRANSCODER_BINARY: &str = "ffmpeg";

/// Locate a usable ffmpeg binary
///
/// An explicitly configured path wins when it points at a file. Otherwise
/// `PATH` is searched with the `which` crate, unless `search_path` is off.
pub fn find_transcoder(config: &ToolsConfig) -> Option<PathBuf> {
    if let Some(path) = &config.ffmpeg_path {
        if path.is_file() {
            return Some(path.clone());
        }
        tracing::warn!(path = %path.display(), "Configured ffmpeg path is not a file");
    }

    if !config.search_path {
        return None;
    }

    match which::which(TRANSCODER_BINARY) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::debug!(error = %e, "ffmpeg not found on PATH");
            None
        }
    }
}
