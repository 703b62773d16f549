//! `ffprobe` lookup of rendered segment metadata.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("ffprobe binary not found: {0}")]
    NotFound(#[source] std::io::Error),

    #[error("ffprobe failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to parse ffprobe output: {0}")]
    Parse(String),

    #[error("Video file not found: {0}")]
    VideoNotFound(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Subset of `ffprobe -print_format json -show_format` output.
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    /// Seconds as a decimal string, e.g. `"3.466667"`.
    pub duration: Option<String>,
    pub format_name: Option<String>,
}

impl FfprobeOutput {
    /// Container duration in whole milliseconds.
    pub fn duration_ms(&self) -> Option<i64> {
        let secs: f64 = self.format.duration.as_deref()?.trim().parse().ok()?;
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        Some((secs * 1000.0).round() as i64)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run `ffprobe` on a video file and return the parsed format section.
pub async fn probe_video(ffprobe_bin: &str, path: &Path) -> Result<FfprobeOutput, ProbeError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(ProbeError::VideoNotFound(path.to_string_lossy().to_string()));
    }

    let output = tokio::process::Command::new(ffprobe_bin)
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(ProbeError::NotFound)?;

    if !output.status.success() {
        return Err(ProbeError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    parse_output(&String::from_utf8_lossy(&output.stdout))
}

/// Duration of `path` in milliseconds, or `None` when probing fails.
///
/// A missing `ffprobe` never fails a render; the segment simply has no
/// duration.
pub async fn duration_ms(ffprobe_bin: &str, path: &Path) -> Option<i64> {
    match probe_video(ffprobe_bin, path).await {
        Ok(probe) => probe.duration_ms(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not probe segment duration");
            None
        }
    }
}

fn parse_output(stdout: &str) -> Result<FfprobeOutput, ProbeError> {
    serde_json::from_str::<FfprobeOutput>(stdout).map_err(|e| ProbeError::Parse(format!("{e}: {stdout}")))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_format_duration() {
        let probe = parse_output(
            r#"{"format": {"filename": "a.mp4", "duration": "3.466667", "format_name": "mov,mp4"}}"#,
        )
        .unwrap();
        assert_eq!(probe.duration_ms(), Some(3467));
    }

    #[test]
    fn missing_or_bad_duration_is_none() {
        let probe = parse_output(r#"{"format": {}}"#).unwrap();
        assert_eq!(probe.duration_ms(), None);

        let probe = parse_output(r#"{"format": {"duration": "N/A"}}"#).unwrap();
        assert_eq!(probe.duration_ms(), None);
    }

    #[test]
    fn garbage_is_parse_error() {
        assert_matches!(parse_output("not json"), Err(ProbeError::Parse(_)));
    }

    #[tokio::test]
    async fn missing_file_has_no_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.mp4");
        assert_matches!(
            probe_video("ffprobe", &path).await,
            Err(ProbeError::VideoNotFound(_))
        );
        assert_eq!(duration_ms("ffprobe", &path).await, None);
    }
}
