//! Production [`SceneRenderer`]: manim in a sandboxed subprocess.
//!
//! Every render gets a fresh directory `{jobs_dir}/{workspace_id}/{job_id}/`
//! holding `scene.py` and manim's `media/` output. Manim is run with
//! `--save_sections`, so the turn just added is the last section video.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use manimai_core::output::OutputParams;
use manimai_core::scene::{find_scene_class, NEXT_SECTION_CALL};
use manimai_core::types::DbId;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::probe;
use crate::renderer::{RenderFailure, RenderRequest, RenderedSegment, SceneRenderer};
use crate::sandbox::{self, run_isolated, SandboxError, SandboxLimits};

pub const SCENE_FILE: &str = "scene.py";
pub const MEDIA_DIR: &str = "media";

/// Host variables a render may see; everything else is cleared.
const PASSTHROUGH_ENV: [&str; 3] = ["PATH", "HOME", "LANG"];

#[derive(Debug, Clone)]
pub struct ManimConfig {
    /// Program and leading arguments, e.g. `["manim"]` or
    /// `["python3", "-m", "manim"]`.
    pub command: Vec<String>,
    pub ffprobe_bin: String,
    /// Root of per-job render directories.
    pub jobs_dir: PathBuf,
    pub limits: SandboxLimits,
}

impl ManimConfig {
    /// Split a configured command line on whitespace.
    pub fn parse_command(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }
}

pub struct ManimRenderer {
    config: ManimConfig,
}

impl ManimRenderer {
    pub fn new(config: ManimConfig) -> Self {
        Self { config }
    }

    pub fn job_dir(&self, workspace_id: DbId, job_id: DbId) -> PathBuf {
        self.config
            .jobs_dir
            .join(workspace_id.to_string())
            .join(job_id.to_string())
    }

    fn command(&self, dir: &Path, output: &OutputParams, class_name: &str) -> Result<Command, RenderFailure> {
        let (program, leading) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| RenderFailure::error("Manim command is not configured"))?;

        let mut cmd = Command::new(program);
        cmd.args(leading)
            .args(manim_args(output, class_name))
            .current_dir(dir)
            .env_clear();
        for key in PASSTHROUGH_ENV {
            if let Some(value) = std::env::var_os(key) {
                cmd.env(key, value);
            }
        }
        cmd.env("PYTHONUNBUFFERED", "1");
        Ok(cmd)
    }

    fn map_sandbox_error(&self, err: SandboxError) -> RenderFailure {
        match err {
            SandboxError::Spawn(e) => RenderFailure::error(format!(
                "Could not start manim ({}): {e}",
                self.config.command.join(" ")
            )),
            SandboxError::Io(e) => RenderFailure::error(format!("Lost track of the manim process: {e}")),
            SandboxError::Timeout { stdout, stderr, .. } => RenderFailure::Timeout {
                timeout_secs: self.config.limits.timeout.as_secs(),
                diagnostics: Some(sandbox::diagnostics(&stdout, &stderr)),
            },
            SandboxError::Cancelled { .. } => RenderFailure::Cancelled,
            SandboxError::KillTimeout { grace_ms } => RenderFailure::CancelTimeout { grace_ms },
        }
    }
}

#[async_trait]
impl SceneRenderer for ManimRenderer {
    async fn render(
        &self,
        request: RenderRequest,
        cancel: CancellationToken,
    ) -> Result<RenderedSegment, RenderFailure> {
        let class_name = find_scene_class(&request.scene_code)
            .ok_or_else(|| RenderFailure::error("No Scene subclass found in generated code"))?
            .to_string();

        let dir = self.job_dir(request.workspace_id, request.job_id);
        prepare_job_dir(&dir, &request.scene_code).await.map_err(|e| {
            RenderFailure::error(format!("Could not prepare render directory {}: {e}", dir.display()))
        })?;

        let cmd = self.command(&dir, &request.output, &class_name)?;
        tracing::info!(
            job_id = request.job_id,
            workspace_id = request.workspace_id,
            scene = %class_name,
            dir = %dir.display(),
            "Starting render",
        );

        let output = run_isolated(cmd, &self.config.limits, &cancel)
            .await
            .map_err(|e| self.map_sandbox_error(e))?;

        if !output.success() {
            return Err(RenderFailure::Error {
                message: format!("manim exited with code {}", output.exit_code),
                diagnostics: Some(output.diagnostics()),
            });
        }

        let media = dir.join(MEDIA_DIR);
        let expected = expected_sections(&request.scene_code);
        let artifact = tokio::task::spawn_blocking(move || find_artifact(&media, expected))
            .await
            .unwrap_or(Err(ArtifactError::Missing))
            .map_err(|e| RenderFailure::Error {
                message: e.to_string(),
                diagnostics: Some(output.diagnostics()),
            })?;

        let duration_ms = probe::duration_ms(&self.config.ffprobe_bin, &artifact).await;
        tracing::info!(
            job_id = request.job_id,
            artifact = %artifact.display(),
            duration_ms,
            render_ms = output.duration_ms,
            "Render finished",
        );

        Ok(RenderedSegment {
            artifact_path: artifact,
            duration_ms,
            output: request.output,
        })
    }
}

/// Manim CLI arguments after the program itself.
pub fn manim_args(output: &OutputParams, class_name: &str) -> Vec<String> {
    vec![
        "-q".to_string(),
        output.quality.manim_flag().to_string(),
        "-r".to_string(),
        output.manim_resolution(),
        "--fps".to_string(),
        output.frame_rate.to_string(),
        "--format".to_string(),
        "mp4".to_string(),
        "--media_dir".to_string(),
        MEDIA_DIR.to_string(),
        "--save_sections".to_string(),
        SCENE_FILE.to_string(),
        class_name.to_string(),
    ]
}

/// Start from an empty directory so stale output is never picked up.
async fn prepare_job_dir(dir: &Path, scene_code: &str) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(SCENE_FILE), scene_code).await
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ArtifactError {
    #[error("manim finished without producing a video")]
    Missing,

    /// Manim writes no section video for a turn without animations, so the
    /// last section would belong to an earlier turn.
    #[error("Expected {expected} section videos but manim wrote {found}; the latest turn produced no animation")]
    SectionCount { expected: usize, found: usize },
}

/// Sections a composed scene renders: one per accepted turn.
pub fn expected_sections(scene_code: &str) -> usize {
    1 + scene_code
        .lines()
        .filter(|line| line.trim() == NEXT_SECTION_CALL)
        .count()
}

/// The video for the newest section, else the newest `.mp4` anywhere.
///
/// When section videos exist there must be exactly `expected` of them.
pub fn find_artifact(media_dir: &Path, expected: usize) -> Result<PathBuf, ArtifactError> {
    let mut sections = Vec::new();
    for scene_dir in read_dirs(&media_dir.join("videos")) {
        for quality_dir in read_dirs(&scene_dir) {
            sections.extend(mp4_files(&quality_dir.join("sections")));
        }
    }
    if !sections.is_empty() {
        if sections.len() != expected {
            return Err(ArtifactError::SectionCount {
                expected,
                found: sections.len(),
            });
        }
        // Section files are numbered with zero padding, so names sort in order.
        return sections
            .into_iter()
            .max_by(|a, b| a.file_name().cmp(&b.file_name()))
            .ok_or(ArtifactError::Missing);
    }

    let mut all = Vec::new();
    collect_mp4s(media_dir, &mut all);
    all.into_iter()
        .filter_map(|path| {
            let modified = path.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path)
        .ok_or(ArtifactError::Missing)
}

fn read_dirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect()
}

fn is_mp4(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
}

fn mp4_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_mp4(p))
        .collect()
}

fn collect_mp4s(dir: &Path, out: &mut Vec<PathBuf>) {
    // Fragments of the final movie, never a deliverable on their own.
    if dir.file_name().is_some_and(|n| n == "partial_movie_files") {
        return;
    }
    out.extend(mp4_files(dir));
    for sub in read_dirs(dir) {
        collect_mp4s(&sub, out);
    }
}

#[cfg(test)]
mod tests {
    use manimai_core::output::Quality;
    use manimai_core::scene::compose_scene;

    use super::*;

    #[test]
    fn args_follow_output_params() {
        let output = OutputParams {
            width: 1280,
            height: 720,
            frame_rate: 60,
            quality: Quality::High,
        };
        assert_eq!(
            manim_args(&output, "Demo").join(" "),
            "-q h -r 1280,720 --fps 60 --format mp4 --media_dir media --save_sections scene.py Demo"
        );
    }

    #[test]
    fn default_output_renders_at_ultra() {
        let args = manim_args(&OutputParams::default(), "Demo");
        assert_eq!(&args[..6], ["-q", "k", "-r", "1920,1080", "--fps", "30"]);
    }

    #[test]
    fn command_line_splits_on_whitespace() {
        assert_eq!(ManimConfig::parse_command(" python3  -m manim "), ["python3", "-m", "manim"]);
        assert!(ManimConfig::parse_command("   ").is_empty());
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn last_section_wins() {
        let dir = tempfile::tempdir().unwrap();
        let sections = dir.path().join("videos/scene/1080p30/sections");
        touch(&sections.join("Demo_0001_autocreated.mp4"));
        touch(&sections.join("Demo_0000_autocreated.mp4"));
        touch(&sections.join("Demo.json"));
        touch(&dir.path().join("videos/scene/1080p30/Demo.mp4"));

        assert_eq!(
            find_artifact(dir.path(), 2),
            Ok(sections.join("Demo_0001_autocreated.mp4"))
        );
    }

    #[test]
    fn turn_without_section_video_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sections = dir.path().join("videos/scene/1080p30/sections");
        touch(&sections.join("Demo_0000_autocreated.mp4"));
        touch(&sections.join("Demo_0001_autocreated.mp4"));

        assert_eq!(
            find_artifact(dir.path(), 3),
            Err(ArtifactError::SectionCount { expected: 3, found: 2 })
        );
    }

    #[test]
    fn sections_counted_from_scene_code() {
        assert_eq!(expected_sections("class Demo(Scene):\n    def construct(self):\n        self.wait()\n"), 1);
        let composed = compose_scene(&[
            "class Demo(Scene):\n    def construct(self):\n        self.wait()\n",
            "self.play(Create(Circle()))\n",
            "self.wait()\n",
        ])
        .unwrap();
        assert_eq!(expected_sections(&composed), 3);
    }

    #[test]
    fn falls_back_to_full_movie_without_sections() {
        let dir = tempfile::tempdir().unwrap();
        let movie = dir.path().join("videos/scene/480p15/Demo.mp4");
        touch(&movie);
        touch(&dir.path().join("videos/scene/480p15/partial_movie_files/Demo/0001.mp4"));

        assert_eq!(find_artifact(dir.path(), 1), Ok(movie));
    }

    #[test]
    fn empty_media_dir_has_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_artifact(dir.path(), 1), Err(ArtifactError::Missing));
        assert_eq!(find_artifact(&dir.path().join("missing"), 1), Err(ArtifactError::Missing));
    }
}
