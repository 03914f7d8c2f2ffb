use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::foundation::error::{SupercutError, SupercutResult};
use crate::graph::model::MediaKind;
use crate::render::adapter::{RenderAdapter, RenderRequest};

/// Environment variable overriding the `ffmpeg` binary.
pub const FFMPEG_ENV: &str = "SUPERCUT_FFMPEG";

/// [`RenderAdapter`] that runs the system `ffmpeg` with a `-filter_complex` graph.
#[derive(Clone, Debug)]
pub struct FfmpegRenderer {
    program: PathBuf,
    poll_interval: Duration,
}

impl FfmpegRenderer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Use `$SUPERCUT_FFMPEG`, else `ffmpeg` from PATH.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os(FFMPEG_ENV).unwrap_or_else(|| "ffmpeg".into()))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Return `true` when the configured binary answers `-version`.
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Full ffmpeg argument list for a request (without the program name).
pub fn build_ffmpeg_args(req: &RenderRequest<'_>) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-hide_banner", "-loglevel", "error"]
        .map(String::from)
        .to_vec();

    let fps = req.fps.to_string();
    let fps = fps.as_str();
    for input in &req.graph.inputs {
        match input.kind {
            MediaKind::Still => {
                args.extend(["-loop", "1", "-framerate", fps].map(String::from));
            }
            MediaKind::Animated => {
                args.extend(["-stream_loop", "-1"].map(String::from));
            }
            MediaKind::Audio => {}
        }
        args.push("-i".to_owned());
        args.push(input.path.to_string_lossy().into_owned());
    }

    args.push("-filter_complex".to_owned());
    args.push(req.graph.to_filter_complex());
    args.push("-map".to_owned());
    args.push(format!("[{}]", req.graph.video_output));
    if let Some(aout) = &req.graph.audio_output {
        args.push("-map".to_owned());
        args.push(format!("[{aout}]"));
    }

    let enc = req.encode;
    let gop = enc.gop.to_string();
    let b_frames = enc.b_frames.to_string();
    args.extend(
        [
            "-c:v",
            enc.video_codec.as_str(),
            "-preset",
            enc.preset.as_str(),
            "-b:v",
            enc.video_bitrate.as_str(),
            "-maxrate",
            enc.maxrate.as_str(),
            "-bufsize",
            enc.bufsize.as_str(),
            "-r",
            fps,
            "-g",
            gop.as_str(),
            "-bf",
            b_frames.as_str(),
        ]
        .map(String::from),
    );
    if let Some(profile) = &enc.profile {
        args.extend(["-profile:v".to_owned(), profile.clone()]);
    }
    if let Some(level) = &enc.level {
        args.extend(["-level:v".to_owned(), level.clone()]);
    }
    args.extend(["-pix_fmt", "yuv420p"].map(String::from));

    if req.graph.audio_output.is_some() {
        let rate = enc.sample_rate.to_string();
        let channels = enc.channels.to_string();
        args.extend(
            [
                "-c:a",
                enc.audio_codec.as_str(),
                "-b:a",
                enc.audio_bitrate.as_str(),
                "-ar",
                rate.as_str(),
                "-ac",
                channels.as_str(),
            ]
            .map(String::from),
        );
    } else {
        args.push("-an".to_owned());
    }

    args.push("-t".to_owned());
    args.push(format!("{:.3}", req.duration));
    if enc.faststart {
        args.extend(["-movflags", "+faststart"].map(String::from));
    }
    args.push(req.output.to_string_lossy().into_owned());
    args
}

impl RenderAdapter for FfmpegRenderer {
    #[tracing::instrument(skip_all, fields(output = %req.output.display()))]
    fn render(&self, req: &RenderRequest<'_>) -> SupercutResult<PathBuf> {
        req.cancel.check()?;
        ensure_parent_dir(req.output)?;

        let args = build_ffmpeg_args(req);
        tracing::debug!(program = %self.program.display(), args = ?args, "spawning ffmpeg");
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SupercutError::render(format!(
                    "failed to spawn '{}' (is it installed and on PATH?): {e}",
                    self.program.display()
                ))
            })?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| SupercutError::render("failed to open ffmpeg stderr (unexpected)"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok::<_, std::io::Error>(stderr_bytes)
        });

        let status = loop {
            if req.cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                let _ = stderr_drain.join();
                remove_partial(req.output);
                tracing::warn!("render cancelled; ffmpeg killed");
                return Err(SupercutError::Cancelled);
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => std::thread::sleep(self.poll_interval),
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    remove_partial(req.output);
                    return Err(SupercutError::render(format!(
                        "failed to wait for ffmpeg: {e}"
                    )));
                }
            }
        };

        let stderr_bytes = stderr_drain
            .join()
            .map_err(|_| SupercutError::render("ffmpeg stderr drain thread panicked"))?
            .map_err(|e| SupercutError::render(format!("ffmpeg stderr read failed: {e}")))?;

        if !status.success() {
            remove_partial(req.output);
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(SupercutError::render(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }
        Ok(req.output.to_path_buf())
    }
}

fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove partial output");
    }
}

pub fn ensure_parent_dir(path: &Path) -> SupercutResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::{FilterGraph, MediaInput, Node, Op, StreamRef};
    use crate::job::config::EncodeSettings;
    use crate::render::adapter::CancelToken;

    fn graph(with_audio: bool) -> FilterGraph {
        let mut inputs = vec![
            MediaInput {
                path: "bg.png".into(),
                kind: MediaKind::Still,
            },
            MediaInput {
                path: "loop.gif".into(),
                kind: MediaKind::Animated,
            },
        ];
        let mut nodes = vec![Node {
            layer: None,
            segment: None,
            inputs: vec![StreamRef::Video(0), StreamRef::Video(1)],
            op: Op::Position {
                x: 0,
                y: 0,
                window: None,
            },
            output: "vout".into(),
        }];
        if with_audio {
            inputs.push(MediaInput {
                path: "a.mp3".into(),
                kind: MediaKind::Audio,
            });
            nodes.insert(
                0,
                Node {
                    layer: None,
                    segment: None,
                    inputs: vec![StreamRef::Audio(2)],
                    op: Op::AudioConcat { count: 1 },
                    output: "aout".into(),
                },
            );
        }
        FilterGraph {
            inputs,
            nodes,
            video_output: "vout".into(),
            audio_output: with_audio.then(|| "aout".to_owned()),
        }
    }

    fn value_after(args: &[String], flag: &str) -> Option<String> {
        let i = args.iter().position(|a| a == flag)?;
        args.get(i + 1).cloned()
    }

    #[test]
    fn args_loop_inputs_and_map_outputs() {
        let g = graph(true);
        let encode = EncodeSettings::default();
        let cancel = CancelToken::new();
        let req = RenderRequest {
            graph: &g,
            output: Path::new("out/video.partial.mp4"),
            encode: &encode,
            fps: 24,
            duration: 95.5,
            cancel: &cancel,
        };
        let args = build_ffmpeg_args(&req);
        let joined = args.join(" ");
        assert!(joined.contains("-loop 1 -framerate 24 -i bg.png"));
        assert!(joined.contains("-stream_loop -1 -i loop.gif"));
        assert!(joined.contains("-i a.mp3"));
        assert!(joined.contains("-map [vout] -map [aout]"));
        assert_eq!(value_after(&args, "-b:v").as_deref(), Some("12M"));
        assert_eq!(value_after(&args, "-g").as_deref(), Some("120"));
        assert_eq!(value_after(&args, "-ar").as_deref(), Some("48000"));
        assert_eq!(value_after(&args, "-t").as_deref(), Some("95.500"));
        assert_eq!(value_after(&args, "-movflags").as_deref(), Some("+faststart"));
        assert_eq!(args.last().map(String::as_str), Some("out/video.partial.mp4"));
    }

    #[test]
    fn args_without_audio_disable_audio() {
        let g = graph(false);
        let encode = EncodeSettings {
            profile: None,
            faststart: false,
            ..EncodeSettings::default()
        };
        let cancel = CancelToken::new();
        let req = RenderRequest {
            graph: &g,
            output: Path::new("o.mp4"),
            encode: &encode,
            fps: 30,
            duration: 1.0,
            cancel: &cancel,
        };
        let args = build_ffmpeg_args(&req);
        assert!(args.contains(&"-an".to_owned()));
        assert!(!args.contains(&"-c:a".to_owned()));
        assert!(!args.contains(&"-profile:v".to_owned()));
        assert!(!args.contains(&"-movflags".to_owned()));
    }

    #[test]
    fn cancelled_request_never_spawns() {
        let g = graph(false);
        let encode = EncodeSettings::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let renderer = FfmpegRenderer::new("/nonexistent/ffmpeg");
        let req = RenderRequest {
            graph: &g,
            output: Path::new("never.mp4"),
            encode: &encode,
            fps: 24,
            duration: 1.0,
            cancel: &cancel,
        };
        assert!(matches!(renderer.render(&req), Err(SupercutError::Cancelled)));
    }

    #[test]
    fn missing_binary_is_a_render_error() {
        let g = graph(false);
        let encode = EncodeSettings::default();
        let cancel = CancelToken::new();
        let renderer = FfmpegRenderer::new("/nonexistent/ffmpeg");
        assert!(!renderer.is_available());
        let out = std::env::temp_dir().join(format!("supercut_missing_bin_{}.mp4", std::process::id()));
        let req = RenderRequest {
            graph: &g,
            output: &out,
            encode: &encode,
            fps: 24,
            duration: 1.0,
            cancel: &cancel,
        };
        assert!(matches!(renderer.render(&req), Err(SupercutError::Render(_))));
        assert!(!out.exists());
    }
}
