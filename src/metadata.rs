use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::foundation::error::{SupercutError, SupercutResult};
use crate::job::config::TrackSpec;

/// Title used when neither tags nor the file name yield anything printable.
pub const PLACEHOLDER_TITLE: &str = "Untitled Track";

/// Environment variable overriding the `ffprobe` binary.
pub const FFPROBE_ENV: &str = "SUPERCUT_FFPROBE";

/// What a probe could learn about an audio file. Either field may be missing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioInfo {
    pub duration: Option<f64>,
    pub title: Option<String>,
}

/// Source of media metadata.
pub trait MediaProbe: Send + Sync {
    fn probe_audio(&self, path: &Path) -> SupercutResult<AudioInfo>;

    /// Pixel size of the first video stream (stills count as video).
    fn probe_dimensions(&self, path: &Path) -> SupercutResult<(u32, u32)>;
}

/// An audio track ready for timeline placement.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioTrack {
    pub path: PathBuf,
    /// Seconds, always finite and > 0.
    pub duration: f64,
    /// Never empty.
    pub title: String,
}

/// [`MediaProbe`] backed by the system `ffprobe`.
#[derive(Clone, Debug)]
pub struct FfprobeProbe {
    program: PathBuf,
}

impl FfprobeProbe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use `$SUPERCUT_FFPROBE`, else `ffprobe` from PATH.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os(FFPROBE_ENV).unwrap_or_else(|| "ffprobe".into()))
    }

    fn run_json(&self, path: &Path, args: &[&str]) -> SupercutResult<Vec<u8>> {
        let out = Command::new(&self.program)
            .args(["-v", "error", "-print_format", "json"])
            .args(args)
            .arg(path)
            .output()
            .map_err(|e| {
                SupercutError::probe(format!(
                    "failed to run '{}': {e}",
                    self.program.display()
                ))
            })?;
        if !out.status.success() {
            return Err(SupercutError::probe(format!(
                "ffprobe failed for '{}': {}",
                path.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(out.stdout)
    }
}

impl MediaProbe for FfprobeProbe {
    fn probe_audio(&self, path: &Path) -> SupercutResult<AudioInfo> {
        let stdout = self.run_json(path, &["-show_format"])?;
        parse_format_json(&stdout)
    }

    fn probe_dimensions(&self, path: &Path) -> SupercutResult<(u32, u32)> {
        let stdout = self.run_json(path, &["-show_streams", "-select_streams", "v:0"])?;
        parse_streams_json(&stdout).map_err(|e| match e {
            SupercutError::Probe(msg) => SupercutError::probe(format!("'{}': {msg}", path.display())),
            other => other,
        })
    }
}

fn parse_format_json(bytes: &[u8]) -> SupercutResult<AudioInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
        #[serde(default)]
        tags: BTreeMap<String, String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        format: ProbeFormat,
    }

    let parsed: ProbeOut = serde_json::from_slice(bytes)
        .map_err(|e| SupercutError::probe(format!("ffprobe json parse failed: {e}")))?;
    let duration = parsed
        .format
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<f64>().ok());
    let title = parsed
        .format
        .tags
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("title"))
        .map(|(_, v)| v.clone());
    Ok(AudioInfo { duration, title })
}

fn parse_streams_json(bytes: &[u8]) -> SupercutResult<(u32, u32)> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        width: Option<u32>,
        height: Option<u32>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        #[serde(default)]
        streams: Vec<ProbeStream>,
    }

    let parsed: ProbeOut = serde_json::from_slice(bytes)
        .map_err(|e| SupercutError::probe(format!("ffprobe json parse failed: {e}")))?;
    let stream = parsed
        .streams
        .first()
        .ok_or_else(|| SupercutError::probe("no video stream found"))?;
    match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(SupercutError::probe("missing video width/height from ffprobe")),
    }
}

/// [`MediaProbe`] answering from fixed tables; unknown paths report nothing.
#[derive(Clone, Debug, Default)]
pub struct StaticProbe {
    pub audio: BTreeMap<PathBuf, AudioInfo>,
    pub dimensions: BTreeMap<PathBuf, (u32, u32)>,
}

impl StaticProbe {
    pub fn with_audio(mut self, path: impl Into<PathBuf>, duration: f64, title: Option<&str>) -> Self {
        self.audio.insert(
            path.into(),
            AudioInfo {
                duration: Some(duration),
                title: title.map(str::to_owned),
            },
        );
        self
    }

    pub fn with_dimensions(mut self, path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        self.dimensions.insert(path.into(), (width, height));
        self
    }
}

impl MediaProbe for StaticProbe {
    fn probe_audio(&self, path: &Path) -> SupercutResult<AudioInfo> {
        Ok(self.audio.get(path).cloned().unwrap_or_default())
    }

    fn probe_dimensions(&self, path: &Path) -> SupercutResult<(u32, u32)> {
        self.dimensions.get(path).copied().ok_or_else(|| {
            SupercutError::probe(format!("no dimensions known for '{}'", path.display()))
        })
    }
}

/// Display title for a track: embedded tag, else the cleaned file stem, else
/// [`PLACEHOLDER_TITLE`]. Never fails.
pub fn resolve_title(path: &Path, probe: &dyn MediaProbe) -> String {
    let tag = match probe.probe_audio(path) {
        Ok(info) => info.title,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "title tag unavailable");
            None
        }
    };
    title_or_fallback(tag.as_deref(), path)
}

fn title_or_fallback(tag: Option<&str>, path: &Path) -> String {
    if let Some(t) = tag.and_then(clean_tag) {
        return t;
    }
    path.file_stem()
        .map(|s| s.to_string_lossy())
        .and_then(|s| sanitize_title(&s))
        .unwrap_or_else(|| PLACEHOLDER_TITLE.to_owned())
}

fn clean_tag(tag: &str) -> Option<String> {
    let s: String = tag
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    collapse_whitespace(&s)
}

/// Replace characters that are unsafe in file names with `_` and collapse whitespace.
///
/// Returns `None` when nothing printable remains.
pub fn sanitize_title(raw: &str) -> Option<String> {
    let s: String = raw
        .chars()
        .map(|c| {
            if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control()
            {
                '_'
            } else {
                c
            }
        })
        .collect();
    collapse_whitespace(&s)
}

fn collapse_whitespace(s: &str) -> Option<String> {
    let out = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if out.is_empty() { None } else { Some(out) }
}

/// Resolve title and duration for one job track. Explicit values in the job win over probing.
#[tracing::instrument(skip_all, fields(path = %spec.path.display()))]
pub fn resolve_track(spec: &TrackSpec, probe: &dyn MediaProbe) -> SupercutResult<AudioTrack> {
    let probed = if spec.duration.is_some() && spec.title.is_some() {
        AudioInfo::default()
    } else {
        match probe.probe_audio(&spec.path) {
            Ok(info) => info,
            Err(e) if spec.duration.is_some() => {
                tracing::debug!(error = %e, "probe failed; using explicit duration");
                AudioInfo::default()
            }
            Err(e) => {
                return Err(SupercutError::validation(format!(
                    "cannot determine duration of track '{}': {e}",
                    spec.path.display()
                )));
            }
        }
    };

    let duration = spec.duration.or(probed.duration).ok_or_else(|| {
        SupercutError::validation(format!(
            "track '{}' has no known duration",
            spec.path.display()
        ))
    })?;
    if !duration.is_finite() || duration <= 0.0 {
        return Err(SupercutError::validation(format!(
            "track '{}' has invalid duration {duration}",
            spec.path.display()
        )));
    }

    let tag = spec.title.as_deref().or(probed.title.as_deref());
    let title = title_or_fallback(tag, &spec.path);
    Ok(AudioTrack {
        path: spec.path.clone(),
        duration,
        title,
    })
}

/// Pixel size of an image or video file. Images are read through `image`, anything else goes
/// to the probe.
pub fn media_dimensions(path: &Path, probe: &dyn MediaProbe) -> SupercutResult<(u32, u32)> {
    if !path.is_file() {
        return Err(SupercutError::missing_asset(format!(
            "'{}' does not exist",
            path.display()
        )));
    }
    match image::image_dimensions(path) {
        Ok(dims) => Ok(dims),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "not a still image, probing");
            probe.probe_dimensions(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_prefers_tag_then_stem_then_placeholder() {
        let probe = StaticProbe::default()
            .with_audio("a.mp3", 10.0, Some("  Midnight\tCity "))
            .with_audio("b.mp3", 10.0, Some("   "));
        assert_eq!(resolve_title(Path::new("a.mp3"), &probe), "Midnight City");
        assert_eq!(resolve_title(Path::new("b.mp3"), &probe), "b");
        assert_eq!(
            resolve_title(Path::new("dir/what?:is*this.mp3"), &probe),
            "what__is_this"
        );
        assert_eq!(resolve_title(Path::new("   .mp3"), &probe), PLACEHOLDER_TITLE);
    }

    #[test]
    fn failing_probe_still_yields_a_title() {
        struct Broken;
        impl MediaProbe for Broken {
            fn probe_audio(&self, _: &Path) -> SupercutResult<AudioInfo> {
                Err(SupercutError::probe("nope"))
            }
            fn probe_dimensions(&self, _: &Path) -> SupercutResult<(u32, u32)> {
                Err(SupercutError::probe("nope"))
            }
        }
        assert_eq!(resolve_title(Path::new("x/Song One.mp3"), &Broken), "Song One");
    }

    #[test]
    fn resolve_track_merges_explicit_and_probed_values() {
        let probe = StaticProbe::default().with_audio("t.mp3", 181.5, Some("Tagged"));

        let t = resolve_track(&TrackSpec::new("t.mp3"), &probe).unwrap();
        assert_eq!(t.duration, 181.5);
        assert_eq!(t.title, "Tagged");

        let mut spec = TrackSpec::new("t.mp3");
        spec.duration = Some(12.0);
        spec.title = Some("Override".into());
        let t = resolve_track(&spec, &probe).unwrap();
        assert_eq!((t.duration, t.title.as_str()), (12.0, "Override"));
    }

    #[test]
    fn resolve_track_requires_positive_duration() {
        let probe = StaticProbe::default();
        let err = resolve_track(&TrackSpec::new("missing.mp3"), &probe).unwrap_err();
        assert!(err.to_string().contains("missing.mp3"));

        let probe = StaticProbe::default().with_audio("z.mp3", 0.0, None);
        assert!(resolve_track(&TrackSpec::new("z.mp3"), &probe).is_err());
    }

    #[test]
    fn parses_ffprobe_format_output() {
        let json = br#"{"format":{"filename":"a.mp3","duration":"215.040000","tags":{"TITLE":"Hello","artist":"X"}}}"#;
        let info = parse_format_json(json).unwrap();
        assert_eq!(info.duration, Some(215.04));
        assert_eq!(info.title.as_deref(), Some("Hello"));

        let info = parse_format_json(br#"{"format":{}}"#).unwrap();
        assert_eq!(info, AudioInfo::default());
    }

    #[test]
    fn parses_ffprobe_stream_output() {
        let json = br#"{"streams":[{"codec_type":"video","width":640,"height":360}]}"#;
        assert_eq!(parse_streams_json(json).unwrap(), (640, 360));
        assert!(parse_streams_json(br#"{"streams":[]}"#).is_err());
    }

    #[test]
    fn media_dimensions_reports_missing_files() {
        let err = media_dimensions(Path::new("/definitely/not/here.png"), &StaticProbe::default())
            .unwrap_err();
        assert!(matches!(err, SupercutError::MissingAsset(_)));
    }
}
