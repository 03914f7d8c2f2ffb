use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::foundation::core::{Canvas, Rgba8};
use crate::foundation::error::{SupercutError, SupercutResult};
use crate::layer::model::{LayerConfig, default_layer_stack, validate_layers};
use crate::layer::order::LayerOverride;
use crate::raster::title::TitleStyle;

/// Encoder settings handed to the renderer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeSettings {
    pub video_codec: String,
    pub preset: String,
    pub video_bitrate: String,
    pub maxrate: String,
    pub bufsize: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Keyframe interval in frames.
    pub gop: u32,
    pub b_frames: u32,
    pub profile: Option<String>,
    pub level: Option<String>,
    pub faststart: bool,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_owned(),
            preset: "slow".to_owned(),
            video_bitrate: "12M".to_owned(),
            maxrate: "16M".to_owned(),
            bufsize: "24M".to_owned(),
            audio_codec: "aac".to_owned(),
            audio_bitrate: "384k".to_owned(),
            sample_rate: 48_000,
            channels: 2,
            gop: 120,
            b_frames: 2,
            profile: Some("high".to_owned()),
            level: Some("4.2".to_owned()),
            faststart: true,
        }
    }
}

impl EncodeSettings {
    pub fn validate(&self) -> SupercutResult<()> {
        if self.video_codec.trim().is_empty() || self.audio_codec.trim().is_empty() {
            return Err(SupercutError::validation("encode codecs must be non-empty"));
        }
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(SupercutError::validation(
                "encode sample_rate/channels must be non-zero",
            ));
        }
        if self.gop == 0 {
            return Err(SupercutError::validation("encode gop must be >= 1"));
        }
        Ok(())
    }
}

/// `showwaves` drawing mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveMode {
    Point,
    Line,
    P2p,
    #[default]
    Cline,
}

impl WaveMode {
    pub fn as_ffmpeg(self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Line => "line",
            Self::P2p => "p2p",
            Self::Cline => "cline",
        }
    }
}

/// Look of the generated soundwave layer (used when the layer has no `source`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformStyle {
    pub width: u32,
    pub height: u32,
    pub mode: WaveMode,
    pub color: Rgba8,
}

impl Default for WaveformStyle {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 240,
            mode: WaveMode::Cline,
            color: Rgba8::WHITE,
        }
    }
}

/// Shared, immutable configuration for every job of a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default)]
    pub canvas: Canvas,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Silence before the first track, in seconds.
    #[serde(default)]
    pub start_offset: f64,
    #[serde(default = "default_layer_stack")]
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub layer_order: Option<Vec<LayerOverride>>,
    #[serde(default)]
    pub title: TitleStyle,
    #[serde(default)]
    pub soundwave: WaveformStyle,
    #[serde(default)]
    pub encode: EncodeSettings,
}

fn default_fps() -> u32 {
    24
}

impl Default for Template {
    fn default() -> Self {
        Self {
            canvas: Canvas::default(),
            fps: default_fps(),
            start_offset: 0.0,
            layers: default_layer_stack(),
            layer_order: None,
            title: TitleStyle::default(),
            soundwave: WaveformStyle::default(),
            encode: EncodeSettings::default(),
        }
    }
}

impl Template {
    /// Read a template JSON file. Relative layer sources and the font file resolve against the
    /// template's directory.
    pub fn from_json_file(path: &Path) -> SupercutResult<Self> {
        let f = File::open(path).with_context(|| format!("open template '{}'", path.display()))?;
        let mut template: Self = serde_json::from_reader(BufReader::new(f))
            .map_err(|e| SupercutError::serde(format!("template '{}': {e}", path.display())))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        template.rebase_paths(base);
        template.validate()?;
        Ok(template)
    }

    pub fn rebase_paths(&mut self, base: &Path) {
        for layer in &mut self.layers {
            if let Some(src) = layer.source.as_mut()
                && src.is_relative()
            {
                *src = base.join(&*src);
            }
        }
        if let Some(font) = self.title.font_file.as_mut()
            && font.is_relative()
        {
            *font = base.join(&*font);
        }
    }

    pub fn validate(&self) -> SupercutResult<()> {
        self.canvas.validate()?;
        if self.fps == 0 {
            return Err(SupercutError::validation("fps must be > 0"));
        }
        if !self.start_offset.is_finite() || self.start_offset < 0.0 {
            return Err(SupercutError::validation(format!(
                "start_offset must be finite and >= 0, got {}",
                self.start_offset
            )));
        }
        validate_layers(&self.layers)?;
        self.title.validate()?;
        if self.soundwave.width == 0 || self.soundwave.height == 0 {
            return Err(SupercutError::validation(
                "soundwave width/height must be non-zero",
            ));
        }
        self.encode.validate()
    }
}

/// One audio track of a job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackSpec {
    pub path: PathBuf,
    /// Seconds; probed when absent.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Display title; read from tags or the file name when absent.
    #[serde(default)]
    pub title: Option<String>,
}

impl TrackSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            duration: None,
            title: None,
        }
    }
}

/// One background image plus its tracks, producing one video.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub background: PathBuf,
    pub tracks: Vec<TrackSpec>,
    pub output: PathBuf,
}

impl JobSpec {
    /// Read a job JSON file. Relative paths resolve against the file's directory.
    pub fn from_json_file(path: &Path) -> SupercutResult<Self> {
        let f = File::open(path).with_context(|| format!("open job '{}'", path.display()))?;
        let mut job: Self = serde_json::from_reader(BufReader::new(f))
            .map_err(|e| SupercutError::serde(format!("job '{}': {e}", path.display())))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        rebase(&mut job.background);
        rebase(&mut job.output);
        for track in &mut job.tracks {
            rebase(&mut track.path);
        }
        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> SupercutResult<()> {
        if self.id.trim().is_empty() {
            return Err(SupercutError::validation("job id must be non-empty"));
        }
        if self.tracks.is_empty() {
            return Err(SupercutError::validation(format!(
                "job '{}' has no audio tracks",
                self.id
            )));
        }
        if self.output.file_name().is_none() {
            return Err(SupercutError::validation(format!(
                "job '{}' output '{}' is not a file path",
                self.id,
                self.output.display()
            )));
        }
        Ok(())
    }
}
