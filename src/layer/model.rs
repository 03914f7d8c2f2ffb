use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::foundation::error::{SupercutError, SupercutResult};

/// Number of numbered overlay slots (`overlay-1` ..= `overlay-10`).
pub const OVERLAY_SLOTS: u8 = 10;

/// Identity of a compositing layer.
///
/// The set is closed: templates name layers by string and anything outside this set is rejected
/// when the template is parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LayerId {
    Background,
    Intro,
    Overlay(u8),
    FrameBox,
    FrameCover,
    Soundwave,
    SongTitle,
}

impl LayerId {
    /// Layers that repeat once per audio track, gated to that track's segment.
    pub fn is_time_synced(self) -> bool {
        matches!(self, Self::SongTitle)
    }

    /// Layers whose image comes from the template's `source` path.
    pub fn requires_source(self) -> bool {
        matches!(
            self,
            Self::Intro | Self::Overlay(_) | Self::FrameBox | Self::FrameCover
        )
    }

    /// Short ffmpeg-label-safe stem, e.g. `ov3`, `title`.
    pub(crate) fn label_stem(self) -> String {
        match self {
            Self::Background => "bg".to_owned(),
            Self::Intro => "intro".to_owned(),
            Self::Overlay(n) => format!("ov{n}"),
            Self::FrameBox => "fbox".to_owned(),
            Self::FrameCover => "fcover".to_owned(),
            Self::Soundwave => "wave".to_owned(),
            Self::SongTitle => "title".to_owned(),
        }
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Background => f.write_str("background"),
            Self::Intro => f.write_str("intro"),
            Self::Overlay(n) => write!(f, "overlay-{n}"),
            Self::FrameBox => f.write_str("frame-box"),
            Self::FrameCover => f.write_str("frame-cover"),
            Self::Soundwave => f.write_str("soundwave"),
            Self::SongTitle => f.write_str("song-title"),
        }
    }
}

impl FromStr for LayerId {
    type Err = SupercutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        let id = match norm.as_str() {
            "background" | "bg" => Self::Background,
            "intro" => Self::Intro,
            "frame-box" => Self::FrameBox,
            "frame-cover" | "frame-mp3cover" => Self::FrameCover,
            "soundwave" => Self::Soundwave,
            "song-title" => Self::SongTitle,
            other => {
                let slot = other
                    .strip_prefix("overlay")
                    .map(|rest| rest.trim_start_matches('-'))
                    .and_then(|n| n.parse::<u8>().ok())
                    .filter(|n| (1..=OVERLAY_SLOTS).contains(n));
                match slot {
                    Some(n) => Self::Overlay(n),
                    None => {
                        return Err(SupercutError::validation(format!("unknown layer id '{s}'")));
                    }
                }
            }
        };
        Ok(id)
    }
}

impl TryFrom<String> for LayerId {
    type Error = SupercutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LayerId> for String {
    fn from(value: LayerId) -> Self {
        value.to_string()
    }
}

/// Anchor used when the scaled background is cropped back to the canvas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropPosition {
    #[default]
    Center,
    Top,
    Bottom,
    Left,
    Right,
}

/// Direction the frame drifts while a zoompan effect runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanDirection {
    #[default]
    Center,
    Left,
    Right,
    Up,
    Down,
}

/// Visual effect applied to a layer over its visibility window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    FadeIn,
    FadeOut,
    FadeInOut,
    ZoomPan,
    #[default]
    None,
}

impl EffectKind {
    /// Parse an effect name; unrecognised names degrade to [`EffectKind::None`].
    pub fn parse_lenient(s: &str) -> Self {
        let norm: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match norm.as_str() {
            "fadein" => Self::FadeIn,
            "fadeout" => Self::FadeOut,
            "fadeinout" => Self::FadeInOut,
            "zoompan" | "zoom" => Self::ZoomPan,
            "none" | "" => Self::None,
            _ => {
                tracing::warn!(effect = s, "unknown effect kind, falling back to none");
                Self::None
            }
        }
    }
}

impl<'de> Deserialize<'de> for EffectKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&s))
    }
}

/// Effect descriptor. `start_time` is relative to the start of the layer's window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EffectSpec {
    pub kind: EffectKind,
    /// Zoompan strength; the zoom target is `1 + 0.5 * intensity`.
    pub intensity: f64,
    pub start_time: Option<f64>,
    pub duration: Option<f64>,
    pub pan: PanDirection,
}

impl EffectSpec {
    pub fn none() -> Self {
        Self::of(EffectKind::None)
    }

    pub fn of(kind: EffectKind) -> Self {
        Self {
            kind,
            intensity: 1.0,
            start_time: None,
            duration: None,
            pan: PanDirection::Center,
        }
    }

    pub fn with_window(mut self, start_time: f64, duration: f64) -> Self {
        self.start_time = Some(start_time);
        self.duration = Some(duration);
        self
    }

    fn validate(&self, layer: LayerId) -> SupercutResult<()> {
        if !self.intensity.is_finite() || self.intensity < 0.0 {
            return Err(SupercutError::validation(format!(
                "layer '{layer}': effect intensity must be finite and >= 0"
            )));
        }
        if let Some(t) = self.start_time
            && (!t.is_finite() || t < 0.0)
        {
            return Err(SupercutError::validation(format!(
                "layer '{layer}': effect start_time must be finite and >= 0"
            )));
        }
        if let Some(d) = self.duration
            && (!d.is_finite() || d <= 0.0)
        {
            return Err(SupercutError::validation(format!(
                "layer '{layer}': effect duration must be finite and > 0"
            )));
        }
        Ok(())
    }
}

impl Default for EffectSpec {
    fn default() -> Self {
        Self::none()
    }
}

impl<'de> Deserialize<'de> for EffectSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Full {
            #[serde(default)]
            kind: EffectKind,
            #[serde(default = "one")]
            intensity: f64,
            #[serde(default)]
            start_time: Option<f64>,
            #[serde(default)]
            duration: Option<f64>,
            #[serde(default)]
            pan: PanDirection,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Full(Full),
        }

        fn one() -> f64 {
            1.0
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Name(s) => Self::of(EffectKind::parse_lenient(&s)),
            Repr::Full(f) => Self {
                kind: f.kind,
                intensity: f.intensity,
                start_time: f.start_time,
                duration: f.duration,
                pan: f.pan,
            },
        })
    }
}

/// When a layer is visible on the program timeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerTiming {
    /// Seconds from program start.
    #[serde(default)]
    pub start_at: f64,
    /// `None` keeps the layer visible until the program ends.
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Template configuration of one layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub id: LayerId,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Paint order; lower indices are painted first.
    pub order_index: i32,
    /// Image or video for overlay-type layers. The background's image comes from the job.
    #[serde(default)]
    pub source: Option<PathBuf>,
    /// Background zoom relative to the canvas (100 = exact cover).
    #[serde(default = "default_percent")]
    pub scale_percent: f64,
    /// Size relative to the layer's intrinsic dimensions.
    #[serde(default = "default_percent")]
    pub size_percent: f64,
    #[serde(default)]
    pub x_percent: f64,
    #[serde(default)]
    pub y_percent: f64,
    #[serde(default)]
    pub crop_position: CropPosition,
    #[serde(default)]
    pub effect: EffectSpec,
    #[serde(default)]
    pub timing: LayerTiming,
}

fn default_true() -> bool {
    true
}

fn default_percent() -> f64 {
    100.0
}

impl LayerConfig {
    pub fn new(id: LayerId, order_index: i32) -> Self {
        Self {
            id,
            enabled: true,
            order_index,
            source: None,
            scale_percent: 100.0,
            size_percent: 100.0,
            x_percent: 0.0,
            y_percent: 0.0,
            crop_position: CropPosition::Center,
            effect: EffectSpec::none(),
            timing: LayerTiming::default(),
        }
    }

    pub fn validate(&self) -> SupercutResult<()> {
        let id = self.id;
        let check_percent = |name: &str, v: f64, lo: f64, hi: f64| {
            if !v.is_finite() || v < lo || v > hi {
                return Err(SupercutError::validation(format!(
                    "layer '{id}': {name} must be within [{lo}, {hi}], got {v}"
                )));
            }
            Ok(())
        };
        check_percent("scale_percent", self.scale_percent, 100.0, 400.0)?;
        check_percent("x_percent", self.x_percent, 0.0, 100.0)?;
        check_percent("y_percent", self.y_percent, 0.0, 100.0)?;
        if !self.size_percent.is_finite() || self.size_percent <= 0.0 || self.size_percent > 400.0
        {
            return Err(SupercutError::validation(format!(
                "layer '{id}': size_percent must be within (0, 400], got {}",
                self.size_percent
            )));
        }

        if !self.timing.start_at.is_finite() || self.timing.start_at < 0.0 {
            return Err(SupercutError::validation(format!(
                "layer '{id}': timing.start_at must be finite and >= 0"
            )));
        }
        if let Some(d) = self.timing.duration
            && (!d.is_finite() || d <= 0.0)
        {
            return Err(SupercutError::validation(format!(
                "layer '{id}': timing.duration must be finite and > 0"
            )));
        }
        self.effect.validate(id)?;

        if self.enabled && self.id.requires_source() && self.source.is_none() {
            return Err(SupercutError::validation(format!(
                "layer '{id}' is enabled but has no source image"
            )));
        }
        Ok(())
    }
}

/// Validate a configured layer set as a whole.
pub fn validate_layers(layers: &[LayerConfig]) -> SupercutResult<()> {
    let mut ids = BTreeSet::new();
    let mut orders: BTreeMap<i32, LayerId> = BTreeMap::new();
    for layer in layers {
        if !ids.insert(layer.id) {
            return Err(SupercutError::validation(format!(
                "layer '{}' is configured more than once",
                layer.id
            )));
        }
        if let Some(prev) = orders.insert(layer.order_index, layer.id) {
            return Err(SupercutError::validation(format!(
                "layers '{prev}' and '{}' share order index {}",
                layer.id, layer.order_index
            )));
        }
        layer.validate()?;
    }
    if !ids.contains(&LayerId::Background) {
        return Err(SupercutError::validation(
            "template must configure the 'background' layer",
        ));
    }
    Ok(())
}

/// Stock layer stack: everything configured, only the background and song title enabled.
pub fn default_layer_stack() -> Vec<LayerConfig> {
    let mut out = Vec::with_capacity(16);
    out.push(LayerConfig::new(LayerId::Background, 0));

    let mut intro = LayerConfig::new(LayerId::Intro, 1);
    intro.enabled = false;
    intro.x_percent = 50.0;
    intro.y_percent = 50.0;
    intro.effect = EffectSpec::of(EffectKind::FadeOut).with_window(0.0, 6.0);
    intro.timing.duration = Some(6.0);
    out.push(intro);

    for n in 1..=OVERLAY_SLOTS {
        let mut overlay = LayerConfig::new(LayerId::Overlay(n), 1 + i32::from(n));
        overlay.enabled = false;
        overlay.effect = EffectSpec::of(EffectKind::FadeIn).with_window(5.0, 6.0);
        out.push(overlay);
    }

    let mut frame_box = LayerConfig::new(LayerId::FrameBox, 12);
    frame_box.enabled = false;
    frame_box.x_percent = 50.0;
    frame_box.y_percent = 50.0;
    out.push(frame_box);

    let mut frame_cover = LayerConfig::new(LayerId::FrameCover, 13);
    frame_cover.enabled = false;
    frame_cover.x_percent = 50.0;
    frame_cover.y_percent = 50.0;
    out.push(frame_cover);

    let mut wave = LayerConfig::new(LayerId::Soundwave, 14);
    wave.enabled = false;
    wave.x_percent = 50.0;
    wave.y_percent = 10.0;
    out.push(wave);

    let mut title = LayerConfig::new(LayerId::SongTitle, 15);
    title.y_percent = 75.0;
    title.effect = EffectSpec::of(EffectKind::FadeInOut);
    out.push(title);

    out
}
