use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::foundation::core::Rgba8;
use crate::foundation::error::{SupercutError, SupercutResult};
use crate::job::config::WaveMode;
use crate::layer::model::{CropPosition, LayerId, PanDirection};

/// How an input file is fed to the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    /// Single image, looped for the whole program.
    Still,
    /// Animated image or video, looped when shorter than the program.
    Animated,
    Audio,
}

impl MediaKind {
    /// Classify a file by extension. Unknown extensions are treated as animated media.
    pub fn for_visual(path: &std::path::Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("png" | "jpg" | "jpeg" | "bmp" | "webp") => Self::Still,
            _ => Self::Animated,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MediaInput {
    pub path: PathBuf,
    pub kind: MediaKind,
}

/// A stream consumed by a node: a raw input stream or an upstream node's output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamRef {
    Video(usize),
    Audio(usize),
    Label(String),
}

impl fmt::Display for StreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video(i) => write!(f, "[{i}:v]"),
            Self::Audio(i) => write!(f, "[{i}:a]"),
            Self::Label(l) => write!(f, "[{l}]"),
        }
    }
}

/// Half-open visibility window `[start, end)` in program seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeWindow {
    pub start: f64,
    /// `None` means until the program ends.
    pub end: Option<f64>,
}

impl TimeWindow {
    pub fn contains(self, t: f64) -> bool {
        t >= self.start && self.end.is_none_or(|e| t < e)
    }

    fn enable_expr(self) -> String {
        match self.end {
            Some(end) => format!("gte(t,{})*lt(t,{})", secs(self.start), secs(end)),
            None => format!("gte(t,{})", secs(self.start)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleFit {
    Exact,
    /// Preserve aspect ratio and cover the box; a crop normally follows.
    Cover,
}

/// Composition operation performed by one node.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Scale {
        width: u32,
        height: u32,
        fit: ScaleFit,
        /// Convert to RGBA afterwards so alpha fades work on opaque sources.
        alpha: bool,
    },
    Crop {
        width: u32,
        height: u32,
        anchor: CropPosition,
    },
    /// Paint the second input over the first at `(x, y)`.
    Position {
        x: i64,
        y: i64,
        window: Option<TimeWindow>,
    },
    FadeIn {
        start: f64,
        duration: f64,
        alpha: bool,
    },
    FadeOut {
        start: f64,
        duration: f64,
        alpha: bool,
    },
    /// Linear zoom from `from` to `to` over `[start, start + duration]`, clamped outside.
    ZoomPan {
        from: f64,
        to: f64,
        start: f64,
        duration: f64,
        pan: PanDirection,
        width: u32,
        height: u32,
        fps: u32,
    },
    Identity,
    Format {
        pix_fmt: String,
    },
    AudioConcat {
        count: usize,
    },
    AudioDelay {
        seconds: f64,
    },
    Waveform {
        width: u32,
        height: u32,
        mode: WaveMode,
        color: Rgba8,
        fps: u32,
    },
}

impl Op {
    /// ffmpeg filter text for this op (without stream labels).
    pub fn to_filter(&self) -> String {
        match self {
            Self::Scale {
                width,
                height,
                fit,
                alpha,
            } => {
                let mut s = format!("scale={width}:{height}");
                if *fit == ScaleFit::Cover {
                    s.push_str(":force_original_aspect_ratio=increase");
                }
                if *alpha {
                    s.push_str(",format=rgba");
                }
                s
            }
            Self::Crop {
                width,
                height,
                anchor,
            } => {
                let (x, y) = match anchor {
                    CropPosition::Center => ("(iw-ow)/2", "(ih-oh)/2"),
                    CropPosition::Top => ("(iw-ow)/2", "0"),
                    CropPosition::Bottom => ("(iw-ow)/2", "ih-oh"),
                    CropPosition::Left => ("0", "(ih-oh)/2"),
                    CropPosition::Right => ("iw-ow", "(ih-oh)/2"),
                };
                format!("crop={width}:{height}:{x}:{y}")
            }
            Self::Position { x, y, window } => {
                let mut s = format!("overlay=x={x}:y={y}");
                if let Some(w) = window {
                    s.push_str(&format!(":enable='{}'", w.enable_expr()));
                }
                s
            }
            Self::FadeIn {
                start,
                duration,
                alpha,
            } => fade("in", *start, *duration, *alpha),
            Self::FadeOut {
                start,
                duration,
                alpha,
            } => fade("out", *start, *duration, *alpha),
            Self::ZoomPan {
                from,
                to,
                start,
                duration,
                pan,
                width,
                height,
                fps,
            } => {
                let p = format!("clip((it-{})/{},0,1)", secs(*start), secs(*duration));
                let z = format!("{}+({})*{p}", num(*from), num(to - from));
                let (x, y) = match pan {
                    PanDirection::Center => (
                        "iw/2-(iw/zoom/2)".to_owned(),
                        "ih/2-(ih/zoom/2)".to_owned(),
                    ),
                    PanDirection::Left => (
                        format!("(iw-iw/zoom)*(1-{p})/2"),
                        "ih/2-(ih/zoom/2)".to_owned(),
                    ),
                    PanDirection::Right => (
                        format!("(iw-iw/zoom)*(1+{p})/2"),
                        "ih/2-(ih/zoom/2)".to_owned(),
                    ),
                    PanDirection::Up => (
                        "iw/2-(iw/zoom/2)".to_owned(),
                        format!("(ih-ih/zoom)*(1-{p})/2"),
                    ),
                    PanDirection::Down => (
                        "iw/2-(iw/zoom/2)".to_owned(),
                        format!("(ih-ih/zoom)*(1+{p})/2"),
                    ),
                };
                format!("zoompan=z='{z}':x='{x}':y='{y}':d=1:s={width}x{height}:fps={fps}")
            }
            Self::Identity => "null".to_owned(),
            Self::Format { pix_fmt } => format!("format={pix_fmt}"),
            Self::AudioConcat { count } => format!("concat=n={count}:v=0:a=1"),
            Self::AudioDelay { seconds } => {
                format!("adelay=delays={}:all=1", (seconds * 1000.0).round() as u64)
            }
            Self::Waveform {
                width,
                height,
                mode,
                color,
                fps,
            } => format!(
                "showwaves=s={width}x{height}:mode={}:colors={}:rate={fps},format=rgba",
                mode.as_ffmpeg(),
                color.ffmpeg_rgb()
            ),
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::AudioConcat { .. } | Self::AudioDelay { .. })
    }
}

fn fade(dir: &str, start: f64, duration: f64, alpha: bool) -> String {
    let mut s = format!("fade=t={dir}:st={}:d={}", secs(start), secs(duration));
    if alpha {
        s.push_str(":alpha=1");
    }
    s
}

/// Seconds with millisecond precision and no trailing zeros.
fn secs(v: f64) -> String {
    num((v * 1000.0).round() / 1000.0)
}

fn num(v: f64) -> String {
    let s = format!("{v:.4}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" { "0".to_owned() } else { s.to_owned() }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// Layer this node belongs to; `None` for audio and terminal nodes.
    pub layer: Option<LayerId>,
    /// Track index for per-segment chains.
    pub segment: Option<usize>,
    pub inputs: Vec<StreamRef>,
    pub op: Op,
    pub output: String,
}

impl Node {
    pub fn to_filter(&self) -> String {
        let mut s = String::new();
        for input in &self.inputs {
            s.push_str(&input.to_string());
        }
        s.push_str(&self.op.to_filter());
        s.push('[');
        s.push_str(&self.output);
        s.push(']');
        s
    }
}

/// Ordered composition graph with one terminal video stream.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterGraph {
    pub inputs: Vec<MediaInput>,
    pub nodes: Vec<Node>,
    pub video_output: String,
    pub audio_output: Option<String>,
}

impl FilterGraph {
    /// The `-filter_complex` argument.
    pub fn to_filter_complex(&self) -> String {
        self.nodes
            .iter()
            .map(Node::to_filter)
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Distinct layers in the order their chains appear.
    pub fn layer_order(&self) -> Vec<LayerId> {
        let mut out: Vec<LayerId> = Vec::new();
        for layer in self.nodes.iter().filter_map(|n| n.layer) {
            if out.last() != Some(&layer) && !out.contains(&layer) {
                out.push(layer);
            }
        }
        out
    }

    pub fn nodes_for(&self, layer: LayerId) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.layer == Some(layer))
    }

    /// Check that every label is produced before it is consumed, consumed exactly once, and that
    /// the last node yields the terminal video stream.
    pub fn validate_topology(&self) -> SupercutResult<()> {
        // label -> consumed?
        let mut produced: BTreeMap<&str, bool> = BTreeMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            for input in &node.inputs {
                match input {
                    StreamRef::Video(idx) | StreamRef::Audio(idx) => {
                        if *idx >= self.inputs.len() {
                            return Err(SupercutError::validation(format!(
                                "node {i} reads input #{idx}, but only {} inputs exist",
                                self.inputs.len()
                            )));
                        }
                    }
                    StreamRef::Label(l) => match produced.get_mut(l.as_str()) {
                        None => {
                            return Err(SupercutError::validation(format!(
                                "node {i} consumes '{l}' before it is produced"
                            )));
                        }
                        Some(true) => {
                            return Err(SupercutError::validation(format!(
                                "stream '{l}' is consumed more than once"
                            )));
                        }
                        Some(consumed) => *consumed = true,
                    },
                }
            }
            if produced.insert(node.output.as_str(), false).is_some() {
                return Err(SupercutError::validation(format!(
                    "stream '{}' is produced more than once",
                    node.output
                )));
            }
        }

        let last = self
            .nodes
            .last()
            .ok_or_else(|| SupercutError::validation("filter graph has no nodes"))?;
        if last.output != self.video_output {
            return Err(SupercutError::validation(format!(
                "last node produces '{}', expected terminal '{}'",
                last.output, self.video_output
            )));
        }

        for (label, consumed) in &produced {
            let terminal =
                *label == self.video_output || Some(*label) == self.audio_output.as_deref();
            if !consumed && !terminal {
                return Err(SupercutError::validation(format!(
                    "stream '{label}' is produced but never used"
                )));
            }
        }
        Ok(())
    }
}
