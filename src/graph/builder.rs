use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::foundation::core::Canvas;
use crate::foundation::error::{SupercutError, SupercutResult};
use crate::graph::model::{
    FilterGraph, MediaInput, MediaKind, Node, Op, ScaleFit, StreamRef, TimeWindow,
};
use crate::job::config::{Template, WaveformStyle};
use crate::layer::model::{EffectKind, EffectSpec, LayerId};
use crate::layer::order::ResolvedLayer;
use crate::timeline::Timeline;

/// Ramp used by `fadein` / `fadeout` when the effect has no explicit duration.
pub const DEFAULT_FADE_SECS: f64 = 1.0;
/// Upper bound of each ramp of a `fadeinout`.
pub const FADE_IN_OUT_RAMP_SECS: f64 = 1.5;

pub const VIDEO_OUT: &str = "vout";
pub const AUDIO_OUT: &str = "aout";

/// Job-wide parameters the builder needs besides the layers.
#[derive(Clone, Debug)]
pub struct GraphContext {
    pub canvas: Canvas,
    pub fps: u32,
    /// Intrinsic size of the song-title images.
    pub title_size: (u32, u32),
    pub soundwave: WaveformStyle,
    /// Silence before the first track.
    pub start_offset: f64,
    /// Total program length in seconds (offset plus all tracks).
    pub program_duration: f64,
}

impl GraphContext {
    pub fn from_template(template: &Template, program_duration: f64) -> Self {
        Self {
            canvas: template.canvas,
            fps: template.fps,
            title_size: (template.title.width, template.title.height),
            soundwave: template.soundwave.clone(),
            start_offset: template.start_offset,
            program_duration,
        }
    }
}

/// A visual input with known pixel size.
#[derive(Clone, Debug, PartialEq)]
pub struct VisualAsset {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub width: u32,
    pub height: u32,
}

/// Files backing one job's graph.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedAssets {
    pub background: Option<VisualAsset>,
    pub layers: BTreeMap<LayerId, VisualAsset>,
    /// Audio tracks in program order.
    pub audio: Vec<PathBuf>,
}

/// Pixel offset of a `size` layer placed at `(x_percent, y_percent)`; `y` counts from the bottom.
pub fn position_offset(canvas: Canvas, size: (u32, u32), x_percent: f64, y_percent: f64) -> (i64, i64) {
    let free_w = f64::from(canvas.width) - f64::from(size.0);
    let free_h = f64::from(canvas.height) - f64::from(size.1);
    let x = (free_w * x_percent / 100.0).round() as i64;
    let y = (free_h * (1.0 - y_percent / 100.0)).round() as i64;
    (x, y)
}

fn scaled(size: (u32, u32), percent: f64) -> (u32, u32) {
    let f = percent / 100.0;
    let w = (f64::from(size.0) * f).round().max(1.0) as u32;
    let h = (f64::from(size.1) * f).round().max(1.0) as u32;
    (w, h)
}

/// Expand an effect into nodes over `[span_start, span_end)`.
fn effect_ops(
    effect: &EffectSpec,
    span_start: f64,
    span_end: f64,
    size: (u32, u32),
    fps: u32,
    alpha: bool,
) -> Vec<Op> {
    let offset = effect.start_time.unwrap_or(0.0);
    let start = span_start + offset;
    let remaining = (span_end - start).max(0.0);

    match effect.kind {
        EffectKind::FadeIn => vec![Op::FadeIn {
            start,
            duration: effect.duration.unwrap_or(DEFAULT_FADE_SECS),
            alpha,
        }],
        EffectKind::FadeOut => {
            let duration = effect.duration.unwrap_or(DEFAULT_FADE_SECS);
            // Without an explicit start the fade finishes exactly at the end of the span.
            let end = if effect.start_time.is_some() {
                start + duration
            } else {
                span_end
            };
            vec![Op::FadeOut {
                start: (end - duration).max(span_start),
                duration,
                alpha,
            }]
        }
        EffectKind::FadeInOut => {
            let total = effect.duration.unwrap_or(remaining);
            let ramp = (total / 2.0).min(FADE_IN_OUT_RAMP_SECS);
            if ramp <= 0.0 {
                return vec![Op::Identity];
            }
            vec![
                Op::FadeIn {
                    start,
                    duration: ramp,
                    alpha,
                },
                Op::FadeOut {
                    start: start + total - ramp,
                    duration: ramp,
                    alpha,
                },
            ]
        }
        EffectKind::ZoomPan => vec![Op::ZoomPan {
            from: 1.0,
            to: 1.0 + 0.5 * effect.intensity,
            start,
            duration: effect
                .duration
                .unwrap_or(remaining)
                .max(1.0 / f64::from(fps.max(1))),
            pan: effect.pan,
            width: size.0,
            height: size.1,
            fps,
        }],
        EffectKind::None => vec![Op::Identity],
    }
}

struct Builder<'a> {
    ctx: &'a GraphContext,
    inputs: Vec<MediaInput>,
    audio_nodes: Vec<Node>,
    video_nodes: Vec<Node>,
    composite: Option<String>,
    composites: usize,
}

impl<'a> Builder<'a> {
    fn new(ctx: &'a GraphContext) -> Self {
        Self {
            ctx,
            inputs: Vec::new(),
            audio_nodes: Vec::new(),
            video_nodes: Vec::new(),
            composite: None,
            composites: 0,
        }
    }

    fn add_input(&mut self, path: PathBuf, kind: MediaKind) -> usize {
        self.inputs.push(MediaInput { path, kind });
        self.inputs.len() - 1
    }

    fn push(
        &mut self,
        layer: Option<LayerId>,
        segment: Option<usize>,
        inputs: Vec<StreamRef>,
        op: Op,
        output: String,
    ) -> String {
        let node = Node {
            layer,
            segment,
            inputs,
            op,
            output: output.clone(),
        };
        if node.op.is_audio() {
            self.audio_nodes.push(node);
        } else {
            self.video_nodes.push(node);
        }
        output
    }

    /// Concatenate all tracks (delayed by the start offset) into `label`.
    fn audio_chain(&mut self, tracks: &[usize], label: &str) -> String {
        let inputs = tracks.iter().map(|&i| StreamRef::Audio(i)).collect();
        let count = tracks.len();
        if self.ctx.start_offset > 0.0 {
            let concat = self.push(
                None,
                None,
                inputs,
                Op::AudioConcat { count },
                format!("{label}_cat"),
            );
            self.push(
                None,
                None,
                vec![StreamRef::Label(concat)],
                Op::AudioDelay {
                    seconds: self.ctx.start_offset,
                },
                label.to_owned(),
            )
        } else {
            self.push(None, None, inputs, Op::AudioConcat { count }, label.to_owned())
        }
    }

    fn background(&mut self, layer: &ResolvedLayer, asset: &VisualAsset) {
        let cfg = &layer.config;
        let Canvas { width, height } = self.ctx.canvas;
        let idx = self.add_input(asset.path.clone(), asset.kind);
        let (sw, sh) = scaled((width, height), cfg.scale_percent);

        let id = Some(cfg.id);
        let mut cur = self.push(
            id,
            None,
            vec![StreamRef::Video(idx)],
            Op::Scale {
                width: sw,
                height: sh,
                fit: ScaleFit::Cover,
                alpha: false,
            },
            "bg_s".to_owned(),
        );
        cur = self.push(
            id,
            None,
            vec![StreamRef::Label(cur)],
            Op::Crop {
                width,
                height,
                anchor: cfg.crop_position,
            },
            "bg_c".to_owned(),
        );
        let ops = effect_ops(
            &cfg.effect,
            0.0,
            self.ctx.program_duration,
            (width, height),
            self.ctx.fps,
            false,
        );
        for (k, op) in ops.into_iter().enumerate() {
            cur = self.push(id, None, vec![StreamRef::Label(cur)], op, format!("bg_fx{k}"));
        }
        self.composite = Some(cur);
    }

    /// scale -> effect -> position for one layer (or one segment of a time-synced layer).
    ///
    /// The effect runs on the layer's own stream before it is merged into the composite, so a
    /// fade never touches layers painted underneath.
    fn layer_chain(
        &mut self,
        layer: &ResolvedLayer,
        source: StreamRef,
        intrinsic: (u32, u32),
        span: (f64, f64),
        window: Option<TimeWindow>,
        segment: Option<usize>,
    ) -> SupercutResult<()> {
        let cfg = &layer.config;
        let id = Some(cfg.id);
        let stem = match segment {
            Some(i) => format!("{}{i}", cfg.id.label_stem()),
            None => cfg.id.label_stem(),
        };
        let size = scaled(intrinsic, cfg.size_percent);

        let mut cur = self.push(
            id,
            segment,
            vec![source],
            Op::Scale {
                width: size.0,
                height: size.1,
                fit: ScaleFit::Exact,
                alpha: true,
            },
            format!("{stem}_s"),
        );
        let ops = effect_ops(&cfg.effect, span.0, span.1, size, self.ctx.fps, true);
        for (k, op) in ops.into_iter().enumerate() {
            cur = self.push(
                id,
                segment,
                vec![StreamRef::Label(cur)],
                op,
                format!("{stem}_fx{k}"),
            );
        }

        let base = self.composite.take().ok_or_else(|| {
            SupercutError::validation(format!(
                "layer '{}' has nothing to be painted over (background missing)",
                cfg.id
            ))
        })?;
        let (x, y) = position_offset(self.ctx.canvas, size, cfg.x_percent, cfg.y_percent);
        self.composites += 1;
        let out = self.push(
            id,
            segment,
            vec![StreamRef::Label(base), StreamRef::Label(cur)],
            Op::Position { x, y, window },
            format!("c{}", self.composites),
        );
        self.composite = Some(out);
        Ok(())
    }

    fn layer_span(&self, layer: &ResolvedLayer) -> ((f64, f64), Option<TimeWindow>) {
        let timing = layer.config.timing;
        let end = timing.duration.map(|d| timing.start_at + d);
        let span = (
            timing.start_at,
            end.unwrap_or(self.ctx.program_duration)
                .min(self.ctx.program_duration),
        );
        let window = if timing.start_at <= 0.0 && end.is_none() {
            None
        } else {
            Some(TimeWindow {
                start: timing.start_at,
                end,
            })
        };
        (span, window)
    }
}

/// Build the composition graph for one job.
///
/// Active layers are painted in `paint_index` order; the song title repeats once per segment of
/// its timeline, gated to that segment. Audio nodes come first, the last node is always the
/// terminal `vout` stream.
#[tracing::instrument(skip_all, fields(layers = active.len(), tracks = assets.audio.len()))]
pub fn build(
    ctx: &GraphContext,
    active: &[ResolvedLayer],
    timelines: &[Timeline],
    assets: &ResolvedAssets,
) -> SupercutResult<FilterGraph> {
    let mut layers: Vec<&ResolvedLayer> = active.iter().collect();
    layers.sort_by_key(|l| l.paint_index);

    match layers.first() {
        Some(first) if first.id() == LayerId::Background => {}
        _ => {
            return Err(SupercutError::validation(
                "the background must be the first active layer",
            ));
        }
    }

    let mut b = Builder::new(ctx);

    let tracks: Vec<usize> = assets
        .audio
        .iter()
        .map(|p| b.add_input(p.clone(), MediaKind::Audio))
        .collect();
    let audio_output = if tracks.is_empty() {
        None
    } else {
        Some(b.audio_chain(&tracks, AUDIO_OUT))
    };

    for layer in layers {
        let id = layer.id();
        match id {
            LayerId::Background => {
                let asset = assets
                    .background
                    .as_ref()
                    .ok_or_else(|| SupercutError::missing_asset("no background image resolved"))?;
                b.background(layer, asset);
            }
            LayerId::SongTitle => {
                let timeline = timelines.iter().find(|t| t.layer == id).ok_or_else(|| {
                    SupercutError::missing_asset("song-title is active but has no timeline")
                })?;
                for seg in &timeline.segments {
                    let image = seg.image.clone().ok_or_else(|| {
                        SupercutError::missing_asset(format!(
                            "song-title image for track {} was not produced",
                            seg.track_index
                        ))
                    })?;
                    let idx = b.add_input(image, MediaKind::Still);
                    let window = TimeWindow {
                        start: seg.start,
                        end: Some(seg.end()),
                    };
                    b.layer_chain(
                        layer,
                        StreamRef::Video(idx),
                        ctx.title_size,
                        (seg.start, seg.end()),
                        Some(window),
                        Some(seg.track_index),
                    )?;
                }
            }
            LayerId::Soundwave if layer.config.source.is_none() => {
                if tracks.is_empty() {
                    return Err(SupercutError::missing_asset(
                        "soundwave layer needs audio tracks to draw from",
                    ));
                }
                let feed = b.audio_chain(&tracks, "wave_a");
                let style = &ctx.soundwave;
                let src = b.push(
                    Some(id),
                    None,
                    vec![StreamRef::Label(feed)],
                    Op::Waveform {
                        width: style.width,
                        height: style.height,
                        mode: style.mode,
                        color: style.color,
                        fps: ctx.fps,
                    },
                    "wave_src".to_owned(),
                );
                let (span, window) = b.layer_span(layer);
                b.layer_chain(
                    layer,
                    StreamRef::Label(src),
                    (style.width, style.height),
                    span,
                    window,
                    None,
                )?;
            }
            _ => {
                let asset = assets.layers.get(&id).ok_or_else(|| {
                    SupercutError::missing_asset(format!("layer '{id}' has no resolved source"))
                })?;
                let idx = b.add_input(asset.path.clone(), asset.kind);
                let (span, window) = b.layer_span(layer);
                b.layer_chain(
                    layer,
                    StreamRef::Video(idx),
                    (asset.width, asset.height),
                    span,
                    window,
                    None,
                )?;
            }
        }
    }

    let composite = b
        .composite
        .take()
        .ok_or_else(|| SupercutError::validation("no video layers to composite"))?;
    b.push(
        None,
        None,
        vec![StreamRef::Label(composite)],
        Op::Format {
            pix_fmt: "yuv420p".to_owned(),
        },
        VIDEO_OUT.to_owned(),
    );

    let mut nodes = b.audio_nodes;
    nodes.extend(b.video_nodes);
    let graph = FilterGraph {
        inputs: b.inputs,
        nodes,
        video_output: VIDEO_OUT.to_owned(),
        audio_output,
    };
    graph.validate_topology()?;
    tracing::debug!(nodes = graph.nodes.len(), inputs = graph.inputs.len(), "filter graph built");
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::model::LayerConfig;

    fn ctx() -> GraphContext {
        GraphContext {
            canvas: Canvas::default(),
            fps: 24,
            title_size: (1920, 240),
            soundwave: WaveformStyle::default(),
            start_offset: 0.0,
            program_duration: 60.0,
        }
    }

    fn resolved(cfgs: Vec<LayerConfig>) -> Vec<ResolvedLayer> {
        cfgs.into_iter()
            .enumerate()
            .map(|(paint_index, config)| ResolvedLayer {
                paint_index,
                config,
            })
            .collect()
    }

    fn assets() -> ResolvedAssets {
        ResolvedAssets {
            background: Some(VisualAsset {
                path: "bg.png".into(),
                kind: MediaKind::Still,
                width: 3000,
                height: 2000,
            }),
            layers: BTreeMap::new(),
            audio: vec!["a.mp3".into()],
        }
    }

    #[test]
    fn position_formula_hits_the_corners() {
        let c = Canvas::default();
        let size = (400, 200);
        assert_eq!(position_offset(c, size, 0.0, 100.0), (0, 0));
        assert_eq!(position_offset(c, size, 100.0, 0.0), (1520, 880));
        assert_eq!(position_offset(c, size, 50.0, 50.0), (760, 440));
        assert_eq!(position_offset(c, (1920, 240), 0.0, 75.0), (0, 210));
    }

    #[test]
    fn fade_out_defaults_to_span_end() {
        let ops = effect_ops(
            &EffectSpec::of(EffectKind::FadeOut),
            10.0,
            40.0,
            (1, 1),
            24,
            true,
        );
        assert_eq!(
            ops,
            vec![Op::FadeOut {
                start: 39.0,
                duration: 1.0,
                alpha: true
            }]
        );
    }

    #[test]
    fn fade_in_out_ramps_do_not_overlap() {
        let ops = effect_ops(
            &EffectSpec::of(EffectKind::FadeInOut),
            5.0,
            7.0,
            (1, 1),
            24,
            true,
        );
        assert_eq!(
            ops,
            vec![
                Op::FadeIn {
                    start: 5.0,
                    duration: 1.0,
                    alpha: true
                },
                Op::FadeOut {
                    start: 6.0,
                    duration: 1.0,
                    alpha: true
                },
            ]
        );

        let long = effect_ops(
            &EffectSpec::of(EffectKind::FadeInOut),
            0.0,
            30.0,
            (1, 1),
            24,
            true,
        );
        assert!(matches!(long[1], Op::FadeOut { start, duration, .. } if start == 28.5 && duration == 1.5));
    }

    #[test]
    fn zoompan_targets_intensity() {
        let mut e = EffectSpec::of(EffectKind::ZoomPan);
        e.intensity = 0.6;
        let ops = effect_ops(&e, 0.0, 20.0, (640, 360), 30, true);
        let Op::ZoomPan { to, duration, .. } = ops[0] else {
            panic!("expected zoompan");
        };
        assert!((to - 1.3).abs() < 1e-9);
        assert_eq!(duration, 20.0);
    }

    #[test]
    fn background_only_graph() {
        let g = build(
            &ctx(),
            &resolved(vec![LayerConfig::new(LayerId::Background, 0)]),
            &[],
            &assets(),
        )
        .unwrap();
        assert_eq!(g.layer_order(), vec![LayerId::Background]);
        assert_eq!(g.audio_output.as_deref(), Some(AUDIO_OUT));
        assert_eq!(g.nodes.last().map(|n| n.output.as_str()), Some(VIDEO_OUT));
        let fc = g.to_filter_complex();
        assert!(fc.starts_with("[0:a]concat=n=1:v=0:a=1[aout];"));
        assert!(fc.contains("[1:v]scale=1920:1080:force_original_aspect_ratio=increase[bg_s]"));
        assert!(fc.contains("[bg_s]crop=1920:1080:(iw-ow)/2:(ih-oh)/2[bg_c]"));
        assert!(fc.ends_with("format=yuv420p[vout]"));
    }

    #[test]
    fn missing_overlay_asset_is_reported() {
        let mut ov = LayerConfig::new(LayerId::Overlay(2), 1);
        ov.source = Some("ov.png".into());
        let err = build(
            &ctx(),
            &resolved(vec![LayerConfig::new(LayerId::Background, 0), ov]),
            &[],
            &assets(),
        )
        .unwrap_err();
        assert!(matches!(err, SupercutError::MissingAsset(ref m) if m.contains("overlay-2")));
    }

    #[test]
    fn background_must_come_first() {
        let err = build(
            &ctx(),
            &resolved(vec![LayerConfig::new(LayerId::SongTitle, 0)]),
            &[],
            &assets(),
        )
        .unwrap_err();
        assert!(matches!(err, SupercutError::Validation(_)));
    }

    #[test]
    fn generated_soundwave_reads_a_second_audio_feed() {
        let mut wave = LayerConfig::new(LayerId::Soundwave, 1);
        wave.x_percent = 50.0;
        let mut c = ctx();
        c.start_offset = 2.0;
        let g = build(
            &c,
            &resolved(vec![LayerConfig::new(LayerId::Background, 0), wave]),
            &[],
            &assets(),
        )
        .unwrap();
        let fc = g.to_filter_complex();
        assert!(fc.contains("[0:a]concat=n=1:v=0:a=1[aout_cat];[aout_cat]adelay=delays=2000:all=1[aout]"));
        assert!(fc.contains("[wave_a]showwaves=s=1280x240:mode=cline:colors=0xFFFFFF:rate=24,format=rgba[wave_src]"));
        assert!(g.nodes.iter().take_while(|n| n.op.is_audio()).count() == 4);
    }
}
