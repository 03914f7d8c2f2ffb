//! Supercut is a layer composition and timeline synthesis engine for batch music videos.
//!
//! A job pairs one background image with a run of audio tracks. The engine resolves track
//! metadata, rasterizes one title card per track, lays the tracks out on a timeline, resolves
//! the active layer stack and lowers everything into an ordered composition graph that an
//! external renderer (the system `ffmpeg`) executes:
//!
//! - Load a [`Template`] and plan [`JobSpec`]s with [`plan_batch`]
//! - Build a [`JobRunner`] around a [`MediaProbe`] and a [`RenderAdapter`]
//! - Run one job with [`JobRunner::run`] or many with [`run_batch`]
#![forbid(unsafe_code)]

mod foundation;

/// Batch planning and the concurrent job driver.
pub mod batch;
/// Composition graph model and builder.
pub mod graph;
/// Template/job configuration and the per-job pipeline.
pub mod job;
/// Layer identities, configuration and paint order.
pub mod layer;
/// Track titles, durations and media dimensions.
pub mod metadata;
/// Title card rasterization.
pub mod raster;
/// Render adapters.
pub mod render;
/// Segment timing for time-synchronized layers.
pub mod timeline;

pub use crate::foundation::core::{Canvas, Rgba8};
pub use crate::foundation::error::{JobError, JobStage, SupercutError, SupercutResult};

pub use crate::batch::{BatchOptions, BatchPlan, BatchReport, plan_batch, run_batch};
pub use crate::graph::builder::{GraphContext, ResolvedAssets, VisualAsset, build, position_offset};
pub use crate::graph::model::{FilterGraph, MediaInput, MediaKind, Node, Op, StreamRef};
pub use crate::job::config::{EncodeSettings, JobSpec, Template, TrackSpec, WaveMode, WaveformStyle};
pub use crate::job::pipeline::{JobOutcome, JobRunner, PreparedJob, partial_path, promote_output};
pub use crate::job::scratch::ScratchDir;
pub use crate::layer::model::{
    CropPosition, EffectKind, EffectSpec, LayerConfig, LayerId, LayerTiming, PanDirection,
    default_layer_stack,
};
pub use crate::layer::order::{LayerOverride, ResolvedLayer, resolve};
pub use crate::metadata::{
    AudioTrack, FfprobeProbe, MediaProbe, StaticProbe, resolve_title, resolve_track,
};
pub use crate::raster::title::{
    TitleBackground, TitleDecoration, TitleImage, TitleRasterizer, TitleStyle, fit_title,
};
pub use crate::render::adapter::{
    CancelToken, RecordedRender, RecordingAdapter, RecordingBehavior, RenderAdapter,
    RenderRequest,
};
pub use crate::render::ffmpeg::FfmpegRenderer;
pub use crate::timeline::{OverlaySegment, SegmentTiming, Timeline, compute_segments};
