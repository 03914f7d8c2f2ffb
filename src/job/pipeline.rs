use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::foundation::error::{JobError, JobStage, StageExt as _, SupercutError, SupercutResult};
use crate::graph::builder::{GraphContext, ResolvedAssets, VisualAsset, build};
use crate::graph::model::{FilterGraph, MediaKind};
use crate::job::config::{JobSpec, Template};
use crate::job::scratch::ScratchDir;
use crate::layer::model::LayerId;
use crate::layer::order::{ResolvedLayer, resolve};
use crate::metadata::{AudioTrack, MediaProbe, media_dimensions, resolve_track};
use crate::raster::title::TitleRasterizer;
use crate::render::adapter::{CancelToken, RenderAdapter, RenderRequest};
use crate::timeline::{Timeline, compute_segments};

/// Everything a job computed before rendering.
#[derive(Clone, Debug)]
pub struct PreparedJob {
    pub active: Vec<ResolvedLayer>,
    pub tracks: Vec<AudioTrack>,
    pub timelines: Vec<Timeline>,
    pub graph: FilterGraph,
    /// Program length in seconds.
    pub duration: f64,
}

/// Result of a successful render. The video sits at `partial` until it is promoted.
#[derive(Clone, Debug)]
pub struct JobOutcome {
    pub job_id: String,
    pub partial: PathBuf,
    pub output: PathBuf,
    pub tracks: Vec<AudioTrack>,
    pub duration: f64,
}

/// `<dir>/<stem>.partial.<ext>` next to the final output.
pub fn partial_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_owned());
    let name = match output.extension() {
        Some(ext) => format!("{stem}.partial.{}", ext.to_string_lossy()),
        None => format!("{stem}.partial"),
    };
    output.with_file_name(name)
}

/// Move a finished render into its final place.
pub fn promote_output(outcome: &JobOutcome) -> SupercutResult<PathBuf> {
    use anyhow::Context as _;
    std::fs::rename(&outcome.partial, &outcome.output).with_context(|| {
        format!(
            "move '{}' to '{}'",
            outcome.partial.display(),
            outcome.output.display()
        )
    })?;
    Ok(outcome.output.clone())
}

/// Runs jobs against one template. Cheap to share between worker threads.
#[derive(Clone)]
pub struct JobRunner {
    template: Arc<Template>,
    rasterizer: Arc<TitleRasterizer>,
    probe: Arc<dyn MediaProbe>,
    renderer: Arc<dyn RenderAdapter>,
    scratch_root: PathBuf,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("scratch_root", &self.scratch_root)
            .finish_non_exhaustive()
    }
}

impl JobRunner {
    pub fn new(
        template: Arc<Template>,
        probe: Arc<dyn MediaProbe>,
        renderer: Arc<dyn RenderAdapter>,
    ) -> SupercutResult<Self> {
        template.validate()?;
        let rasterizer = Arc::new(TitleRasterizer::new(template.title.clone())?);
        Ok(Self {
            template,
            rasterizer,
            probe,
            renderer,
            scratch_root: std::env::temp_dir(),
        })
    }

    /// Put scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Run every stage up to (not including) rendering. Title images land in `scratch`.
    pub fn prepare(
        &self,
        job: &JobSpec,
        scratch: &ScratchDir,
        cancel: &CancelToken,
    ) -> Result<PreparedJob, JobError> {
        let active = self.validate(job)?;
        self.prepare_validated(job, active, scratch, cancel)
    }

    /// Check the job and resolve the active layers. Touches nothing on disk.
    fn validate(&self, job: &JobSpec) -> Result<Vec<ResolvedLayer>, JobError> {
        let id = job.id.as_str();
        let t = &*self.template;
        job.validate().at(id, JobStage::Validate)?;
        resolve(&t.layers, t.layer_order.as_deref()).at(id, JobStage::Validate)
    }

    fn prepare_validated(
        &self,
        job: &JobSpec,
        active: Vec<ResolvedLayer>,
        scratch: &ScratchDir,
        cancel: &CancelToken,
    ) -> Result<PreparedJob, JobError> {
        let id = job.id.as_str();
        let t = &*self.template;

        cancel.check().at(id, JobStage::Metadata)?;
        let tracks = job
            .tracks
            .iter()
            .map(|spec| resolve_track(spec, self.probe.as_ref()))
            .collect::<SupercutResult<Vec<_>>>()
            .at(id, JobStage::Metadata)?;

        let durations: Vec<f64> = tracks.iter().map(|t| t.duration).collect();
        let timings = compute_segments(&durations, t.start_offset).at(id, JobStage::Timeline)?;
        let duration = timings.last().map_or(t.start_offset, |s| s.end());

        cancel.check().at(id, JobStage::Rasterize)?;
        let mut timelines = Vec::new();
        if active.iter().any(|l| l.id() == LayerId::SongTitle) {
            let images = self
                .rasterize_titles(&tracks, scratch, cancel)
                .at(id, JobStage::Rasterize)?;
            timelines.push(Timeline::from_timings(LayerId::SongTitle, &timings, &images));
        }

        cancel.check().at(id, JobStage::Assets)?;
        let assets = self.resolve_assets(job, &active, &tracks).at(id, JobStage::Assets)?;

        let ctx = GraphContext::from_template(t, duration);
        let graph = build(&ctx, &active, &timelines, &assets).at(id, JobStage::Graph)?;

        Ok(PreparedJob {
            active,
            tracks,
            timelines,
            graph,
            duration,
        })
    }

    /// Run one job end to end. The scratch directory is gone when this returns, whatever the
    /// outcome; a failed or cancelled render leaves no partial output behind.
    #[tracing::instrument(skip_all, fields(job = %job.id))]
    pub fn run(&self, job: &JobSpec, cancel: &CancelToken) -> Result<JobOutcome, JobError> {
        let id = job.id.as_str();
        tracing::info!(tracks = job.tracks.len(), "job started");

        let active = self.validate(job)?;
        let scratch = ScratchDir::create(&self.scratch_root, id).at(id, JobStage::Rasterize)?;
        let prepared = self.prepare_validated(job, active, &scratch, cancel)?;

        cancel.check().at(id, JobStage::Render)?;
        let partial = partial_path(&job.output);
        let req = RenderRequest {
            graph: &prepared.graph,
            output: &partial,
            encode: &self.template.encode,
            fps: self.template.fps,
            duration: prepared.duration,
            cancel,
        };
        let rendered = self.renderer.render(&req);
        drop(scratch);

        match rendered {
            Ok(path) => {
                tracing::info!(partial = %path.display(), seconds = prepared.duration, "job rendered");
                Ok(JobOutcome {
                    job_id: job.id.clone(),
                    partial: path,
                    output: job.output.clone(),
                    tracks: prepared.tracks,
                    duration: prepared.duration,
                })
            }
            Err(e) => {
                discard(&partial);
                Err(JobError::new(id, JobStage::Render, e))
            }
        }
    }

    fn rasterize_titles(
        &self,
        tracks: &[AudioTrack],
        scratch: &ScratchDir,
        cancel: &CancelToken,
    ) -> SupercutResult<Vec<Option<PathBuf>>> {
        let mut images = Vec::with_capacity(tracks.len());
        for (i, track) in tracks.iter().enumerate() {
            cancel.check()?;
            let path = scratch.file(&format!("title_{i}.png"));
            self.rasterizer.render_to_file(&track.title, &path)?;
            images.push(Some(path));
        }
        Ok(images)
    }

    fn resolve_assets(
        &self,
        job: &JobSpec,
        active: &[ResolvedLayer],
        tracks: &[AudioTrack],
    ) -> SupercutResult<ResolvedAssets> {
        let probe = self.probe.as_ref();
        let visual = |path: &Path, what: &str| -> SupercutResult<VisualAsset> {
            let (width, height) = media_dimensions(path, probe).map_err(|e| match e {
                SupercutError::MissingAsset(msg) => {
                    SupercutError::missing_asset(format!("{what}: {msg}"))
                }
                other => other,
            })?;
            Ok(VisualAsset {
                path: path.to_path_buf(),
                kind: MediaKind::for_visual(path),
                width,
                height,
            })
        };

        let background = visual(&job.background, "background image")?;
        let mut layers = BTreeMap::new();
        for layer in active {
            if layer.id() == LayerId::Background {
                continue;
            }
            if let Some(src) = layer.config.source.as_deref() {
                let asset = visual(src, &format!("layer '{}' source", layer.id()))?;
                layers.insert(layer.id(), asset);
            }
        }

        Ok(ResolvedAssets {
            background: Some(background),
            layers,
            audio: tracks.iter().map(|t| t.path.clone()).collect(),
        })
    }
}

fn discard(partial: &Path) {
    if let Err(e) = std::fs::remove_file(partial)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %partial.display(), error = %e, "failed to remove partial output");
    }
}
