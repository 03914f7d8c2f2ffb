//! Batch planning and concurrent execution of jobs.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use rayon::prelude::*;

use crate::foundation::error::{JobError, JobStage, SupercutError, SupercutResult};
use crate::job::config::{JobSpec, TrackSpec};
use crate::job::pipeline::{JobRunner, promote_output};
use crate::metadata::sanitize_title;
use crate::render::adapter::CancelToken;

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "wav", "flac"];
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

/// Longest name (in characters) taken from a name list.
pub const MAX_NAME_CHARS: usize = 180;

/// How a media folder is split into jobs.
#[derive(Clone, Debug)]
pub struct BatchPlan {
    pub media_dir: PathBuf,
    pub output_dir: PathBuf,
    pub tracks_per_video: usize,
    pub export_name: String,
    pub start_number: u32,
    /// Explicit output names, used in order before falling back to numbered names.
    pub names: Option<Vec<String>>,
}

impl BatchPlan {
    pub fn new(media_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            media_dir: media_dir.into(),
            output_dir: output_dir.into(),
            tracks_per_video: 3,
            export_name: "video".to_owned(),
            start_number: 1,
            names: None,
        }
    }
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e)))
}

fn list_media(dir: &Path) -> SupercutResult<(Vec<PathBuf>, Vec<PathBuf>)> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("read media folder '{}'", dir.display()))?;
    let mut audio = Vec::new();
    let mut images = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("read media folder '{}'", dir.display()))?
            .path();
        if !path.is_file() {
            continue;
        }
        if has_extension(&path, AUDIO_EXTENSIONS) {
            audio.push(path);
        } else if has_extension(&path, IMAGE_EXTENSIONS) {
            images.push(path);
        }
    }
    audio.sort();
    images.sort();
    Ok((audio, images))
}

fn output_stem(plan: &BatchPlan, n: usize) -> String {
    let named = plan
        .names
        .as_ref()
        .and_then(|names| names.get(n))
        .and_then(|raw| sanitize_title(raw))
        .map(|s| s.chars().take(MAX_NAME_CHARS).collect::<String>())
        .map(|s| s.trim_end().to_owned())
        .filter(|s| !s.is_empty());
    named.unwrap_or_else(|| format!("{}_{}", plan.export_name, plan.start_number as usize + n))
}

/// Scan the media folder and split it into jobs.
///
/// Audio and images are taken in file-name order; job `n` gets image `n` and the next
/// `tracks_per_video` tracks. Leftover tracks that do not fill a job are ignored.
#[tracing::instrument(skip_all, fields(media_dir = %plan.media_dir.display()))]
pub fn plan_batch(plan: &BatchPlan) -> SupercutResult<Vec<JobSpec>> {
    if plan.tracks_per_video == 0 {
        return Err(SupercutError::validation("tracks_per_video must be >= 1"));
    }
    let (audio, images) = list_media(&plan.media_dir)?;
    if audio.len() < plan.tracks_per_video {
        return Err(SupercutError::validation(format!(
            "need at least {} audio files in '{}', found {}",
            plan.tracks_per_video,
            plan.media_dir.display(),
            audio.len()
        )));
    }
    if images.is_empty() {
        return Err(SupercutError::validation(format!(
            "no background images in '{}'",
            plan.media_dir.display()
        )));
    }

    let count = images.len().min(audio.len() / plan.tracks_per_video);
    let jobs: Vec<JobSpec> = (0..count)
        .map(|n| {
            let stem = output_stem(plan, n);
            let tracks = audio[n * plan.tracks_per_video..(n + 1) * plan.tracks_per_video]
                .iter()
                .map(|p| TrackSpec::new(p.clone()))
                .collect();
            JobSpec {
                id: stem.clone(),
                background: images[n].clone(),
                tracks,
                output: plan.output_dir.join(format!("{stem}.mp4")),
            }
        })
        .collect();

    let unused = audio.len() - count * plan.tracks_per_video;
    tracing::info!(jobs = jobs.len(), unused_tracks = unused, "batch planned");
    Ok(jobs)
}

#[derive(Clone, Debug, Default)]
pub struct BatchOptions {
    /// Worker threads; `None` uses rayon's default.
    pub workers: Option<usize>,
    /// Cancel the remaining jobs after the first failure.
    pub fail_fast: bool,
}

/// Per-batch result. Cancelled jobs are reported separately from failures.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<JobError>,
    pub cancelled: Vec<String>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }
}

fn build_thread_pool(threads: Option<usize>) -> SupercutResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(SupercutError::validation("batch 'workers' must be >= 1 when set"));
    }
    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("supercut-job-{i}"));
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| SupercutError::render(format!("failed to build rayon thread pool: {e}")))
}

/// Run jobs concurrently. Each success is moved from its partial path into place.
#[tracing::instrument(skip_all, fields(jobs = jobs.len()))]
pub fn run_batch(
    runner: &JobRunner,
    jobs: &[JobSpec],
    opts: &BatchOptions,
    cancel: &CancelToken,
) -> SupercutResult<BatchReport> {
    let pool = build_thread_pool(opts.workers)?;

    let results: Vec<Result<PathBuf, JobError>> = pool.install(|| {
        jobs.par_iter()
            .map(|job| {
                let result = runner.run(job, cancel).and_then(|outcome| {
                    promote_output(&outcome)
                        .map_err(|e| JobError::new(&outcome.job_id, JobStage::Render, e))
                });
                if let Err(e) = &result
                    && !e.source.is_cancelled()
                {
                    tracing::error!(job = %job.id, error = %e, "job failed");
                    if opts.fail_fast {
                        cancel.cancel();
                    }
                }
                result
            })
            .collect()
    });

    let mut report = BatchReport::default();
    for r in results {
        match r {
            Ok(path) => report.succeeded.push(path),
            Err(e) if e.source.is_cancelled() => report.cancelled.push(e.job_id),
            Err(e) => report.failed.push(e),
        }
    }
    tracing::info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        cancelled = report.cancelled.len(),
        "batch finished"
    );
    Ok(report)
}
