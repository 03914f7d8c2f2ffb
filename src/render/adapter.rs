use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::foundation::error::{SupercutError, SupercutResult};
use crate::graph::model::FilterGraph;
use crate::job::config::EncodeSettings;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is raised.
    pub fn check(&self) -> SupercutResult<()> {
        if self.is_cancelled() {
            Err(SupercutError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything a renderer needs to produce one video.
#[derive(Clone, Copy, Debug)]
pub struct RenderRequest<'a> {
    pub graph: &'a FilterGraph,
    /// Where the renderer writes; the caller moves it into place afterwards.
    pub output: &'a Path,
    pub encode: &'a EncodeSettings,
    pub fps: u32,
    /// Program length in seconds.
    pub duration: f64,
    pub cancel: &'a CancelToken,
}

/// Executes a [`FilterGraph`]. Implementations block until the file is written, the render
/// fails, or the request is cancelled.
pub trait RenderAdapter: Send + Sync {
    fn render(&self, req: &RenderRequest<'_>) -> SupercutResult<PathBuf>;
}

/// What [`RecordingAdapter`] does when asked to render.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RecordingBehavior {
    /// Write a small placeholder file and succeed.
    #[default]
    Succeed,
    /// Leave a partial file behind and fail with this message.
    Fail(String),
    /// Leave a partial file behind and report cancellation.
    Cancel,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRender {
    pub output: PathBuf,
    pub filter_complex: String,
    pub inputs: Vec<PathBuf>,
    /// Whether every input file existed while the render ran.
    pub inputs_present: bool,
    pub duration: f64,
}

/// [`RenderAdapter`] that records requests instead of encoding (dry runs and tests).
#[derive(Debug, Default)]
pub struct RecordingAdapter {
    behavior: RecordingBehavior,
    calls: Mutex<Vec<RecordedRender>>,
}

impl RecordingAdapter {
    pub fn new(behavior: RecordingBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedRender> {
        self.calls
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

impl RenderAdapter for RecordingAdapter {
    fn render(&self, req: &RenderRequest<'_>) -> SupercutResult<PathBuf> {
        let inputs: Vec<PathBuf> = req.graph.inputs.iter().map(|i| i.path.clone()).collect();
        let record = RecordedRender {
            output: req.output.to_path_buf(),
            filter_complex: req.graph.to_filter_complex(),
            inputs_present: inputs.iter().all(|p| p.exists()),
            inputs,
            duration: req.duration,
        };
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(record);
        }

        if let Some(parent) = req.output.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(anyhow::Error::from)?;
        }
        std::fs::write(req.output, b"supercut").map_err(anyhow::Error::from)?;

        match &self.behavior {
            RecordingBehavior::Succeed => Ok(req.output.to_path_buf()),
            RecordingBehavior::Fail(msg) => Err(SupercutError::render(msg.clone())),
            RecordingBehavior::Cancel => Err(SupercutError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let a = CancelToken::new();
        let b = a.clone();
        assert!(a.check().is_ok());
        b.cancel();
        assert!(a.is_cancelled());
        assert!(matches!(a.check(), Err(SupercutError::Cancelled)));
    }
}
