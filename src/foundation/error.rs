use std::fmt;

pub type SupercutResult<T> = Result<T, SupercutError>;

#[derive(thiserror::Error, Debug)]
pub enum SupercutError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("rasterization error: {0}")]
    Rasterization(String),

    #[error("missing asset: {0}")]
    MissingAsset(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("probe error: {0}")]
    Probe(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SupercutError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn rasterization(msg: impl Into<String>) -> Self {
        Self::Rasterization(msg.into())
    }

    pub fn missing_asset(msg: impl Into<String>) -> Self {
        Self::MissingAsset(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    /// `true` for the cancellation outcome, which batch reporting treats separately.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Stage of a job that an error surfaced in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStage {
    Validate,
    Metadata,
    Timeline,
    Rasterize,
    Assets,
    Graph,
    Render,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validate => "validation",
            Self::Metadata => "metadata resolution",
            Self::Timeline => "timeline computation",
            Self::Rasterize => "title rasterization",
            Self::Assets => "asset resolution",
            Self::Graph => "graph building",
            Self::Render => "rendering",
        };
        f.write_str(s)
    }
}

/// A [`SupercutError`] tagged with the job and stage it came from.
#[derive(thiserror::Error, Debug)]
#[error("job '{job_id}' failed during {stage}: {source}")]
pub struct JobError {
    pub job_id: String,
    pub stage: JobStage,
    #[source]
    pub source: SupercutError,
}

impl JobError {
    pub fn new(job_id: impl Into<String>, stage: JobStage, source: SupercutError) -> Self {
        Self {
            job_id: job_id.into(),
            stage,
            source,
        }
    }
}

/// Attach job/stage context to a stage result.
pub(crate) trait StageExt<T> {
    fn at(self, job_id: &str, stage: JobStage) -> Result<T, JobError>;
}

impl<T> StageExt<T> for SupercutResult<T> {
    fn at(self, job_id: &str, stage: JobStage) -> Result<T, JobError> {
        self.map_err(|e| JobError::new(job_id, stage, e))
    }
}
