use jsreveal_parser::ParseError;
use thiserror::Error;

/// Outcome of one transformation attempt that did not hit a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Changed(String),
    Unchanged,
    Failed(String),
}

impl AttemptResult {
    /// `Changed` only when the new text differs from `original`.
    pub fn from_rewrite(original: &str, rewritten: String) -> Self {
        if rewritten == original {
            AttemptResult::Unchanged
        } else {
            AttemptResult::Changed(rewritten)
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, AttemptResult::Changed(_))
    }

    /// The code after this attempt: the rewrite, or `original` untouched.
    pub fn into_code(self, original: &str) -> String {
        match self {
            AttemptResult::Changed(code) => code,
            AttemptResult::Unchanged | AttemptResult::Failed(_) => original.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StageError {
    /// The stage could not parse its input. The pipeline records it and moves on.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// An injected collaborator broke. Aborts the whole call.
    #[error("Collaborator failure: {0}")]
    Collaborator(#[source] anyhow::Error),
}

impl StageError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StageError::Parse(_))
    }

    pub fn collaborator(err: impl Into<anyhow::Error>) -> Self {
        StageError::Collaborator(err.into())
    }
}

pub type StageResult<T> = std::result::Result<T, StageError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn stage(&self) -> &str {
        match self {
            PipelineError::Stage { stage, .. } => stage,
        }
    }
}
