use crate::pipeline::Phase;
use crate::status::StageStatus;
use std::io;
use thiserror::Error;

/// Everything that can go wrong while running a pipeline.
///
/// None of these are fatal to the interpreter: they are returned to the caller,
/// which prints a diagnostic and goes back to the prompt.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("empty pipeline: every stage is blank")]
    EmptyPipeline,

    #[error("failed to allocate pipeline connection: {source}")]
    Connection {
        #[source]
        source: io::Error,
    },

    #[error("stage {index} ({program}): failed to duplicate stderr: {source}")]
    StderrDup {
        index: usize,
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("stage {index} ({program}): failed to start: {source}")]
    StageStart {
        index: usize,
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("stage {index} ({program}): {status}")]
    StageRuntime {
        index: usize,
        program: String,
        status: StageStatus,
    },

    #[error("stage {index} ({program}): failed to wait: {source}")]
    StageWait {
        index: usize,
        program: String,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    /// Lifecycle phase in which the failure was observed.
    pub fn phase(&self) -> Phase {
        match self {
            Self::EmptyPipeline | Self::Connection { .. } | Self::StderrDup { .. } => {
                Phase::Setup
            }
            Self::StageStart { .. } => Phase::Starting,
            Self::StageRuntime { .. } | Self::StageWait { .. } => Phase::Collecting,
        }
    }

    /// Index of the stage that failed, if the failure belongs to one stage.
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            Self::EmptyPipeline | Self::Connection { .. } => None,
            Self::StderrDup { index, .. }
            | Self::StageStart { index, .. }
            | Self::StageRuntime { index, .. }
            | Self::StageWait { index, .. } => Some(*index),
        }
    }
}

/// Aggregated outcome of one pipeline invocation.
pub type PipelineResult = Result<(), PipelineError>;
