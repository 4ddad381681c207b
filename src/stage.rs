//! Splitting an input line into pipeline stages.

use crate::error::PipelineError;

/// Stage separator recognised on the input line.
pub const PIPE: char = '|';

/// One command of a pipeline: the program to launch and its arguments.
///
/// `program` is never empty; blank fragments do not produce a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub program: String,
    pub arguments: Vec<String>,
}

impl StageDescriptor {
    pub fn new(
        program: impl Into<String>,
        arguments: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
        }
    }

    /// Tokenize a single fragment. Returns `None` when it holds no words.
    fn from_fragment(fragment: &str) -> Option<Self> {
        let mut words = fragment.split_whitespace();
        let program = words.next()?;
        Some(Self::new(program, words))
    }
}

/// Convert a pipe-delimited line into its ordered stages.
///
/// Blank fragments (`a || b`, a trailing `|`) are skipped. A line where every
/// fragment is blank fails with [`PipelineError::EmptyPipeline`].
pub fn build(line: &str) -> Result<Vec<StageDescriptor>, PipelineError> {
    let stages: Vec<StageDescriptor> = line
        .split(PIPE)
        .filter_map(|fragment| StageDescriptor::from_fragment(fragment.trim()))
        .collect();

    if stages.is_empty() {
        return Err(PipelineError::EmptyPipeline);
    }
    Ok(stages)
}
