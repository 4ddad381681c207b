//! An interactive command interpreter with POSIX-style pipelines.
//!
//! A line is split on `|` into stages. A single stage is dispatched to a built-in
//! (`cd`, `pwd`, `echo`, `kill`, `ps`, `exit`) or launched as an external program.
//! Several stages are handed to the [`PipelineEngine`], which connects each stage's
//! standard output to the next stage's standard input with OS pipes, starts the
//! stages in order, and waits on every one it started before reporting the first
//! failure as a [`PipelineError`].
//!
//! The main entry point is [`Interpreter`]. The public modules [`command`] and
//! [`env`] expose the traits and types for plugging in your own commands.

mod builtin;
pub mod command;
pub mod env;
mod error;
mod external;
mod interpreter;
mod pipeline;
pub mod stage;
mod status;

pub use error::{PipelineError, PipelineResult};
pub use external::find_command_path;
pub use interpreter::Interpreter;
pub use pipeline::{Phase, Pipeline, PipelineEngine, RunningStage};
pub use stage::StageDescriptor;
pub use status::StageStatus;
