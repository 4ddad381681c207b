//! Multi-stage process pipelines.
//!
//! A [`Pipeline`] moves through `Setup → Starting → Running → Collecting → Done`.
//! Setup allocates the N−1 connections and binds every stage's streams before any
//! process exists. Starting launches stages in order and stops at the first failure.
//! Collecting waits on every stage that was started, whatever happened before.

use crate::command::{Stderr, Stdin, Stdout};
use crate::env::Environment;
use crate::error::{PipelineError, PipelineResult};
use crate::external::resolve_program;
use crate::stage::StageDescriptor;
use crate::status::StageStatus;
use std::io::{self, PipeReader, PipeWriter};
use std::mem;
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// Lifecycle position of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Setup,
    Starting,
    Running,
    Collecting,
    Done,
}

impl Phase {
    fn next(self) -> Option<Phase> {
        match self {
            Phase::Setup => Some(Phase::Starting),
            Phase::Starting => Some(Phase::Running),
            Phase::Running => Some(Phase::Collecting),
            Phase::Collecting => Some(Phase::Done),
            Phase::Done => None,
        }
    }
}

/// Unidirectional byte stream linking stage `i`'s stdout to stage `i + 1`'s stdin.
///
/// Both ends are close-on-exec, so a child only ever inherits the end that is
/// explicitly bound to one of its standard streams.
struct Connection {
    reader: PipeReader,
    writer: PipeWriter,
}

impl Connection {
    fn open() -> io::Result<Self> {
        let (reader, writer) = io::pipe()?;
        Ok(Self { reader, writer })
    }
}

/// Streams bound to a stage that has not been started yet.
struct StageStreams {
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
}

enum StageState {
    Pending(StageStreams),
    Started(Child),
    Finished(StageStatus),
    /// Never started because an earlier stage failed; its streams were released.
    Skipped,
    /// Started, but waiting on it failed; no status will ever be available.
    Lost,
}

/// One stage of a pipeline and the process backing it, if any.
pub struct RunningStage {
    index: usize,
    descriptor: StageDescriptor,
    state: StageState,
}

impl RunningStage {
    fn pending(index: usize, descriptor: StageDescriptor, streams: StageStreams) -> Self {
        Self {
            index,
            descriptor,
            state: StageState::Pending(streams),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn program(&self) -> &str {
        &self.descriptor.program
    }

    /// Process id while the stage is running.
    pub fn pid(&self) -> Option<u32> {
        match &self.state {
            StageState::Started(child) => Some(child.id()),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, StageState::Started(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.state, StageState::Skipped)
    }

    /// True once a wait on the stage's process has failed.
    pub fn is_lost(&self) -> bool {
        matches!(self.state, StageState::Lost)
    }

    /// Captured exit status once the stage has been waited on.
    pub fn status(&self) -> Option<StageStatus> {
        match self.state {
            StageState::Finished(status) => Some(status),
            _ => None,
        }
    }

    /// Launch the process with the streams bound during setup.
    ///
    /// The `Command` holding the parent's copies of those streams is dropped as soon
    /// as `spawn` returns, so the child is the only owner of its connection ends.
    fn start(&mut self, env: &Environment) -> Result<u32, PipelineError> {
        let streams = match mem::replace(&mut self.state, StageState::Skipped) {
            StageState::Pending(streams) => streams,
            other => {
                self.state = other;
                return Err(self.start_error(io::Error::other("stage was already started")));
            }
        };

        let Some(path) = resolve_program(env, &self.descriptor.program) else {
            return Err(self.start_error(io::Error::new(
                io::ErrorKind::NotFound,
                "command not found",
            )));
        };

        let mut command = Command::new(path);
        command
            .args(&self.descriptor.arguments)
            .envs(&env.vars)
            .current_dir(&env.current_dir)
            .stdin(streams.stdin)
            .stdout(streams.stdout)
            .stderr(streams.stderr);

        let child = command.spawn().map_err(|err| self.start_error(err))?;
        drop(command);

        let pid = child.id();
        self.state = StageState::Started(child);
        Ok(pid)
    }

    /// Drop the streams of a stage that will never run.
    fn skip(&mut self) {
        if let StageState::Pending(_) = self.state {
            self.state = StageState::Skipped;
        }
    }

    /// Block until the stage's process exits. Returns `None` if it was never started.
    ///
    /// A failed wait is not retried: the stage becomes [`StageState::Lost`].
    fn wait(&mut self) -> io::Result<Option<StageStatus>> {
        let StageState::Started(child) = &mut self.state else {
            return Ok(None);
        };
        match child.wait() {
            Ok(status) => {
                let status = StageStatus::from(status);
                self.state = StageState::Finished(status);
                Ok(Some(status))
            }
            Err(err) => {
                self.state = StageState::Lost;
                Err(err)
            }
        }
    }

    fn start_error(&self, source: io::Error) -> PipelineError {
        PipelineError::StageStart {
            index: self.index,
            program: self.descriptor.program.clone(),
            source,
        }
    }
}

/// The processes of one pipeline invocation and the state machine driving them.
///
/// Dropping a pipeline before it reaches [`Phase::Done`] still waits on every
/// running stage.
pub struct Pipeline {
    phase: Phase,
    stages: Vec<RunningStage>,
    connections: usize,
    failure: Option<PipelineError>,
}

impl Pipeline {
    /// Allocate connections and bind the standard streams of every stage.
    ///
    /// Stage 0 reads from `stdin`, the last stage writes to `stdout`, and every stage
    /// writes diagnostics to its own duplicate of `stderr`. No process is started.
    pub fn setup(
        stages: &[StageDescriptor],
        stdin: Box<dyn Stdin>,
        stdout: Box<dyn Stdout>,
        stderr: &dyn Stderr,
    ) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }

        let connections = (1..stages.len())
            .map(|_| Connection::open())
            .collect::<io::Result<Vec<_>>>()
            .map_err(|source| PipelineError::Connection { source })?;
        let connection_count = connections.len();
        debug!(
            stages = stages.len(),
            connections = connection_count,
            "allocated pipeline connections"
        );

        let mut connections = connections.into_iter();
        let mut upstream = stdin.stdio();
        let mut last_stdout = Some(stdout.stdio());
        let mut running = Vec::with_capacity(stages.len());

        for (index, descriptor) in stages.iter().enumerate() {
            let (stage_stdout, next_stdin) = match connections.next() {
                Some(Connection { reader, writer }) => (Stdio::from(writer), Stdio::from(reader)),
                None => (last_stdout.take().unwrap_or_else(Stdio::null), Stdio::null()),
            };
            let stage_stderr = stderr.stdio().map_err(|source| PipelineError::StderrDup {
                index,
                program: descriptor.program.clone(),
                source,
            })?;

            let streams = StageStreams {
                stdin: mem::replace(&mut upstream, next_stdin),
                stdout: stage_stdout,
                stderr: stage_stderr,
            };
            running.push(RunningStage::pending(index, descriptor.clone(), streams));
        }

        Ok(Self {
            phase: Phase::Setup,
            stages: running,
            connections: connection_count,
            failure: None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stages(&self) -> &[RunningStage] {
        &self.stages
    }

    /// Number of inter-stage connections allocated during setup.
    pub fn connection_count(&self) -> usize {
        self.connections
    }

    /// Start stages in order, stopping at the first one that cannot be started.
    ///
    /// Stages after a failed one are skipped, which closes the parent's copies of
    /// their connection ends; upstream writers then see a broken pipe instead of
    /// blocking forever.
    pub fn start_all(&mut self, env: &Environment) {
        self.advance(Phase::Starting);

        for stage in &mut self.stages {
            if self.failure.is_some() {
                stage.skip();
                continue;
            }
            match stage.start(env) {
                Ok(pid) => {
                    info!(stage = stage.index, program = %stage.program(), pid, "started stage")
                }
                Err(err) => {
                    warn!(
                        stage = stage.index,
                        program = %stage.program(),
                        error = %err,
                        "stage failed to start"
                    );
                    self.failure = Some(err);
                }
            }
        }

        self.advance(Phase::Running);
    }

    /// Wait on every started stage, recording the first failure not already known.
    pub fn collect(&mut self) {
        self.advance(Phase::Collecting);

        for stage in &mut self.stages {
            let error = match stage.wait() {
                Ok(None) => continue,
                Ok(Some(status)) => {
                    debug!(
                        stage = stage.index,
                        program = %stage.program(),
                        %status,
                        "stage finished"
                    );
                    if status.success() {
                        continue;
                    }
                    PipelineError::StageRuntime {
                        index: stage.index,
                        program: stage.descriptor.program.clone(),
                        status,
                    }
                }
                Err(source) => {
                    warn!(
                        stage = stage.index,
                        program = %stage.program(),
                        error = %source,
                        "wait failed"
                    );
                    PipelineError::StageWait {
                        index: stage.index,
                        program: stage.descriptor.program.clone(),
                        source,
                    }
                }
            };
            if self.failure.is_none() {
                self.failure = Some(error);
            }
        }

        self.advance(Phase::Done);
    }

    /// Aggregate the outcome. Must be called after [`Pipeline::collect`].
    pub fn finish(mut self) -> PipelineResult {
        debug_assert_eq!(self.phase, Phase::Done);
        debug_assert!(
            self.stages.iter().all(|stage| !stage.is_running()),
            "every started stage must be waited on"
        );
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn advance(&mut self, to: Phase) {
        debug_assert_eq!(self.phase.next(), Some(to), "invalid pipeline transition");
        self.phase = to;
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        for stage in &mut self.stages {
            stage.skip();
        }
        for stage in &mut self.stages {
            if stage.is_running() {
                warn!(
                    stage = stage.index,
                    program = %stage.program(),
                    "reaping stage left running"
                );
                let _ = stage.wait();
            }
        }
    }
}

/// Runs pipelines of external programs inside an [`Environment`].
pub struct PipelineEngine<'a> {
    env: &'a Environment,
}

impl<'a> PipelineEngine<'a> {
    pub fn new(env: &'a Environment) -> Self {
        Self { env }
    }

    /// Run `stages` connected stdout-to-stdin and wait for all of them.
    ///
    /// Returns the first failure in setup/start/wait order, or `Ok(())` if every
    /// stage exited successfully. A single stage is run without any connection.
    pub fn run(
        &self,
        stages: &[StageDescriptor],
        stdin: Box<dyn Stdin>,
        stdout: Box<dyn Stdout>,
        stderr: &dyn Stderr,
    ) -> PipelineResult {
        let mut pipeline = Pipeline::setup(stages, stdin, stdout, stderr)?;
        pipeline.start_all(self.env);
        pipeline.collect();
        pipeline.finish()
    }
}
