use crate::command::{CommandFactory, ExitCode, Stderr, Stdin, Stdout};
use crate::env::Environment;
use crate::pipeline::PipelineEngine;
use crate::stage::{self, StageDescriptor};
use anyhow::anyhow;
use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, Result};
use std::io::{Read, StdinLock};
use std::process::Stdio;
use tracing::debug;

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports commands defined in this crate: built-ins and external programs.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// Interactive command interpreter.
///
/// A line holding a single command is dispatched through the [`CommandFactory`] list
/// (built-ins first, then programs found on `PATH`). A line with `|` separators is
/// handed to the [`PipelineEngine`], which runs every stage as an external program.
///
/// Example
/// ```
/// use pipeline_shell::Interpreter;
/// let mut sh = Interpreter::default();
/// let code = sh.run("echo", &["hello", "world"]).unwrap();
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter {
    env: Environment,
    commands: Vec<Box<dyn CommandFactory>>,
}

impl Interpreter {
    /// Create a new interpreter with a custom set of command factories.
    pub fn new(commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            env: Environment::new(),
            commands,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Run a single command invocation by name with arguments on the inherited streams.
    ///
    /// Returns the command's exit code or an error if the command cannot be created
    /// or fails to execute.
    pub fn run(&mut self, name: &str, args: &[&str]) -> anyhow::Result<ExitCode> {
        let stdin = InheritedStdin(std::io::stdin().lock());
        self.dispatch(
            name,
            args,
            Box::new(stdin),
            Box::new(std::io::stdout()),
            &mut std::io::stderr(),
        )
    }

    /// Execute one input line with the given standard streams.
    ///
    /// Pipeline failures come back as [`PipelineError`](crate::PipelineError) wrapped in
    /// `anyhow`; a single command's non-zero exit is returned as its exit code.
    pub fn execute_line(
        &mut self,
        line: &str,
        stdin: Box<dyn Stdin>,
        stdout: Box<dyn Stdout>,
        stderr: &mut dyn Stderr,
    ) -> anyhow::Result<ExitCode> {
        let stages = stage::build(line)?;
        if let [StageDescriptor { program, arguments }] = stages.as_slice() {
            let args: Vec<&str> = arguments.iter().map(String::as_str).collect();
            return self.dispatch(program, &args, stdin, stdout, stderr);
        }

        debug!(stages = stages.len(), "running pipeline");
        PipelineEngine::new(&self.env).run(&stages, stdin, stdout, stderr)?;
        Ok(0)
    }

    /// Read lines until EOF or `exit`, printing one diagnostic per failed line.
    pub fn repl(&mut self, prompt: &str) -> Result<()> {
        let mut rl = DefaultEditor::new()?;

        while !self.env.should_exit {
            match rl.readline(prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line)?;

                    let stdin = InheritedStdin(std::io::stdin().lock());
                    let result = self.execute_line(
                        line,
                        Box::new(stdin),
                        Box::new(std::io::stdout()),
                        &mut std::io::stderr(),
                    );
                    match result {
                        Ok(code) => debug!(code, "line finished"),
                        Err(err) => eprintln!("Error: {err}"),
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    fn dispatch(
        &mut self,
        name: &str,
        args: &[&str],
        stdin: Box<dyn Stdin>,
        stdout: Box<dyn Stdout>,
        stderr: &mut dyn Stderr,
    ) -> anyhow::Result<ExitCode> {
        let cmd = self
            .commands
            .iter()
            .find_map(|factory| factory.try_create(&self.env, name, args))
            .ok_or_else(|| anyhow!("command not found: {}", name))?;
        cmd.execute(stdin, stdout, stderr, &mut self.env)
    }
}

impl Default for Interpreter {
    /// Create an interpreter with the default set of commands:
    /// - built-ins: `pwd`, `cd`, `echo`, `kill`, `ps`, `exit` (`\quit`)
    /// - external command launcher
    fn default() -> Self {
        use crate::builtin::*;
        use crate::external::ExternalCommand;
        Self::new(vec![
            Box::new(Factory::<Pwd>::default()),
            Box::new(Factory::<Cd>::default()),
            Box::new(Factory::<Echo>::default()),
            Box::new(Factory::<Kill>::default()),
            Box::new(Factory::<Ps>::default()),
            Box::new(Factory::<Exit>::default()),
            Box::new(Factory::<ExternalCommand>::default()),
        ])
    }
}

/// The interpreter's own stdin; children inherit the descriptor directly.
struct InheritedStdin(StdinLock<'static>);

impl Read for InheritedStdin {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl Stdin for InheritedStdin {
    fn stdio(self: Box<Self>) -> Stdio {
        Stdio::inherit()
    }
}
