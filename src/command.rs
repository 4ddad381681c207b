use crate::env::Environment;
use anyhow::Result;
use std::fs::File;
use std::io::{self, PipeWriter, Read, Write};
use std::process::Stdio;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// Processes killed by a signal are reported as `128 + signal`, like POSIX shells do.
pub type ExitCode = i32;

/// Abstraction over a readable input stream that can also be handed to a child
/// process as its standard input.
///
/// A blanket implementation exists for any type that implements `Read` and
/// `Into<Stdio>` (e.g. [`File`] or [`std::io::PipeReader`]).
pub trait Stdin: Read {
    /// Convert this input into a [`Stdio`] handle suitable for `std::process::Command`.
    fn stdio(self: Box<Self>) -> Stdio;
}

impl<T: Read + Into<Stdio>> Stdin for T {
    fn stdio(self: Box<Self>) -> Stdio {
        (*self).into()
    }
}

/// Abstraction over a writable output stream that can also be handed to a child
/// process as its standard output.
///
/// A blanket implementation exists for any type that implements `Write` and `Into<Stdio>`
/// (e.g. `std::io::Stdout` or [`File`]).
pub trait Stdout: Write {
    /// Convert this output into a [`Stdio`] handle suitable for `std::process::Command`.
    fn stdio(self: Box<Self>) -> Stdio;
}

impl<T: Write + Into<Stdio>> Stdout for T {
    fn stdio(self: Box<Self>) -> Stdio {
        (*self).into()
    }
}

/// Diagnostic stream shared by every stage of a pipeline.
///
/// Unlike [`Stdout`] it is borrowed, not consumed: each stage gets its own
/// duplicate of the underlying descriptor.
pub trait Stderr: Write {
    /// Produce a fresh [`Stdio`] handle writing to the same destination.
    fn stdio(&self) -> io::Result<Stdio>;
}

impl Stderr for io::Stderr {
    fn stdio(&self) -> io::Result<Stdio> {
        Ok(Stdio::inherit())
    }
}

impl Stderr for File {
    fn stdio(&self) -> io::Result<Stdio> {
        self.try_clone().map(Stdio::from)
    }
}

impl Stderr for PipeWriter {
    fn stdio(&self) -> io::Result<Stdio> {
        self.try_clone().map(Stdio::from)
    }
}

/// Object-safe trait for any command that can be executed by the shell.
///
/// This is implemented by built-ins via a blanket impl and by external commands.
pub trait ExecutableCommand {
    /// Executes the command.
    fn execute(
        self: Box<Self>,
        stdin: Box<dyn Stdin>,
        stdout: Box<dyn Stdout>,
        stderr: &mut dyn Stderr,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
/// Implementations can use the environment to resolve executables (e.g., using PATH).
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(
        &self,
        env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>>;
}
