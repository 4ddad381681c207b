use crate::command::{CommandFactory, ExecutableCommand, ExitCode, Stderr, Stdin, Stdout};
use crate::env::Environment;
use crate::error::PipelineError;
use crate::interpreter::Factory;
use crate::pipeline::PipelineEngine;
use crate::stage::StageDescriptor;
use anyhow::Result;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Program that is not a builtin, run as a one-stage pipeline.
pub struct ExternalCommand {
    stage: StageDescriptor,
}

impl ExternalCommand {
    pub fn new(stage: StageDescriptor) -> Self {
        Self { stage }
    }
}

impl CommandFactory for Factory<ExternalCommand> {
    fn try_create(
        &self,
        env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>> {
        resolve_program(env, name)?;
        Some(Box::new(ExternalCommand::new(StageDescriptor::new(
            name,
            args.iter().copied(),
        ))))
    }
}

impl ExecutableCommand for ExternalCommand {
    fn execute(
        self: Box<Self>,
        stdin: Box<dyn Stdin>,
        stdout: Box<dyn Stdout>,
        stderr: &mut dyn Stderr,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let engine = PipelineEngine::new(env);
        match engine.run(std::slice::from_ref(&self.stage), stdin, stdout, stderr) {
            Ok(()) => Ok(0),
            Err(PipelineError::StageRuntime { status, .. }) => Ok(status.exit_code()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Resolve `program` against the `PATH` stored in `env`.
pub fn resolve_program(env: &Environment, program: &str) -> Option<PathBuf> {
    let search_paths = env.var("PATH").unwrap_or_default();
    find_command_path(OsStr::new(&search_paths), Path::new(program))
}

/// Resolve a command path the way a typical shell would.
///
/// - Absolute path: returned if it names an executable file.
/// - Anything containing a separator (`bin/sh`, `./foo`): checked relative to
///   the current directory, never searched on `PATH`.
/// - Bare name: each directory of `search_paths` is tried in order.
/// - Empty path: `None`.
pub fn find_command_path(search_paths: &OsStr, path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, _) => None,
        (Some(name), None) if !path.is_absolute() => {
            std::env::split_paths(search_paths)
                .map(|dir| dir.join(name.as_os_str()))
                .find(|candidate| is_executable(candidate))
        }
        _ => is_executable(path).then(|| path.to_path_buf()),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::os::unix::fs::PermissionsExt;

    fn touch(path: &Path, mode: u32) {
        File::create(path).expect("create file");
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("chmod");
    }

    #[test]
    fn absolute_path_must_exist() {
        let found = find_command_path(OsStr::new("/bin"), Path::new("/bin/sh"));
        assert_eq!(found.as_deref(), Some(Path::new("/bin/sh")));

        assert!(find_command_path(OsStr::new("/bin"), Path::new("/bin/nonexisting")).is_none());
    }

    #[test]
    fn bare_name_searches_path_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        touch(&first.path().join("tool"), 0o755);
        touch(&second.path().join("tool"), 0o755);

        let paths = std::env::join_paths([first.path(), second.path()]).unwrap();
        let found = find_command_path(&paths, Path::new("tool")).expect("tool on PATH");
        assert_eq!(found, first.path().join("tool"));
    }

    #[test]
    fn non_executable_files_are_skipped() {
        let plain = tempfile::tempdir().unwrap();
        let exec = tempfile::tempdir().unwrap();
        touch(&plain.path().join("tool"), 0o644);
        touch(&exec.path().join("tool"), 0o700);

        let paths = std::env::join_paths([plain.path(), exec.path()]).unwrap();
        let found = find_command_path(&paths, Path::new("tool")).expect("tool on PATH");
        assert_eq!(found, exec.path().join("tool"));
    }

    #[test]
    fn path_with_separator_is_not_searched() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("bin")).unwrap();
        touch(&dir.path().join("bin").join("tool"), 0o755);

        let paths = std::env::join_paths([dir.path()]).unwrap();
        assert!(find_command_path(&paths, Path::new("bin/tool")).is_none());
        assert!(find_command_path(&paths, &dir.path().join("bin/tool")).is_some());
    }

    #[test]
    fn empty_and_missing_names_resolve_to_nothing() {
        assert!(find_command_path(OsStr::new("/bin"), Path::new("")).is_none());
        let missing = Path::new("nonexistentprog123");
        assert!(find_command_path(OsStr::new("/bin:/usr/bin"), missing).is_none());
    }

    #[test]
    fn resolve_program_uses_environment_path() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("only-here"), 0o755);

        let mut env = Environment::in_dir(dir.path());
        env.vars.insert("PATH".into(), dir.path().to_string_lossy().into_owned());
        assert_eq!(resolve_program(&env, "only-here"), Some(dir.path().join("only-here")));

        env.vars.insert("PATH".into(), "/nonexistent-dir".into());
        assert_eq!(resolve_program(&env, "only-here"), None);
    }
}
