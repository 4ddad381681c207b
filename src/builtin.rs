use crate::command::{CommandFactory, ExecutableCommand, ExitCode, Stderr, Stdin, Stdout};
use crate::env::Environment;
use crate::interpreter::Factory;
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process. They only run on the single-command
/// path; every stage of a pipeline is an external program.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Other names the command answers to.
    fn aliases() -> &'static [&'static str] {
        &[]
    }

    /// Executes the command using provided IO streams and environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        mut stdin: Box<dyn Stdin>,
        mut stdout: Box<dyn Stdout>,
        stderr: &mut dyn Stderr,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let result = <T as BuiltinCommand>::execute(*self, &mut stdin, &mut stdout, env);
        stdout.flush()?;
        match result {
            Ok(code) => Ok(code),
            Err(e) => {
                writeln!(stderr, "{:#}", e)?;
                Ok(1)
            }
        }
    }
}

/// Output of `--help` or an argument error, printed instead of running the builtin.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        _stdin: Box<dyn Stdin>,
        mut stdout: Box<dyn Stdout>,
        stderr: &mut dyn Stderr,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.is_error {
            writeln!(stderr, "{}", self.output)?;
            Ok(1)
        } else {
            writeln!(stdout, "{}", self.output)?;
            Ok(0)
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(
        &self,
        _env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>> {
        if name != T::name() && !T::aliases().contains(&name) {
            return None;
        }
        Some(match T::from_args(&[name], args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        })
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", env.current_dir.display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to, absolute or relative; $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let target = match self.target.filter(|t| !t.is_empty()) {
            Some(t) => PathBuf::from(t),
            None => match env.var("HOME") {
                Some(home) => PathBuf::from(home),
                None => bail!("cd: no target and HOME not set"),
            },
        };

        let new_dir = env.current_dir.join(target);
        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: {}", new_dir.display()))?;

        env::set_current_dir(&canonical)
            .with_context(|| format!("cd: can't chdir to {}", canonical.display()))?;
        env.current_dir = canonical;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Leave the interpreter after the current line.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn aliases() -> &'static [&'static str] {
        &["\\quit"]
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        env.should_exit = true;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// write the arguments to standard output, separated by spaces.
/// by default, a trailing newline is printed.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(stdout, "{}", s)?;
        } else {
            writeln!(stdout, "{}", s)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// send a signal to a process; SIGKILL unless another is given.
pub struct Kill {
    #[argh(option, short = 's', default = "libc::SIGKILL")]
    /// signal number to send
    pub signal: i32,

    #[argh(positional)]
    /// id of the target process
    pub pid: String,
}

impl BuiltinCommand for Kill {
    fn name() -> &'static str {
        "kill"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let pid: libc::pid_t = self
            .pid
            .parse()
            .ok()
            .filter(|pid| *pid > 0)
            .with_context(|| format!("kill: invalid PID: {}", self.pid))?;

        if unsafe { libc::kill(pid, self.signal) } != 0 {
            let err = std::io::Error::last_os_error();
            bail!("kill: ({}): {}", pid, err);
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// list running processes.
pub struct Ps {}

impl BuiltinCommand for Ps {
    fn name() -> &'static str {
        "ps"
    }

    #[cfg(target_os = "linux")]
    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let mut processes: Vec<(u32, String)> = fs::read_dir("/proc")
            .context("ps: can't read /proc")?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let pid = entry.file_name().to_str()?.parse::<u32>().ok()?;
                // The process may exit between listing and reading.
                let comm = fs::read_to_string(entry.path().join("comm")).ok()?;
                Some((pid, comm.trim_end().to_string()))
            })
            .collect();
        processes.sort_unstable();

        writeln!(stdout, "{:>7} CMD", "PID")?;
        for (pid, comm) in processes {
            writeln!(stdout, "{:>7} {}", pid, comm)?;
        }
        Ok(0)
    }

    #[cfg(not(target_os = "linux"))]
    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let output = std::process::Command::new("ps")
            .output()
            .context("ps: can't run system ps")?;
        stdout.write_all(&output.stdout)?;
        Ok(output.status.code().unwrap_or(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env as stdenv;
    use std::io::Cursor;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn test_env(current_dir: PathBuf) -> Environment {
        Environment {
            vars: HashMap::new(),
            current_dir,
            should_exit: false,
        }
    }

    fn run<T: BuiltinCommand>(cmd: T, env: &mut Environment) -> (Result<ExitCode>, String) {
        let mut out = Vec::new();
        let res = BuiltinCommand::execute(cmd, &mut Cursor::new(Vec::new()), &mut out, env);
        (res, String::from_utf8(out).unwrap())
    }

    #[test]
    fn pwd_prints_environment_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = test_env(dir.path().to_path_buf());

        let (res, out) = run(Pwd {}, &mut env);
        assert_eq!(res.unwrap(), 0);
        assert_eq!(out, format!("{}\n", dir.path().display()));
    }

    #[test]
    fn echo_joins_arguments() {
        let mut env = test_env(PathBuf::from("/"));

        let echo = Echo {
            no_newline: false,
            args: vec!["hello".into(), "world".into()],
        };
        assert_eq!(run(echo, &mut env).1, "hello world\n");

        let echo = Echo {
            no_newline: true,
            args: vec!["foo".into(), "bar".into()],
        };
        assert_eq!(run(echo, &mut env).1, "foo bar");
    }

    #[test]
    fn cd_relative_to_environment_dir() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let base = tempfile::tempdir().unwrap();
        fs::create_dir(base.path().join("child")).unwrap();
        let base_canonical = fs::canonicalize(base.path()).unwrap();

        let mut env = test_env(base_canonical.clone());
        let (res, _) = run(Cd { target: Some("child".into()) }, &mut env);
        stdenv::set_current_dir(&orig).unwrap();

        assert_eq!(res.unwrap(), 0);
        assert_eq!(env.current_dir, base_canonical.join("child"));
    }

    #[test]
    fn cd_without_target_goes_home() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let home_canonical = fs::canonicalize(home.path()).unwrap();

        let mut env = test_env(orig.clone());
        env.vars.insert("HOME".into(), home_canonical.to_string_lossy().into_owned());
        let (res, _) = run(Cd { target: None }, &mut env);
        let moved_to = stdenv::current_dir().unwrap();
        stdenv::set_current_dir(&orig).unwrap();

        assert_eq!(res.unwrap(), 0);
        assert_eq!(env.current_dir, home_canonical);
        assert_eq!(fs::canonicalize(moved_to).unwrap(), home_canonical);
    }

    #[test]
    fn cd_to_missing_dir_leaves_cwd_alone() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let mut env = test_env(orig.clone());

        let target = format!("nonexistent_dir_for_cd_test_{}", std::process::id());
        let (res, _) = run(Cd { target: Some(target) }, &mut env);

        assert!(res.is_err());
        assert_eq!(stdenv::current_dir().unwrap(), orig);
        assert_eq!(env.current_dir, orig);
    }

    #[test]
    fn exit_and_quit_set_the_flag() {
        let mut env = test_env(PathBuf::from("/"));
        let (res, _) = run(Exit { _args: Vec::new() }, &mut env);
        assert_eq!(res.unwrap(), 0);
        assert!(env.should_exit);

        let factory = Factory::<Exit>::default();
        assert!(factory.try_create(&env, "\\quit", &[]).is_some());
        assert!(factory.try_create(&env, "quit", &[]).is_none());
    }

    #[test]
    fn kill_rejects_bad_pids() {
        let mut env = test_env(PathBuf::from("/"));
        for pid in ["abc", "-5", "0"] {
            let kill = Kill {
                signal: libc::SIGKILL,
                pid: pid.to_string(),
            };
            let err = run(kill, &mut env).0.unwrap_err();
            assert!(err.to_string().contains("invalid PID"), "{pid}: {err}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn kill_terminates_a_child() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let mut env = test_env(PathBuf::from("/"));
        let kill = Kill {
            signal: libc::SIGKILL,
            pid: child.id().to_string(),
        };
        assert_eq!(run(kill, &mut env).0.unwrap(), 0);

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn ps_lists_this_process() {
        let mut env = test_env(PathBuf::from("/"));
        let (res, out) = run(Ps {}, &mut env);
        assert_eq!(res.unwrap(), 0);

        let me = std::process::id().to_string();
        assert!(out.starts_with("    PID CMD\n"));
        assert!(out.lines().any(|line| line.split_whitespace().next() == Some(me.as_str())));
    }

    #[test]
    fn factory_reports_argument_errors() {
        let env = test_env(PathBuf::from("/"));
        let factory = Factory::<Echo>::default();
        assert!(factory.try_create(&env, "pwd", &[]).is_none());

        let mut env = env;
        let mut err = tempfile::tempfile().unwrap();
        let cmd = factory.try_create(&env, "echo", &["--bogus"]).unwrap();
        let code = cmd
            .execute(
                Box::new(tempfile::tempfile().unwrap()),
                Box::new(tempfile::tempfile().unwrap()),
                &mut err,
                &mut env,
            )
            .unwrap();
        assert_eq!(code, 1);
    }
}
