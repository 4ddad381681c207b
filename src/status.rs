use crate::command::ExitCode;
use std::fmt;
use std::process::ExitStatus;

/// Termination status of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageStatus(ExitStatus);

impl StageStatus {
    pub fn success(&self) -> bool {
        self.0.success()
    }

    /// Exit code passed to `exit`, `None` if the process was killed by a signal.
    pub fn code(&self) -> Option<i32> {
        self.0.code()
    }

    /// Signal that terminated the process, if any.
    #[cfg(unix)]
    pub fn signal(&self) -> Option<i32> {
        use std::os::unix::process::ExitStatusExt;
        self.0.signal()
    }

    #[cfg(not(unix))]
    pub fn signal(&self) -> Option<i32> {
        None
    }

    /// Shell-style exit code: the real code, or `128 + signal` for signal deaths.
    pub fn exit_code(&self) -> ExitCode {
        match self.code() {
            Some(code) => code,
            None => terminated_by_signal(self.0),
        }
    }
}

impl From<ExitStatus> for StageStatus {
    fn from(status: ExitStatus) -> Self {
        Self(status)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code(), self.signal()) {
            (Some(code), _) => write!(f, "exited with status {code}"),
            (None, Some(signal)) => write!(f, "terminated by signal {signal}"),
            (None, None) => write!(f, "terminated abnormally"),
        }
    }
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = exit_status.signal() {
        128 + signal
    } else if exit_status.core_dumped() {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> ExitCode {
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    // Raw wait(2) statuses: exit code lives in bits 8..16, signal in the low 7 bits.
    fn exited(code: i32) -> StageStatus {
        StageStatus::from(ExitStatus::from_raw(code << 8))
    }

    fn signaled(signal: i32) -> StageStatus {
        StageStatus::from(ExitStatus::from_raw(signal))
    }

    #[test]
    fn exit_codes_pass_through() {
        assert!(exited(0).success());
        assert_eq!(exited(3).exit_code(), 3);
        assert_eq!(exited(3).to_string(), "exited with status 3");
    }

    #[test]
    fn signal_death_is_a_failure() {
        let status = signaled(libc::SIGKILL);
        assert!(!status.success());
        assert_eq!(status.signal(), Some(libc::SIGKILL));
        assert_eq!(status.exit_code(), 128 + libc::SIGKILL);
        assert_eq!(status.to_string(), "terminated by signal 9");
    }
}
