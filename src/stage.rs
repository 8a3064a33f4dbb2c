//! Stage processes.
//!
//! A stage is an opaque child process. The multiplexer only launches it and,
//! at shutdown, asks it to terminate and collects its exit status through the
//! [`StageControl`] interface.

use crate::error::Result;
use std::fmt;
use std::process::{Child, ExitStatus};

/// Shutdown-time control over a stage process.
pub trait StageControl {
    /// Position of the stage in the pipeline.
    fn index(&self) -> usize;

    /// Process id.
    fn pid(&self) -> u32;

    /// Ask the stage to stop. A stage that has already exited is not an error.
    fn terminate(&mut self) -> Result<()>;

    /// Block until the stage exits and return its status.
    fn wait(&mut self) -> Result<StageExit>;
}

/// How a stage finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageExit {
    /// Position of the stage in the pipeline.
    pub index: usize,
    /// Process id the stage ran as.
    pub pid: u32,
    /// Exit code, if the stage exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the stage was killed.
    pub signal: Option<i32>,
}

impl StageExit {
    /// Build from a std exit status.
    pub fn from_status(index: usize, pid: u32, status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        Self {
            index,
            pid,
            code: status.code(),
            signal: status.signal(),
        }
    }

    /// True if the stage exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Shell-style exit code: the exit status, or 128 + signal number.
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => -1,
        }
    }
}

impl fmt::Display for StageExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(
                f,
                "stage {} (pid {}) exited with {}",
                self.index, self.pid, code
            ),
            (None, Some(signal)) => write!(
                f,
                "stage {} (pid {}) killed by signal {}",
                self.index, self.pid, signal
            ),
            (None, None) => write!(f, "stage {} (pid {}) ended", self.index, self.pid),
        }
    }
}

/// One spawned filter process.
#[derive(Debug)]
pub struct StageProcess {
    index: usize,
    child: Child,
    exit: Option<StageExit>,
}

impl StageProcess {
    /// Wrap a spawned child.
    pub fn new(index: usize, child: Child) -> Self {
        Self {
            index,
            child,
            exit: None,
        }
    }

    /// Exit status, once reaped.
    pub fn exit(&self) -> Option<StageExit> {
        self.exit
    }
}

impl StageControl for StageProcess {
    fn index(&self) -> usize {
        self.index
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn terminate(&mut self) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already exited but not yet reaped.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn wait(&mut self) -> Result<StageExit> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        let status = self.child.wait()?;
        let exit = StageExit::from_status(self.index, self.child.id(), status);
        self.exit = Some(exit);
        Ok(exit)
    }
}

/// The set of spawned stages.
///
/// Dropping a set that still holds unreaped stages terminates and reaps them,
/// so an early return can never leave orphans behind.
#[derive(Debug, Default)]
pub struct StageSet {
    stages: Vec<StageProcess>,
}

impl StageSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly spawned stage.
    pub fn push(&mut self, stage: StageProcess) {
        self.stages.push(stage);
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True if no stages were spawned.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Iterate over stages.
    pub fn iter(&self) -> impl Iterator<Item = &StageProcess> {
        self.stages.iter()
    }

    /// Process ids, in pipeline order.
    pub fn pids(&self) -> Vec<u32> {
        self.stages.iter().map(|s| s.pid()).collect()
    }

    /// Wait for every stage, in pipeline order.
    ///
    /// Every stage is waited for even if an earlier wait fails; the first
    /// failure is returned.
    pub fn reap(&mut self) -> Result<Vec<StageExit>> {
        let mut exits = Vec::with_capacity(self.stages.len());
        let mut first_err = None;
        for stage in &mut self.stages {
            match stage.wait() {
                Ok(exit) => {
                    if exit.success() {
                        tracing::debug!(stage = exit.index, pid = exit.pid, "stage exited");
                    } else {
                        tracing::warn!(
                            stage = exit.index,
                            pid = exit.pid,
                            code = exit.exit_code(),
                            "{exit}"
                        );
                    }
                    exits.push(exit);
                }
                Err(e) => {
                    tracing::error!(stage = stage.index(), error = %e, "failed to reap stage");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(exits),
        }
    }

    /// Terminate every stage still running, then reap them all.
    pub fn terminate_all(&mut self) -> Result<Vec<StageExit>> {
        for stage in &mut self.stages {
            if let Err(e) = stage.terminate() {
                tracing::warn!(stage = stage.index(), error = %e, "failed to terminate stage");
            }
        }
        self.reap()
    }

    fn all_reaped(&self) -> bool {
        self.stages.iter().all(|s| s.exit.is_some())
    }
}

impl Drop for StageSet {
    fn drop(&mut self) {
        if !self.all_reaped() {
            // Errors are already logged by terminate_all.
            let _ = self.terminate_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn spawn(index: usize, program: &str, args: &[&str]) -> StageProcess {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        StageProcess::new(index, child)
    }

    #[test]
    fn test_exit_code_mapping() {
        let exit = StageExit {
            index: 0,
            pid: 1,
            code: Some(3),
            signal: None,
        };
        assert!(!exit.success());
        assert_eq!(exit.exit_code(), 3);

        let killed = StageExit {
            index: 0,
            pid: 1,
            code: None,
            signal: Some(9),
        };
        assert_eq!(killed.exit_code(), 137);
        assert!(killed.to_string().contains("signal 9"));
    }

    #[test]
    fn test_wait_collects_status_once() {
        let mut stage = spawn(2, "sh", &["-c", "exit 7"]);
        let exit = stage.wait().unwrap();
        assert_eq!(exit.index, 2);
        assert_eq!(exit.code, Some(7));

        // Second wait returns the cached status.
        assert_eq!(stage.wait().unwrap(), exit);
        assert_eq!(stage.exit(), Some(exit));
    }

    #[test]
    fn test_terminate_running_stage() {
        let mut stage = spawn(0, "sleep", &["30"]);
        stage.terminate().unwrap();
        let exit = stage.wait().unwrap();
        assert_eq!(exit.signal, Some(9));
        assert!(!exit.success());
    }

    #[test]
    fn test_terminate_after_exit_is_ok() {
        let mut stage = spawn(0, "true", &[]);
        stage.wait().unwrap();
        assert!(stage.terminate().is_ok());
    }

    #[test]
    fn test_stage_set_reaps_in_order() {
        let mut set = StageSet::new();
        set.push(spawn(0, "true", &[]));
        set.push(spawn(1, "false", &[]));
        assert_eq!(set.len(), 2);

        let exits = set.reap().unwrap();
        assert_eq!(exits.len(), 2);
        assert!(exits[0].success());
        assert_eq!(exits[1].code, Some(1));
    }

    #[test]
    fn test_stage_set_drop_terminates() {
        let mut set = StageSet::new();
        set.push(spawn(0, "sleep", &["30"]));
        let pid = set.pids()[0];
        drop(set);

        // Killed and reaped: the pid no longer names a process.
        let pid = rustix::process::Pid::from_raw(pid as i32).unwrap();
        assert_eq!(
            rustix::process::test_kill_process(pid),
            Err(rustix::io::Errno::SRCH)
        );
    }
}
