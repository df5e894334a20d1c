// src/process.rs

//! External command execution
//!
//! Build steps, patch application and smoke tests all run as separate
//! processes spawned with an explicit argument vector, never through a
//! shell. The working directory and environment are set on each spawned
//! command, so concurrent builds never share process-wide state.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// How often a running child is checked for exit or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Number of stderr lines kept for failure reports
pub const STDERR_TAIL_LINES: usize = 20;

/// Shared abort flag for one build
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the build stop; the running child is killed
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A fully resolved command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// The complete environment of the child; nothing else is inherited
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Human-readable command line for logs and errors
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// What a finished command left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the child was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last lines of stderr, for failure reports
    pub fn stderr_tail(&self) -> String {
        tail_lines(&String::from_utf8_lossy(&self.stderr), STDERR_TAIL_LINES)
    }
}

/// Executes commands on behalf of the pipeline
///
/// Implementations block until the command exits. A spawn failure (e.g. the
/// program does not exist) is reported as an `Err`; a non-zero exit is a
/// normal `Ok` with the exit code filled in.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec, cancel: &Cancellation) -> Result<CommandOutput>;
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, cancel: &Cancellation) -> Result<CommandOutput> {
        cancel.check()?;
        debug!(cwd = %spec.cwd.display(), "Running {}", spec.display());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a cancel reaches everything the step forks
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to spawn '{}': {}", spec.program, e),
            ))
        })?;

        // Pipes are drained concurrently with the wait
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let exit_code = match wait(&mut child, cancel)
            .and_then(|code| wait_drained(&[&stdout, &stderr], cancel).map(|()| code))
        {
            Ok(code) => code,
            Err(e) => {
                warn!("Cancelling {}", spec.display());
                terminate(&mut child, spec);
                // Drain threads are left detached; a process that escaped the
                // group may still hold a pipe open
                return Err(e);
            }
        };

        Ok(CommandOutput {
            exit_code,
            stdout: join(stdout),
            stderr: join(stderr),
        })
    }
}

/// Poll the direct child until it exits or the build is cancelled
fn wait(child: &mut Child, cancel: &Cancellation) -> Result<Option<i32>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status.code());
        }
        cancel.check()?;
        thread::sleep(POLL_INTERVAL);
    }
}

/// Wait for the output pipes to reach EOF
///
/// Processes the step left running in the background keep the pipes open
/// after the direct child exits, so this wait also honours cancellation.
fn wait_drained(handles: &[&Option<thread::JoinHandle<Vec<u8>>>], cancel: &Cancellation) -> Result<()> {
    while handles
        .iter()
        .any(|h| h.as_ref().is_some_and(|h| !h.is_finished()))
    {
        cancel.check()?;
        thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}

/// Kill the child's whole process group and reap the child
fn terminate(child: &mut Child, spec: &CommandSpec) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: killpg takes no pointers; the group was created for this child
            let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
            if rc != 0 {
                debug!("Process group of {} already gone", spec.program);
            }
        }
    }
    if let Err(e) = child.kill() {
        debug!("Failed to kill {}: {}", spec.program, e);
    }
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Keep the last `n` lines of `text`
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every command and answers with scripted exit codes
    #[derive(Default)]
    pub struct RecordingRunner {
        pub calls: Mutex<Vec<CommandSpec>>,
        /// Exit codes keyed by program name; unlisted programs exit 0
        pub exit_codes: BTreeMap<String, i32>,
    }

    impl RecordingRunner {
        pub fn failing(program: &str, code: i32) -> Self {
            let mut exit_codes = BTreeMap::new();
            exit_codes.insert(program.to_string(), code);
            Self {
                calls: Mutex::new(Vec::new()),
                exit_codes,
            }
        }

        pub fn programs(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.program.clone())
                .collect()
        }

        pub fn count(&self, program: &str) -> usize {
            self.programs().iter().filter(|p| *p == program).count()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, spec: &CommandSpec, cancel: &Cancellation) -> Result<CommandOutput> {
            cancel.check()?;
            self.calls.lock().unwrap().push(spec.clone());
            let code = self.exit_codes.get(&spec.program).copied().unwrap_or(0);
            Ok(CommandOutput {
                exit_code: Some(code),
                stdout: format!("ran {}\n", spec.program).into_bytes(),
                stderr: if code == 0 {
                    Vec::new()
                } else {
                    format!("{}: error {}\n", spec.program, code).into_bytes()
                },
            })
        }
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\nb\nc\nd", 2), "c\nd");
        assert_eq!(tail_lines("a", 5), "a");
        assert_eq!(tail_lines("", 5), "");
    }

    #[test]
    fn test_cancellation_flag() {
        let cancel = Cancellation::new();
        let shared = cancel.clone();
        assert!(cancel.check().is_ok());
        shared.cancel();
        assert!(matches!(cancel.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_command_spec_display() {
        let spec = CommandSpec::new("make", "/tmp").args(["install", "-j2"]);
        assert_eq!(spec.display(), "make install -j2");
    }

    #[cfg(unix)]
    mod system {
        use super::*;
        use std::time::Instant;
        use tempfile::TempDir;

        fn sh(script: &str, cwd: &std::path::Path) -> CommandSpec {
            let mut env = BTreeMap::new();
            env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
            env.insert("GREETING".to_string(), "hello".to_string());
            CommandSpec::new("/bin/sh", cwd).args(["-c", script]).env(env)
        }

        #[test]
        fn test_captures_output_and_exit_code() {
            let dir = TempDir::new().unwrap();
            let out = SystemRunner
                .run(&sh("echo $GREETING; echo oops >&2; exit 3", dir.path()), &Cancellation::new())
                .unwrap();
            assert_eq!(out.exit_code, Some(3));
            assert!(!out.success());
            assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
            assert_eq!(out.stderr_tail(), "oops");
        }

        #[test]
        fn test_runs_in_requested_directory_with_explicit_env() {
            let dir = TempDir::new().unwrap();
            let out = SystemRunner
                .run(&sh("pwd; echo ${HOME:-unset}", dir.path()), &Cancellation::new())
                .unwrap();
            let text = String::from_utf8_lossy(&out.stdout).to_string();
            let mut lines = text.lines();
            let pwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
            assert_eq!(pwd, std::fs::canonicalize(dir.path()).unwrap());
            assert_eq!(lines.next(), Some("unset"));
        }

        #[test]
        fn test_missing_program_is_an_error() {
            let dir = TempDir::new().unwrap();
            let spec = CommandSpec::new("/nonexistent/program", dir.path());
            assert!(SystemRunner.run(&spec, &Cancellation::new()).is_err());
        }

        #[test]
        fn test_cancel_kills_running_child() {
            let dir = TempDir::new().unwrap();
            let cancel = Cancellation::new();
            let trigger = cancel.clone();
            let handle = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                trigger.cancel();
            });

            let started = Instant::now();
            let result = SystemRunner.run(&sh("sleep 30", dir.path()), &cancel);
            handle.join().unwrap();

            assert!(matches!(result, Err(Error::Cancelled)));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn test_cancel_with_background_process_holding_pipes() {
            let dir = TempDir::new().unwrap();
            let cancel = Cancellation::new();
            let trigger = cancel.clone();
            let handle = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                trigger.cancel();
            });

            let started = Instant::now();
            let result = SystemRunner.run(
                &sh("sleep 30 & echo $! > bg.pid; exit 0", dir.path()),
                &cancel,
            );
            handle.join().unwrap();

            assert!(matches!(result, Err(Error::Cancelled)));
            assert!(started.elapsed() < Duration::from_secs(10));

            // The background sleep shared the step's process group and died with it
            #[cfg(target_os = "linux")]
            {
                let pid = std::fs::read_to_string(dir.path().join("bg.pid")).unwrap();
                let deadline = Instant::now() + Duration::from_secs(5);
                while is_running(pid.trim()) && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(50));
                }
                assert!(!is_running(pid.trim()));
            }
        }

        /// Live (not zombie) process according to procfs
        #[cfg(target_os = "linux")]
        fn is_running(pid: &str) -> bool {
            match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Ok(stat) => stat
                    .rsplit_once(')')
                    .and_then(|(_, rest)| rest.split_whitespace().next())
                    .is_some_and(|state| state != "Z" && state != "X"),
                Err(_) => false,
            }
        }

        #[test]
        fn test_background_output_is_collected_after_child_exits() {
            let dir = TempDir::new().unwrap();
            let out = SystemRunner
                .run(&sh("(sleep 0.2; echo late) & echo early", dir.path()), &Cancellation::new())
                .unwrap();
            assert!(out.success());
            let text = String::from_utf8_lossy(&out.stdout);
            assert!(text.contains("early"));
            assert!(text.contains("late"));
        }
    }
}
