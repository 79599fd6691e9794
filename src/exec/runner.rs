//! Command Runner
//!
//! A [`Runner`] that launches a child process with secrets substituted into
//! its environment, and can stop or relaunch it on request.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──run()──▶ Running ──exit──────────────▶ Stopped / Failed
//!                   │  ▲
//!         restart() │  │ relaunched with freshly rendered inputs
//!                   ▼  │
//!                Restarting
//!                   │
//!         stop()  ──┴──────────────────────────▶ Stopped
//! ```
//!
//! Stop and restart requests go through a bounded mailbox. Requests made while
//! `run()` is not active, or while the mailbox is full, are dropped. Requests
//! queued behind the one being served collapse into it, and a queued stop
//! wins over a restart. A stop that arrives while the next launch is being
//! rendered ends the run before anything is spawned.

use crate::error::{ExecError, TokenError};
use crate::exec::Runner;
use async_trait::async_trait;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// How long a cancelled command may take to exit
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Capacity of the stop/restart mailbox
const REQUEST_BUFFER: usize = 100;

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("environment variable pattern is valid")
});

/// Rewrites a string, e.g. by resolving the secrets it references
#[async_trait]
pub trait Replacer: Send + Sync {
    async fn replace(&self, s: &str) -> Result<String, TokenError>;
}

#[async_trait]
impl<T: Replacer + ?Sized> Replacer for Arc<T> {
    async fn replace(&self, s: &str) -> Result<String, TokenError> {
        (**self).replace(s).await
    }
}

/// Everything that determines how a command is launched
///
/// Two renders that compare equal would launch the same process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInputs {
    pub name: String,
    pub args: Vec<String>,
    /// `KEY=VALUE` entries, in order
    pub env: Vec<String>,
}

impl CommandInputs {
    /// Whether launching with `other` would differ from launching with `self`
    pub fn differs_from(&self, other: &CommandInputs) -> bool {
        self != other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Restarting,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Stop,
    Restart,
}

/// Runs a command, re-rendering its environment on every launch
pub struct CommandRunner<R> {
    name: String,
    args: Vec<String>,
    env: Vec<String>,
    replacer: R,
    stdin: StdioMode,
    grace_period: Duration,
    state: Mutex<RunnerState>,
    active: AtomicBool,
    running_inputs: Mutex<Option<CommandInputs>>,
    requests_tx: mpsc::Sender<Request>,
    requests_rx: tokio::sync::Mutex<mpsc::Receiver<Request>>,
}

/// Where the child's stdin comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    #[default]
    Inherit,
    Null,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<R> CommandRunner<R> {
    pub fn state(&self) -> RunnerState {
        *lock(&self.state)
    }

    fn set_state(&self, state: RunnerState) {
        let mut current = lock(&self.state);
        if *current != state {
            debug!(command = %self.name, from = ?*current, to = ?state, "runner state change");
            *current = state;
        }
    }
}

impl<R: Replacer> CommandRunner<R> {
    /// Create a runner for `name args...`
    ///
    /// # Arguments
    ///
    /// * `env` - `KEY=VALUE` entries, each passed through `replacer` before
    ///   every launch
    /// * `replacer` - Substitutes secrets into environment entries
    /// * `name` - Program to run, resolved through `PATH`
    /// * `args` - Arguments; `$VAR` and `${VAR}` expand against the rendered
    ///   environment
    pub fn new(env: Vec<String>, replacer: R, name: impl Into<String>, args: Vec<String>) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_BUFFER);
        Self {
            name: name.into(),
            args,
            env,
            replacer,
            stdin: StdioMode::Inherit,
            grace_period: GRACE_PERIOD,
            state: Mutex::new(RunnerState::Idle),
            active: AtomicBool::new(false),
            running_inputs: Mutex::new(None),
            requests_tx,
            requests_rx: tokio::sync::Mutex::new(requests_rx),
        }
    }

    /// Choose where the child's stdin comes from
    pub fn with_stdin(mut self, stdin: StdioMode) -> Self {
        self.stdin = stdin;
        self
    }

    /// How long a cancelled command may take to exit; defaults to [`GRACE_PERIOD`]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Render the command's inputs as they would be launched now
    pub async fn render_inputs(&self) -> Result<CommandInputs, ExecError> {
        let mut env = Vec::with_capacity(self.env.len());
        for (i, entry) in self.env.iter().enumerate() {
            let replaced = self.replacer.replace(entry).await.map_err(|e| {
                let name = entry.split_once('=').map_or(entry.as_str(), |(k, _)| k);
                ExecError::Render(format!(
                    "failed to replace environment entry {i} ({name}): {e}"
                ))
            })?;
            env.push(replaced);
        }

        let vars = env_map(&env);
        let args = self.args.iter().map(|arg| expand_env(arg, &vars)).collect();

        Ok(CommandInputs {
            name: self.name.clone(),
            args,
            env,
        })
    }

    fn spawn(&self, inputs: &CommandInputs) -> Result<Child, ExecError> {
        let mut command = Command::new(&inputs.name);
        command
            .args(&inputs.args)
            .env_clear()
            .envs(inputs.env.iter().filter_map(|entry| entry.split_once('=')))
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command.stdin(match self.stdin {
            StdioMode::Inherit => Stdio::inherit(),
            StdioMode::Null => Stdio::null(),
        });

        command.spawn().map_err(|source| ExecError::Spawn {
            command: inputs.name.clone(),
            source,
        })
    }

    fn request(&self, request: Request) {
        if !self.active.load(Ordering::SeqCst) {
            debug!(command = %self.name, ?request, "not running, dropping request");
            return;
        }
        if self.requests_tx.try_send(request).is_err() {
            warn!(command = %self.name, ?request, "request mailbox full, dropping request");
        }
    }

    async fn supervise(&self, requests: &mut mpsc::Receiver<Request>) -> Result<(), ExecError> {
        loop {
            let inputs = self.render_inputs().await?;
            if stop_requested(requests) {
                info!(command = %self.name, "stop requested before launch");
                self.set_state(RunnerState::Stopped);
                return Ok(());
            }

            let child = self.spawn(&inputs)?;
            info!(command = %self.name, pid = ?child.id(), "command started");
            let mut watcher = ChildWatcher::spawn(child);
            *lock(&self.running_inputs) = Some(inputs);
            self.set_state(RunnerState::Running);

            let request = tokio::select! {
                biased;
                Some(request) = requests.recv() => request,
                status = watcher.exited() => {
                    let status = status?;
                    info!(command = %self.name, %status, "command exited");
                    return if status.success() {
                        Ok(())
                    } else {
                        Err(ExecError::Exited { status })
                    };
                }
            };

            self.set_state(match request {
                Request::Stop => RunnerState::Stopped,
                Request::Restart => RunnerState::Restarting,
            });
            info!(command = %self.name, ?request, "cancelling command");
            watcher.cancel(self.grace_period).await?;

            if request == Request::Stop || stop_requested(requests) {
                self.set_state(RunnerState::Stopped);
                return Ok(());
            }
        }
    }
}

/// Drain the mailbox, reporting whether it held a stop
fn stop_requested(requests: &mut mpsc::Receiver<Request>) -> bool {
    let mut stop = false;
    while let Ok(request) = requests.try_recv() {
        stop |= request == Request::Stop;
    }
    stop
}

/// Marks a runner active for the lifetime of one `run()`
///
/// Dropped when `run()` returns or when its future is dropped midway; the
/// latter leaves the runner `Failed`.
struct ActiveRun<'a, R> {
    runner: &'a CommandRunner<R>,
    finished: bool,
}

impl<'a, R> ActiveRun<'a, R> {
    fn start(runner: &'a CommandRunner<R>) -> Self {
        runner.active.store(true, Ordering::SeqCst);
        Self {
            runner,
            finished: false,
        }
    }

    fn finish(mut self, state: RunnerState) {
        self.runner.set_state(state);
        self.finished = true;
    }
}

impl<R> Drop for ActiveRun<'_, R> {
    fn drop(&mut self) {
        self.runner.active.store(false, Ordering::SeqCst);
        *lock(&self.runner.running_inputs) = None;
        if !self.finished {
            warn!(command = %self.runner.name, "run abandoned, command killed");
            self.runner.set_state(RunnerState::Failed);
        }
    }
}

/// Owns a child process in its own task and reports how it exited
///
/// Dropping the watcher kills the child.
struct ChildWatcher {
    kill: Option<oneshot::Sender<()>>,
    exit: oneshot::Receiver<std::io::Result<ExitStatus>>,
}

impl ChildWatcher {
    fn spawn(mut child: Child) -> Self {
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                // an explicit kill or a dropped watcher
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        // Already exited; the status is collected below.
                        debug!(error = %e, "failed to signal command");
                    }
                    child.wait().await
                }
            };
            let _ = exit_tx.send(status);
        });

        Self {
            kill: Some(kill_tx),
            exit: exit_rx,
        }
    }

    /// Wait for the child to exit on its own; cancel safe
    async fn exited(&mut self) -> Result<ExitStatus, ExecError> {
        match (&mut self.exit).await {
            Ok(status) => Ok(status?),
            Err(_) => Err(ExecError::Other("child watcher exited early".to_string())),
        }
    }

    /// Kill the child and wait for it, bounded by `grace_period`
    async fn cancel(mut self, grace_period: Duration) -> Result<(), ExecError> {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }

        let status = tokio::time::timeout(grace_period, self.exited())
            .await
            .map_err(|_| ExecError::CancelTimeout(grace_period))??;

        if status.success() || killed(&status) {
            Ok(())
        } else {
            Err(ExecError::CancelledExit { status })
        }
    }
}

#[cfg(unix)]
fn killed(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(9)
}

#[cfg(not(unix))]
fn killed(_status: &ExitStatus) -> bool {
    true
}

#[async_trait]
impl<R: Replacer> Runner for CommandRunner<R> {
    async fn run(&self) -> Result<(), ExecError> {
        let mut requests = self
            .requests_rx
            .try_lock()
            .map_err(|_| ExecError::Other(format!("{} is already running", self.name)))?;
        // left over from a previous run that ended on its own
        while requests.try_recv().is_ok() {}

        let active = ActiveRun::start(self);
        let result = self.supervise(&mut requests).await;
        active.finish(if result.is_ok() {
            RunnerState::Stopped
        } else {
            RunnerState::Failed
        });
        result
    }

    async fn has_configuration_changed(&self) -> Result<bool, ExecError> {
        let running = lock(&self.running_inputs).clone();
        let Some(running) = running else {
            return Ok(false);
        };

        let current = self.render_inputs().await?;
        Ok(running.differs_from(&current))
    }

    fn restart(&self) {
        self.request(Request::Restart);
    }

    fn stop(&self) {
        self.request(Request::Stop);
    }
}

/// Split `KEY=VALUE` entries on the first `=`; entries without one are skipped
pub fn env_map(env: &[String]) -> HashMap<String, String> {
    env.iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Expand `$VAR` and `${VAR}` from `vars`; unknown variables become ""
pub fn expand_env(s: &str, vars: &HashMap<String, String>) -> String {
    ENV_VAR
        .replace_all(s, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            vars.get(name).cloned().unwrap_or_default()
        })
        .into_owned()
}
