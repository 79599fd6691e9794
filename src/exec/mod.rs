//! Process Execution
//!
//! Runs a [`Runner`] to completion while, optionally, re-evaluating its
//! configuration on a fixed interval and stopping or restarting it when the
//! configuration drifts.
//!
//! # Architecture
//!
//! ```text
//! exec()
//!   ├── runner.run()                     (until the runner finishes)
//!   └── poller                           (only with a stop/restart policy)
//!         sleep(interval)
//!         has_configuration_changed()?
//!           ├── Err   → reported, exec() returns it
//!           ├── false → keep polling
//!           └── true  → stop() and quit polling, or restart()
//! ```
//!
//! The poller never outlives `exec()`.

pub mod runner;

pub use runner::{CommandInputs, CommandRunner, Replacer, RunnerState, GRACE_PERIOD};

use crate::error::ExecError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Something that runs and can be stopped or restarted while running
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run until finished; the runner substitutes any dynamic inputs itself
    async fn run(&self) -> Result<(), ExecError>;

    /// Re-evaluate dynamic inputs and compare them with the ones in use
    ///
    /// Returns `false` when not running.
    async fn has_configuration_changed(&self) -> Result<bool, ExecError>;

    /// Ask a running runner to restart; must not block
    fn restart(&self);

    /// Ask a running runner to stop; must not block
    fn stop(&self);
}

/// What to do when a runner's configuration changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnEnvChange {
    #[default]
    DoNothing,
    Stop,
    Restart,
}

/// How [`exec`] supervises a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecConfig {
    pub on_env_change: OnEnvChange,

    /// How often to re-evaluate; zero disables re-evaluation
    pub reevaluation_interval: Duration,
}

impl ExecConfig {
    /// Re-check the configuration every `interval`, restarting on change
    pub fn restart_if_env_changes(interval: Duration) -> Self {
        Self {
            on_env_change: OnEnvChange::Restart,
            reevaluation_interval: interval,
        }
    }

    /// Re-check the configuration every `interval`, stopping on change
    pub fn stop_if_env_changes(interval: Duration) -> Self {
        Self {
            on_env_change: OnEnvChange::Stop,
            reevaluation_interval: interval,
        }
    }

    fn reevaluates(&self) -> bool {
        !self.reevaluation_interval.is_zero() && self.on_env_change != OnEnvChange::DoNothing
    }
}

/// Run `runner`, applying the re-evaluation policy in `config`
///
/// Returns when the runner finishes, with its result, or as soon as
/// re-evaluating its configuration fails. In the latter case the in-flight
/// `run()` is dropped.
pub async fn exec<R>(runner: Arc<R>, config: ExecConfig) -> Result<(), ExecError>
where
    R: Runner + 'static,
{
    let (err_tx, mut err_rx) = mpsc::channel(1);

    let poller = if config.reevaluates() {
        debug!(
            policy = ?config.on_env_change,
            interval = ?config.reevaluation_interval,
            "watching for configuration changes"
        );
        Some(tokio::spawn(watch_configuration(
            Arc::clone(&runner),
            config,
            err_tx,
        )))
    } else {
        drop(err_tx);
        None
    };

    // A closed error channel disables its branch, leaving run() to finish.
    let result = tokio::select! {
        result = runner.run() => result,
        Some(err) = err_rx.recv() => Err(err),
    };

    if let Some(poller) = poller {
        poller.abort();
    }
    result
}

async fn watch_configuration<R: Runner>(
    runner: Arc<R>,
    config: ExecConfig,
    errors: mpsc::Sender<ExecError>,
) {
    loop {
        tokio::time::sleep(config.reevaluation_interval).await;

        let changed = match runner.has_configuration_changed().await {
            Ok(changed) => changed,
            Err(e) => {
                let _ = errors.send(ExecError::Reevaluation(e.to_string())).await;
                return;
            }
        };
        if !changed {
            continue;
        }

        match config.on_env_change {
            OnEnvChange::Stop => {
                info!("configuration changed, stopping");
                runner.stop();
                return;
            }
            OnEnvChange::Restart => {
                info!("configuration changed, restarting");
                runner.restart();
            }
            OnEnvChange::DoNothing => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// What the fake's run() does
    enum Behavior {
        Finish,
        Fail(&'static str),
        /// Wait for a stop, failing after the timeout
        UntilStopped,
        /// Finish after this many restarts, failing after the timeout
        UntilRestarted(usize),
    }

    struct FakeRunner {
        behavior: Behavior,
        changed: Result<bool, &'static str>,
        run_calls: AtomicUsize,
        stop_calls: AtomicUsize,
        restart_calls: AtomicUsize,
        check_calls: AtomicUsize,
        stop_signal: Notify,
        restart_signal: Notify,
    }

    impl FakeRunner {
        fn new(behavior: Behavior, changed: Result<bool, &'static str>) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                changed,
                run_calls: AtomicUsize::new(0),
                stop_calls: AtomicUsize::new(0),
                restart_calls: AtomicUsize::new(0),
                check_calls: AtomicUsize::new(0),
                stop_signal: Notify::new(),
                restart_signal: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl Runner for FakeRunner {
        async fn run(&self) -> Result<(), ExecError> {
            self.run_calls.fetch_add(1, Ordering::SeqCst);
            let timeout = tokio::time::sleep(Duration::from_secs(10));
            tokio::pin!(timeout);

            match self.behavior {
                Behavior::Finish => Ok(()),
                Behavior::Fail(msg) => Err(ExecError::Other(msg.to_string())),
                Behavior::UntilStopped => tokio::select! {
                    _ = &mut timeout => Err(ExecError::Other("timeout".to_string())),
                    _ = self.stop_signal.notified() => Ok(()),
                },
                Behavior::UntilRestarted(n) => {
                    for _ in 0..n {
                        tokio::select! {
                            _ = &mut timeout => return Err(ExecError::Other("timeout".to_string())),
                            _ = self.restart_signal.notified() => {}
                        }
                    }
                    Ok(())
                }
            }
        }

        async fn has_configuration_changed(&self) -> Result<bool, ExecError> {
            self.check_calls.fetch_add(1, Ordering::SeqCst);
            self.changed
                .map_err(|msg| ExecError::Render(msg.to_string()))
        }

        fn restart(&self) {
            self.restart_calls.fetch_add(1, Ordering::SeqCst);
            self.restart_signal.notify_one();
        }

        fn stop(&self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.stop_signal.notify_one();
        }
    }

    #[tokio::test]
    async fn test_exec_runs_until_finished() {
        let runner = FakeRunner::new(Behavior::Finish, Ok(true));
        exec(runner.clone(), ExecConfig::default()).await.unwrap();
        assert_eq!(runner.run_calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.check_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exec_returns_run_error() {
        let runner = FakeRunner::new(Behavior::Fail("all is lost"), Ok(false));
        let err = exec(runner, ExecConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("all is lost"));
    }

    #[tokio::test]
    async fn test_exec_stops_on_change() {
        let runner = FakeRunner::new(Behavior::UntilStopped, Ok(true));
        exec(
            runner.clone(),
            ExecConfig::stop_if_env_changes(Duration::from_millis(100)),
        )
        .await
        .unwrap();
        assert_eq!(runner.run_calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.restart_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exec_restarts_on_change() {
        let runner = FakeRunner::new(Behavior::UntilRestarted(5), Ok(true));
        exec(
            runner.clone(),
            ExecConfig::restart_if_env_changes(Duration::from_millis(100)),
        )
        .await
        .unwrap();
        assert_eq!(runner.run_calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.restart_calls.load(Ordering::SeqCst), 5);
        assert_eq!(runner.stop_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exec_ignores_unchanged_configuration() {
        let runner = FakeRunner::new(Behavior::UntilStopped, Ok(false));
        let result = tokio::time::timeout(
            Duration::from_millis(350),
            exec(
                runner.clone(),
                ExecConfig::stop_if_env_changes(Duration::from_millis(50)),
            ),
        )
        .await;
        assert!(result.is_err(), "exec should still be running");
        assert!(runner.check_calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(runner.stop_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exec_surfaces_reevaluation_error() {
        let runner = FakeRunner::new(Behavior::UntilStopped, Err("vault unreachable"));
        let err = exec(
            runner.clone(),
            ExecConfig::restart_if_env_changes(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecError::Reevaluation(_)));
        assert!(err.to_string().contains("vault unreachable"));
        assert_eq!(runner.restart_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exec_without_interval_never_polls() {
        let config = ExecConfig {
            on_env_change: OnEnvChange::Restart,
            reevaluation_interval: Duration::ZERO,
        };
        let runner = FakeRunner::new(Behavior::Finish, Ok(true));
        exec(runner.clone(), config).await.unwrap();
        assert_eq!(runner.check_calls.load(Ordering::SeqCst), 0);
    }
}
