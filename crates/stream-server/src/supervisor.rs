use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cleanup;
use crate::profile::TranscodeCommand;

/// What to do when the transcoder exits while the client is still connected.
#[derive(Debug, Clone, Copy, Default)]
pub enum RestartPolicy {
    /// Relaunch immediately, forever. Upstream hiccups are expected to be
    /// transient and the stream staying available wins over a tight loop.
    #[default]
    Immediate,
    /// Exponential delay between relaunches, capped at `max`.
    Backoff { initial: Duration, max: Duration },
    /// Give up after `max_restarts` relaunches.
    CircuitBreaker { max_restarts: u32 },
}

impl RestartPolicy {
    /// Returns false when the policy refuses another launch. The backoff
    /// variant sleeps here; cancellation during the sleep also stops the loop.
    async fn allow_restart(&self, restarts: u32, token: &CancellationToken) -> bool {
        match self {
            RestartPolicy::Immediate => true,
            RestartPolicy::Backoff { initial, max } => {
                let exp = restarts.saturating_sub(1).min(16);
                let delay = initial.saturating_mul(2u32.saturating_pow(exp)).min(*max);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = token.cancelled() => false,
                }
            }
            RestartPolicy::CircuitBreaker { max_restarts } => restarts <= *max_restarts,
        }
    }
}

/// Keeps one transcoder process alive for the lifetime of a client
/// connection, communicating with the relay side only through the files the
/// process writes.
pub struct Supervisor {
    command: TranscodeCommand,
    work_dir: PathBuf,
    id: String,
    policy: RestartPolicy,
    restarts: Arc<AtomicU32>,
}

impl Supervisor {
    pub fn new(
        command: TranscodeCommand,
        work_dir: PathBuf,
        id: String,
        policy: RestartPolicy,
    ) -> Self {
        Self {
            command,
            work_dir,
            id,
            policy,
            restarts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Relaunch count so far. Grows by one per non-cancelled exit.
    pub fn restart_counter(&self) -> Arc<AtomicU32> {
        self.restarts.clone()
    }

    /// Runs until `token` is cancelled or a launch fails.
    ///
    /// Stale artifacts for the session id are swept before the first launch
    /// and after the last exit. A spawn failure is terminal without retry:
    /// relaunching cannot help when the binary itself is missing. Whatever
    /// ends the loop also cancels `token`, so the poller and relay wind down
    /// with it.
    pub async fn run(self, token: CancellationToken) -> anyhow::Result<()> {
        if let Err(err) = cleanup::remove_session_files(&self.work_dir, &self.id) {
            warn!("[{}] pre-run cleanup failed: {err:#}", self.id);
        }

        loop {
            let mut child = match self.spawn_child() {
                Ok(child) => child,
                Err(err) => {
                    error!("[{}] transcoder failed to start: {err:#}", self.id);
                    self.finish(&token);
                    return Err(err);
                }
            };

            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => warn!("[{}] transcoder exited: {status}", self.id),
                    Err(err) => warn!("[{}] transcoder wait failed: {err}", self.id),
                },
                _ = token.cancelled() => {
                    let _ = child.kill().await;
                }
            }

            if token.is_cancelled() {
                info!("[{}] client disconnected, transcoder stopped", self.id);
                self.finish(&token);
                return Ok(());
            }

            let restarts = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.policy.allow_restart(restarts, &token).await {
                warn!(
                    "[{}] restart policy ended the session after {restarts} relaunches",
                    self.id
                );
                self.finish(&token);
                return Ok(());
            }
            info!("[{}] restarting transcoder (relaunch {restarts})", self.id);
        }
    }

    fn spawn_child(&self) -> anyhow::Result<Child> {
        // Transcoder output is not surfaced to the client; supervisor-level
        // logging is the only visibility.
        Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                anyhow!(
                    "failed to launch {}: {err}",
                    self.command.program.display()
                )
            })
    }

    fn finish(&self, token: &CancellationToken) {
        if let Err(err) = cleanup::remove_session_files(&self.work_dir, &self.id) {
            warn!("[{}] post-run cleanup failed: {err:#}", self.id);
        }
        token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicU64;

    use super::*;

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn test_work_dir(name: &str) -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("tvbridge-supervisor-{name}-{id}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create test dir");
        dir
    }

    fn shell_command(script: &str) -> TranscodeCommand {
        TranscodeCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[tokio::test]
    async fn relaunches_while_client_connected() {
        let dir = test_work_dir("relaunch");
        let supervisor = Supervisor::new(
            shell_command("sleep 0.01"),
            dir,
            "s".to_string(),
            RestartPolicy::Immediate,
        );
        let restarts = supervisor.restart_counter();
        let token = CancellationToken::new();
        let handle = tokio::spawn(supervisor.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(restarts.load(Ordering::SeqCst) >= 2);

        token.cancel();
        handle.await.expect("join").expect("supervisor result");
    }

    #[tokio::test]
    async fn no_relaunch_after_cancel() {
        let dir = test_work_dir("cancel");
        let supervisor = Supervisor::new(
            shell_command("sleep 0.01"),
            dir,
            "s".to_string(),
            RestartPolicy::Immediate,
        );
        let restarts = supervisor.restart_counter();
        let token = CancellationToken::new();
        let handle = tokio::spawn(supervisor.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        handle.await.expect("join").expect("supervisor result");

        let frozen = restarts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(restarts.load(Ordering::SeqCst), frozen);
    }

    #[tokio::test]
    async fn launch_failure_is_terminal() {
        let dir = test_work_dir("launch-failure");
        let supervisor = Supervisor::new(
            TranscodeCommand {
                program: PathBuf::from("/nonexistent/tvbridge-ffmpeg"),
                args: Vec::new(),
            },
            dir,
            "s".to_string(),
            RestartPolicy::Immediate,
        );
        let token = CancellationToken::new();

        let result = supervisor.run(token.clone()).await;

        assert!(result.is_err());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn circuit_breaker_stops_the_loop() {
        let dir = test_work_dir("breaker");
        let supervisor = Supervisor::new(
            shell_command(":"),
            dir,
            "s".to_string(),
            RestartPolicy::CircuitBreaker { max_restarts: 2 },
        );
        let restarts = supervisor.restart_counter();
        let token = CancellationToken::new();

        supervisor.run(token.clone()).await.expect("supervisor result");

        // two allowed relaunches plus the refused third
        assert_eq!(restarts.load(Ordering::SeqCst), 3);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn sweeps_stale_artifacts_on_start() {
        let dir = test_work_dir("stale");
        fs::write(dir.join("s-0.ts"), b"stale").expect("write stale segment");
        fs::write(dir.join("s.m3u8"), b"stale").expect("write stale manifest");

        let supervisor = Supervisor::new(
            shell_command("sleep 0.5"),
            dir.clone(),
            "s".to_string(),
            RestartPolicy::Immediate,
        );
        let token = CancellationToken::new();
        let handle = tokio::spawn(supervisor.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!Path::new(&dir.join("s-0.ts")).exists());
        assert!(!Path::new(&dir.join("s.m3u8")).exists());

        token.cancel();
        handle.await.expect("join").expect("supervisor result");
    }
}
