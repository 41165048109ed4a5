use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::poller::{Poller, SegmentReady};
use crate::profile::Profile;
use crate::relay;
use crate::supervisor::{RestartPolicy, Supervisor};

/// Announced-but-undelivered segments tolerated before discovery stalls.
/// Matches the transcoder's own playlist window, so a slow client backs up
/// into disk (until ffmpeg evicts), never into memory.
const READY_QUEUE_DEPTH: usize = 6;
const BODY_QUEUE_DEPTH: usize = 2;

/// Shared settings for every stream session.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub work_dir: PathBuf,
    pub ffmpeg: PathBuf,
    pub poll_interval: Duration,
    pub restart_policy: RestartPolicy,
}

impl StreamConfig {
    pub fn new(work_dir: PathBuf, ffmpeg: PathBuf) -> Self {
        Self {
            work_dir,
            ffmpeg,
            poll_interval: Duration::from_secs(1),
            restart_policy: RestartPolicy::default(),
        }
    }
}

/// A running relay session, handed back to the HTTP layer.
pub struct SessionHandle {
    pub body: Body,
    pub token: CancellationToken,
    pub restarts: Arc<AtomicU32>,
}

/// Wires one client connection to a supervised transcoder.
///
/// Three tasks per session: a detached supervisor keeping ffmpeg alive, a
/// poller announcing manifest entries over a bounded queue, and a relay
/// streaming segment bytes into the response body. Supervisor and poller
/// still meet only on the filesystem. Dropping the returned body (client
/// disconnect) cancels the token, which every task observes at its stated
/// checkpoint: the supervisor after each subprocess exit, the poller once per
/// cycle, the relay per wakeup.
pub fn start(config: &StreamConfig, id: &str, input_url: &str, profile: Profile) -> SessionHandle {
    let token = CancellationToken::new();
    let command = profile.command(&config.ffmpeg, input_url, &config.work_dir, id);

    let supervisor = Supervisor::new(
        command,
        config.work_dir.clone(),
        id.to_string(),
        config.restart_policy,
    );
    let restarts = supervisor.restart_counter();
    tokio::spawn(supervisor.run(token.clone()));

    let (ready_tx, ready_rx) = mpsc::channel::<SegmentReady>(READY_QUEUE_DEPTH);
    let poller = Poller::new(&config.work_dir, id, config.poll_interval);
    tokio::spawn(poller.run(ready_tx, token.clone()));

    let (body_tx, body_rx) = mpsc::channel::<Bytes>(BODY_QUEUE_DEPTH);
    tokio::spawn(relay::run(
        config.work_dir.clone(),
        id.to_string(),
        ready_rx,
        body_tx,
        token.clone(),
    ));

    let stream = ReceiverStream::new(body_rx).map(Ok::<_, std::convert::Infallible>);
    SessionHandle {
        body: Body::from_stream(stream),
        token,
        restarts,
    }
}
