use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::poller::SegmentReady;

/// Streams announced segments to the client, whole file at a time, deleting
/// each one after it has been handed off to the body channel.
///
/// A segment is sent whole or skipped, never partially. When the relay stops,
/// for any reason, it cancels the session token so the poller and supervisor
/// wind down with it; client disconnect surfaces here as the body channel
/// closing.
pub async fn run(
    work_dir: PathBuf,
    id: String,
    mut ready: mpsc::Receiver<SegmentReady>,
    body: mpsc::Sender<Bytes>,
    token: CancellationToken,
) {
    loop {
        let segment = tokio::select! {
            segment = ready.recv() => match segment {
                Some(segment) => segment,
                None => break,
            },
            _ = body.closed() => {
                debug!("[{id}] client disconnected");
                break;
            }
            _ = token.cancelled() => break,
        };

        let path = work_dir.join(&segment.uri);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // The transcoder's window evicted it before we got there.
                debug!("[{id}] segment {} already gone, skipping", segment.uri);
                continue;
            }
            Err(err) => {
                warn!("[{id}] failed to read segment {}: {err}", segment.uri);
                continue;
            }
        };

        if body.send(bytes).await.is_err() {
            debug!("[{id}] client disconnected mid-stream");
            break;
        }

        if let Err(err) = tokio::fs::remove_file(&path).await {
            // Non-fatal: session cleanup sweeps it instead, and the poller's
            // cursor guarantees it is never announced again.
            warn!("[{id}] failed to delete consumed segment {}: {err}", segment.uri);
        }
    }

    token.cancel();
}
