use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use hls_m3u8::MediaPlaylist;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::profile::manifest_path;

/// A segment the transcoder has finished writing, announced in playlist
/// order with its absolute media-sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentReady {
    pub sequence: u64,
    pub uri: String,
}

/// Watches a session's manifest and announces each newly-listed segment
/// exactly once over a bounded channel.
///
/// The manifest is a sliding window owned by the transcoder, so every read
/// is a snapshot, not a diff; the `next_sequence` cursor is what prevents a
/// still-listed segment from being announced twice across cycles. A relaunch
/// of the transcoder restarts the window at media sequence 0, so a snapshot
/// that ends behind the cursor rewinds it to the new numbering.
pub struct Poller {
    manifest: PathBuf,
    interval: Duration,
    next_sequence: u64,
}

impl Poller {
    pub fn new(work_dir: &Path, id: &str, interval: Duration) -> Self {
        Self {
            manifest: manifest_path(work_dir, id),
            interval,
            next_sequence: 0,
        }
    }

    /// Polls until the session is cancelled or the relay goes away. A slow
    /// consumer fills `ready` and stalls discovery here, never the
    /// transcoder; segments it evicts in the meantime are simply skipped by
    /// the relay.
    pub async fn run(mut self, ready: mpsc::Sender<SegmentReady>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = token.cancelled() => return,
            }

            let raw = match tokio::fs::read_to_string(&self.manifest).await {
                Ok(raw) => raw,
                // Not there yet: the transcoder has produced no output so far.
                Err(_) => continue,
            };

            let segments = match parse_segments(&raw) {
                Ok(segments) => segments,
                Err(err) => {
                    // Most likely a read that raced a rewrite; the next
                    // cycle sees a complete manifest.
                    warn!("skipping manifest {}: {err:#}", self.manifest.display());
                    continue;
                }
            };

            // An up-to-date or unchanged window ends at `next_sequence - 1`
            // or beyond; one that ends earlier can only be a relaunched
            // transcoder numbering from scratch. Skipping it would stall the
            // stream for good.
            if let (Some(first), Some(last)) = (segments.first(), segments.last()) {
                if last.sequence + 1 < self.next_sequence {
                    warn!(
                        "manifest numbering restarted at {} (cursor was {}), following the new window",
                        first.sequence, self.next_sequence
                    );
                    self.next_sequence = first.sequence;
                }
            }

            for segment in segments {
                if segment.sequence < self.next_sequence {
                    continue;
                }
                self.next_sequence = segment.sequence + 1;

                tokio::select! {
                    sent = ready.send(segment) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                    _ = token.cancelled() => return,
                }
            }
        }
    }
}

/// Parses one media-playlist snapshot into ordered segment references. Any
/// other playlist type, or a half-written file, comes back as an error the
/// caller treats as "nothing this cycle".
pub fn parse_segments(input: &str) -> anyhow::Result<Vec<SegmentReady>> {
    let playlist =
        MediaPlaylist::try_from(input).map_err(|err| anyhow!("manifest parse error: {err}"))?;
    let first = playlist.media_sequence as u64;

    Ok(playlist
        .segments
        .iter()
        .enumerate()
        .map(|(offset, (_key, segment))| SegmentReady {
            sequence: first + offset as u64,
            uri: segment.uri().to_string(),
        })
        .collect())
}
