//! Frame monitor
//!
//! A background task that watches the host's frame sequence number and
//! publishes a copied [`FrameSnapshot`] each time it changes. Consumers
//! subscribe with [`FrameMonitor::frames`] and pick their own rate.
//!
//! The sequence number is read without the link lock on every tick. Only
//! when it moves is the connection asked for a full snapshot, on the
//! blocking pool, because that read may wait on the lock.

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backend::LinkBackend;
use crate::stream::ThrottleExt;
use crate::telemetry::FrameSnapshot;
use crate::types::sequence_after;
use crate::{Connection, LinkConfig, Result};

type SharedConnection<B> = Arc<Mutex<Connection<B>>>;
type FrameSlot = Option<Arc<FrameSnapshot>>;

/// How often a [`FrameMonitor::frames`] stream yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum UpdateRate {
    /// Every frame the monitor publishes.
    Native,
    /// At most this many frames per second; `Max(0)` behaves as `Max(1)`.
    Max(u32),
}

impl UpdateRate {
    /// Spacing between items, or `None` when polling is already slow enough.
    fn throttle_interval(self, poll_hz: f64) -> Option<Duration> {
        match self {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) if f64::from(hz) >= poll_hz => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / f64::from(hz.max(1)))),
        }
    }
}

/// Handle on a running frame monitor. Dropping it stops the task.
pub struct FrameMonitor {
    frames: watch::Receiver<FrameSlot>,
    poll_hz: f64,
    cancel: CancellationToken,
}

impl FrameMonitor {
    /// Start polling `shared` every `config.poll_interval_ms`.
    ///
    /// Must be called inside a tokio runtime. The link may be inactive; the
    /// task keeps polling and publishes once frames appear.
    ///
    /// # Errors
    ///
    /// [`crate::LinkError::Config`] if `config` does not validate; no task
    /// is started.
    pub fn spawn<B>(shared: SharedConnection<B>, config: &LinkConfig) -> Result<Self>
    where
        B: LinkBackend + Send + 'static,
    {
        config.validate()?;
        let poll_interval = config.poll_interval();
        let (frame_tx, frame_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let cancel_task = cancel.clone();
        tokio::spawn(async move {
            Self::poll_task(shared, frame_tx, cancel_task, poll_interval).await;
        });

        Ok(Self { frames: frame_rx, poll_hz: 1.0 / poll_interval.as_secs_f64(), cancel })
    }

    async fn poll_task<B>(
        shared: SharedConnection<B>,
        frame_tx: watch::Sender<FrameSlot>,
        cancel: CancellationToken,
        poll_interval: Duration,
    ) where
        B: LinkBackend + Send + 'static,
    {
        info!(interval = ?poll_interval, "Frame monitor started");
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seq: Option<u16> = None;
        let mut published = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Frame monitor cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let seq = match current_sequence(&shared) {
                Ok(Some(seq)) => seq,
                Ok(None) => {
                    last_seq = None;
                    continue;
                }
                Err(()) => break,
            };

            match last_seq {
                Some(last) if last == seq => continue,
                Some(last) if !sequence_after(seq, last) => {
                    debug!(last, seq, "Frame sequence moved backwards; host restarted?");
                }
                _ => {}
            }
            last_seq = Some(seq);

            let link = Arc::clone(&shared);
            let capture = tokio::task::spawn_blocking(move || {
                let snapshot = match link.lock() {
                    Ok(link) => link.frame_snapshot(),
                    Err(_) => None,
                };
                snapshot
            });
            let snapshot = match capture.await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!(error = %e, "Frame capture task failed");
                    break;
                }
            };

            let Some(snapshot) = snapshot else {
                trace!(seq, "Sequence moved but no frame is published");
                continue;
            };
            published += 1;
            trace!(seq, width = snapshot.info.width, height = snapshot.info.height, "Frame published");
            if frame_tx.send(Some(Arc::new(snapshot))).is_err() {
                debug!("All frame receivers dropped");
                break;
            }
        }

        let _ = frame_tx.send(None);
        info!(published, "Frame monitor stopped");
    }

    /// Snapshots as they are published, throttled to `rate`.
    ///
    /// The stream waits for the first frame and ends when the monitor stops.
    pub fn frames(&self, rate: UpdateRate) -> impl Stream<Item = Arc<FrameSnapshot>> + 'static {
        let frames = WatchStream::new(self.frames.clone())
            .skip_while(|slot| {
                let is_none = slot.is_none();
                async move { is_none }
            })
            .take_while(|slot| {
                let is_some = slot.is_some();
                async move { is_some }
            })
            .filter_map(|slot| async move { slot });

        match rate.throttle_interval(self.poll_hz) {
            None => frames.boxed(),
            Some(interval) => frames.throttle(interval).boxed(),
        }
    }

    /// The most recently published snapshot.
    pub fn latest(&self) -> Option<Arc<FrameSnapshot>> {
        self.frames.borrow().clone()
    }

    /// Polls per second.
    pub fn poll_hz(&self) -> f64 {
        self.poll_hz
    }

    /// Stop the task. Open streams end after their pending item.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FrameMonitor {
    fn drop(&mut self) {
        debug!("Dropping frame monitor");
        self.cancel.cancel();
    }
}

/// Sequence number of an active link, `None` while inactive.
fn current_sequence<B: LinkBackend>(shared: &Mutex<Connection<B>>) -> Result<Option<u16>, ()> {
    match shared.lock() {
        Ok(link) if link.is_active() => Ok(Some(link.frame_sequence())),
        Ok(_) => Ok(None),
        Err(_) => {
            warn!("Connection mutex poisoned; stopping frame monitor");
            Err(())
        }
    }
}
