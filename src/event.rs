//! Status change notifications.
//!
//! Every state transition is published to all subscribers through a channel.
//! A subscriber first receives the status current at subscription time, then
//! each later transition in the order the state machine applied them.
//!
//! Each feed buffers at most [`STATUS_FEED_CAPACITY`] updates. Transitions
//! published while a feed is full are dropped for that feed only.

use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use parking_lot::Mutex;

use crate::constants::STATUS_FEED_CAPACITY;
use crate::state::Status;

/// Receiving end of a status subscription.
#[derive(Debug)]
pub struct StatusFeed {
    receiver: mpsc::Receiver<Status>,
}

impl StatusFeed {
    /// Blocks until the next status is available.
    ///
    /// Returns `None` once the publisher is gone.
    pub fn next(&self) -> Option<Status> {
        self.receiver.recv().ok()
    }

    /// Waits up to `timeout` for the next status.
    pub fn next_timeout(&self, timeout: Duration) -> Option<Status> {
        match self.receiver.recv_timeout(timeout) {
            Ok(status) => Some(status),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Returns every status already queued, without blocking.
    pub fn drain(&self) -> Vec<Status> {
        self.receiver.try_iter().collect()
    }
}

/// Publisher side, owned by the state machine.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    senders: Mutex<Vec<SyncSender<Status>>>,
}

impl Subscribers {
    /// Registers a subscriber and queues `current` as its first item.
    pub(crate) fn subscribe(&self, current: &Status) -> StatusFeed {
        let (sender, receiver) = mpsc::sync_channel(STATUS_FEED_CAPACITY);
        // Cannot fail: the receiver is alive and the queue is empty.
        let _ = sender.try_send(current.clone());
        self.senders.lock().push(sender);
        StatusFeed { receiver }
    }

    /// Sends `status` to every live subscriber, dropping closed ones.
    ///
    /// Never blocks: a full feed misses this update but stays subscribed.
    pub(crate) fn publish(&self, status: &Status) {
        self.senders
            .lock()
            .retain(|sender| match sender.try_send(status.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(state = %status.kind(), "status feed full, update dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.senders.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_gets_current_then_updates() {
        let subs = Subscribers::default();
        let feed = subs.subscribe(&Status::Disconnected);
        subs.publish(&Status::Connecting {
            server_addr: "vpn.example:443".into(),
        });

        assert_eq!(feed.next(), Some(Status::Disconnected));
        assert_eq!(
            feed.next_timeout(Duration::from_secs(1)).map(|s| s.kind()),
            Some(crate::state::StateKind::Connecting)
        );
        assert!(feed.drain().is_empty());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let subs = Subscribers::default();
        let keep = subs.subscribe(&Status::Disconnected);
        drop(subs.subscribe(&Status::Disconnected));
        assert_eq!(subs.len(), 2);

        subs.publish(&Status::Disconnected);
        assert_eq!(subs.len(), 1);
        assert_eq!(keep.drain().len(), 2);
    }

    #[test]
    fn test_undrained_feed_is_bounded() {
        let subs = Subscribers::default();
        let feed = subs.subscribe(&Status::Disconnected);

        for _ in 0..STATUS_FEED_CAPACITY * 4 {
            subs.publish(&Status::Error {
                message: "x".into(),
            });
        }
        assert_eq!(subs.len(), 1);

        let queued = feed.drain();
        assert_eq!(queued.len(), STATUS_FEED_CAPACITY);
        assert_eq!(queued[0], Status::Disconnected);

        subs.publish(&Status::Disconnected);
        assert_eq!(feed.drain(), vec![Status::Disconnected]);
    }
}
