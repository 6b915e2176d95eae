//! C6 — Completion Notifier.
//!
//! Emits one event per waiter tag when a fingerprint's resolution
//! completes, successfully or not — the spec leaves "are failures
//! notified too?" as an open question and resolves it in favour of
//! notifying regardless of outcome (see SPEC_FULL.md §9). Delivery is
//! best-effort and non-blocking: a full mailbox rejects the new event
//! silently rather than queuing it. This is a deliberate divergence from
//! the teacher's own `async_broadcast` usage — `kube_runtime`'s reflector
//! `Dispatcher` (`reflector/dispatcher.rs`) calls `broadcast_direct` and
//! backpressures a lagging receiver instead of dropping for it. Spec.md
//! §4.6 requires notification to be non-blocking, so the sender here
//! leaves overflow off and lets a full mailbox reject the newest event
//! instead of blocking the notifier or evicting one a subscriber hasn't
//! read yet.

use std::collections::HashMap;

use async_broadcast::{broadcast, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::{error::ResolveError, types::CacheKey};

/// Capacity of each subscriber's mailbox. Small and fixed: mailboxes exist
/// to nudge a reconciler into re-checking the cache, not to queue up a
/// backlog of historical events.
const MAILBOX_CAPACITY: usize = 32;

/// The outcome half of a [`CompletionEvent`]: just enough to let a waiter
/// decide whether to re-resolve immediately or back off, without leaking
/// the full [`ResolveError`] type into every mailbox consumer.
#[derive(Debug, Clone)]
pub enum OutcomeKind {
    /// The resolution succeeded.
    Success,
    /// The resolution failed with the given error kind's discriminant.
    Failure(ResolveError),
}

/// An event delivered to a subscriber when a fingerprint's resolution
/// completes.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    /// The fingerprint that completed.
    pub key: CacheKey,
    /// What happened.
    pub outcome: OutcomeKind,
}

/// A handle letting a subscriber stop receiving events.
pub struct Unsubscribe {
    tag: String,
    notifier: std::sync::Weak<NotifierInner>,
}

impl Unsubscribe {
    /// Remove this subscription. Idempotent; a no-op if the notifier has
    /// already been dropped or the tag was already removed.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.notifier.upgrade() {
            inner.mailboxes.lock().remove(&self.tag);
        }
    }
}

struct NotifierInner {
    mailboxes: Mutex<HashMap<String, Sender<CompletionEvent>>>,
}

/// Emits [`CompletionEvent`]s to registered observers (reconcilers) keyed
/// by requester tag.
pub struct CompletionNotifier {
    inner: std::sync::Arc<NotifierInner>,
}

impl Default for CompletionNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionNotifier {
    /// Construct a notifier with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(NotifierInner {
                mailboxes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register `tag` for completion events, returning its mailbox and an
    /// unsubscribe handle.
    pub fn subscribe(&self, tag: impl Into<String>) -> (Receiver<CompletionEvent>, Unsubscribe) {
        let tag = tag.into();
        let (sender, receiver) = broadcast(MAILBOX_CAPACITY);
        // Overflow stays off: a full mailbox must reject the new event
        // (`TrySendError::Full`, handled in `notify`) rather than evicting a
        // queued one, so the non-blocking guarantee never comes at the cost
        // of silently rewriting history a subscriber hasn't read yet.
        self.inner.mailboxes.lock().insert(tag.clone(), sender);
        let unsubscribe = Unsubscribe {
            tag,
            notifier: std::sync::Arc::downgrade(&self.inner),
        };
        (receiver, unsubscribe)
    }

    /// Emit one event per waiter in `waiters` for `key`/`outcome`.
    ///
    /// Best-effort: a waiter with no registered mailbox, or whose mailbox
    /// is not being drained fast enough to avoid hitting a send error that
    /// isn't plain lag, is silently skipped — their own reconciliation loop
    /// will eventually re-check the cache.
    #[tracing::instrument(level = "debug", skip(self, outcome), fields(key = %key, waiters = waiters.len()))]
    pub fn notify<'a>(&self, key: CacheKey, waiters: impl IntoIterator<Item = &'a str>, outcome: OutcomeKind) {
        let mailboxes = self.inner.mailboxes.lock();
        for tag in waiters {
            if let Some(sender) = mailboxes.get(tag) {
                let event = CompletionEvent {
                    key,
                    outcome: outcome.clone(),
                };
                match sender.try_broadcast(event) {
                    Ok(_) | Err(TrySendError::Closed(_)) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::debug!(requester = tag, "completion mailbox full, dropping event");
                    }
                    Err(TrySendError::Inactive(_)) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn subscriber_receives_exactly_one_event_for_its_key() {
        let notifier = CompletionNotifier::new();
        let (mut mailbox, _unsub) = notifier.subscribe("ns/r1");
        let key = CacheKey([7u8; 32]);
        notifier.notify(key, ["ns/r1"], OutcomeKind::Success);
        let event = mailbox.next().await.unwrap();
        assert_eq!(event.key, key);
        assert!(matches!(event.outcome, OutcomeKind::Success));
    }

    #[tokio::test]
    async fn notify_with_no_subscriber_does_not_panic() {
        let notifier = CompletionNotifier::new();
        notifier.notify(CacheKey([1u8; 32]), ["nobody/home"], OutcomeKind::Success);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_deliveries() {
        let notifier = CompletionNotifier::new();
        let (mailbox, unsub) = notifier.subscribe("ns/r1");
        unsub.unsubscribe();
        drop(mailbox);
        // Should not panic even though the mailbox is gone.
        notifier.notify(CacheKey([2u8; 32]), ["ns/r1"], OutcomeKind::Success);
    }

    #[tokio::test]
    async fn failure_outcomes_are_notified_too() {
        let notifier = CompletionNotifier::new();
        let (mut mailbox, _unsub) = notifier.subscribe("ns/r1");
        let key = CacheKey([8u8; 32]);
        notifier.notify(key, ["ns/r1"], OutcomeKind::Failure(ResolveError::Overloaded));
        let event = mailbox.next().await.unwrap();
        assert!(matches!(event.outcome, OutcomeKind::Failure(_)));
    }

    #[tokio::test]
    async fn a_full_mailbox_drops_the_new_event_without_evicting_queued_ones() {
        let notifier = CompletionNotifier::new();
        let (mut mailbox, _unsub) = notifier.subscribe("ns/r1");
        // Fill the mailbox to capacity without draining it.
        for _ in 0..MAILBOX_CAPACITY {
            notifier.notify(CacheKey([1u8; 32]), ["ns/r1"], OutcomeKind::Success);
        }
        // One more push finds the mailbox full; with overflow off this is
        // rejected rather than evicting the oldest queued event.
        notifier.notify(CacheKey([2u8; 32]), ["ns/r1"], OutcomeKind::Success);

        let first = mailbox.next().await.unwrap();
        assert_eq!(first.key, CacheKey([1u8; 32]), "the oldest queued event must survive a full mailbox");
    }
}
