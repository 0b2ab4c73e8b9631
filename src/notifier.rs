//! Throttled, de-duplicated progress notifications
//!
//! [`ProgressNotifier`] keeps one status message per job on the external
//! notification channel: the first update creates it (or adopts an existing
//! message id from the job), later updates edit it in place. Unforced
//! updates are suppressed while the text is unchanged or the throttle window
//! has not elapsed, so a fast download cannot flood the channel; terminal
//! states pass `force = true` and always go out.
//!
//! Channel failures are swallowed and logged — the pipeline's correctness
//! never depends on a status message being delivered.

use crate::error::DeliveryError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Send/edit/delete messages on the external notification channel
///
/// Implemented by the messaging collaborator; tests inject in-memory fakes.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Create a message for `target_id`, returning its channel-assigned id
    async fn send_message(&self, target_id: i64, text: &str) -> Result<i64, DeliveryError>;

    /// Replace the text of an existing message
    async fn edit_message(
        &self,
        target_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), DeliveryError>;

    /// Remove a message
    async fn delete_message(&self, target_id: i64, message_id: i64) -> Result<(), DeliveryError>;
}

struct NotifierState {
    message_id: Option<i64>,
    last_text: String,
    last_update: Option<Instant>,
    closed: bool,
}

/// One job's throttled status message
pub struct ProgressNotifier {
    channel: Arc<dyn NotificationChannel>,
    target_id: i64,
    throttle: Duration,
    state: tokio::sync::Mutex<NotifierState>,
}

impl ProgressNotifier {
    /// Create a notifier for `target_id`
    ///
    /// When `message_id` is given, updates edit that existing message
    /// instead of creating a new one.
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        target_id: i64,
        message_id: Option<i64>,
        throttle: Duration,
    ) -> Self {
        Self {
            channel,
            target_id,
            throttle,
            state: tokio::sync::Mutex::new(NotifierState {
                message_id,
                last_text: String::new(),
                last_update: None,
                closed: false,
            }),
        }
    }

    /// Send or edit the status message, best-effort
    ///
    /// Suppressed when `!force` and either the text is unchanged since the
    /// last delivered update or the throttle window has not elapsed.
    pub async fn update(&self, text: &str, force: bool) {
        let mut state = self.state.lock().await;

        // A deleted message stays deleted; late fire-and-forget emissions
        // must not resurrect it
        if state.closed {
            return;
        }
        if !force && state.last_text == text {
            return;
        }
        if !force
            && let Some(at) = state.last_update
            && at.elapsed() < self.throttle
        {
            return;
        }

        let result = match state.message_id {
            None => match self.channel.send_message(self.target_id, text).await {
                Ok(id) => {
                    state.message_id = Some(id);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Some(id) => self.channel.edit_message(self.target_id, id, text).await,
        };

        match result {
            Ok(()) => {
                state.last_text = text.to_string();
                state.last_update = Some(Instant::now());
            }
            Err(e) => {
                tracing::debug!(target_id = self.target_id, error = %e, "Status update failed");
            }
        }
    }

    /// Delete the status message and stop accepting further updates
    pub async fn delete(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        if let Some(id) = state.message_id.take() {
            if let Err(e) = self.channel.delete_message(self.target_id, id).await {
                tracing::debug!(target_id = self.target_id, error = %e, "Status delete failed");
            }
        }
    }

    /// Channel id of the status message, once one exists
    pub async fn message_id(&self) -> Option<i64> {
        self.state.lock().await.message_id
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingChannel {
        sends: Mutex<Vec<String>>,
        edits: Mutex<Vec<(i64, String)>>,
        deletes: AtomicU32,
        failing: AtomicBool,
    }

    impl RecordingChannel {
        fn outbound_calls(&self) -> usize {
            self.sends.lock().unwrap().len() + self.edits.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send_message(&self, _target_id: i64, text: &str) -> Result<i64, DeliveryError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DeliveryError::Transport("offline".to_string()));
            }
            let mut sends = self.sends.lock().unwrap();
            sends.push(text.to_string());
            Ok(sends.len() as i64)
        }

        async fn edit_message(
            &self,
            _target_id: i64,
            message_id: i64,
            text: &str,
        ) -> Result<(), DeliveryError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DeliveryError::Transport("offline".to_string()));
            }
            self.edits.lock().unwrap().push((message_id, text.to_string()));
            Ok(())
        }

        async fn delete_message(
            &self,
            _target_id: i64,
            _message_id: i64,
        ) -> Result<(), DeliveryError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn notifier(
        channel: &Arc<RecordingChannel>,
        message_id: Option<i64>,
        throttle_ms: u64,
    ) -> ProgressNotifier {
        ProgressNotifier::new(
            channel.clone(),
            42,
            message_id,
            Duration::from_millis(throttle_ms),
        )
    }

    #[tokio::test]
    async fn first_update_creates_then_edits_in_place() {
        let channel = Arc::new(RecordingChannel::default());
        let n = notifier(&channel, None, 0);

        n.update("resolving", true).await;
        n.update("downloading", true).await;

        assert_eq!(channel.sends.lock().unwrap().as_slice(), ["resolving"]);
        let edits = channel.edits.lock().unwrap();
        assert_eq!(edits.as_slice(), [(1, "downloading".to_string())]);
        assert_eq!(n.message_id().await, Some(1));
    }

    #[tokio::test]
    async fn identical_text_within_throttle_is_sent_once() {
        let channel = Arc::new(RecordingChannel::default());
        let n = notifier(&channel, None, 3000);

        n.update("50%", false).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        n.update("50%", false).await;

        assert_eq!(channel.outbound_calls(), 1, "duplicate suppressed");

        // force overrides both dedup and throttle
        n.update("50%", true).await;
        assert_eq!(channel.outbound_calls(), 2);
    }

    #[tokio::test]
    async fn changed_text_still_respects_the_throttle() {
        let channel = Arc::new(RecordingChannel::default());
        let n = notifier(&channel, None, 80);

        n.update("10%", false).await;
        n.update("20%", false).await;
        assert_eq!(channel.outbound_calls(), 1, "inside the window");

        tokio::time::sleep(Duration::from_millis(120)).await;
        n.update("30%", false).await;
        assert_eq!(channel.outbound_calls(), 2, "window elapsed");
    }

    #[tokio::test]
    async fn existing_message_id_is_adopted() {
        let channel = Arc::new(RecordingChannel::default());
        let n = notifier(&channel, Some(777), 0);

        n.update("hello", true).await;

        assert!(channel.sends.lock().unwrap().is_empty(), "no new message");
        assert_eq!(
            channel.edits.lock().unwrap().as_slice(),
            [(777, "hello".to_string())]
        );
    }

    #[tokio::test]
    async fn channel_failures_are_swallowed_and_retried_later() {
        let channel = Arc::new(RecordingChannel::default());
        channel.failing.store(true, Ordering::SeqCst);
        let n = notifier(&channel, None, 0);

        // Must not panic or propagate
        n.update("status", true).await;
        assert_eq!(n.message_id().await, None);

        // Once the channel recovers, the same text goes out (dedup only
        // tracks delivered updates)
        channel.failing.store(false, Ordering::SeqCst);
        n.update("status", false).await;
        assert_eq!(channel.sends.lock().unwrap().as_slice(), ["status"]);
    }

    #[tokio::test]
    async fn delete_is_best_effort_and_idempotent() {
        let channel = Arc::new(RecordingChannel::default());
        let n = notifier(&channel, None, 0);

        n.update("working", true).await;
        n.delete().await;
        n.delete().await;

        assert_eq!(channel.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(n.message_id().await, None);
    }

    #[tokio::test]
    async fn updates_after_delete_are_dropped() {
        let channel = Arc::new(RecordingChannel::default());
        let n = notifier(&channel, None, 0);

        n.update("working", true).await;
        n.delete().await;
        // A late fire-and-forget progress emission must not recreate the message
        n.update("99%", true).await;

        assert_eq!(channel.outbound_calls(), 1);
        assert_eq!(n.message_id().await, None);
    }
}
