use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::domain::{AuthorizationRequest, MatchId, RequestId, RequestStatus};

/// Outbound hook receiving request lifecycle events.
///
/// Delivery is fire-and-forget: a failing sink never undoes the change it reports.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: RequestEvent) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestEvent {
    RequestCreated {
        request: AuthorizationRequest,
    },
    StatusChanged {
        request_id: RequestId,
        match_id: MatchId,
        from: RequestStatus,
        to: RequestStatus,
    },
    /// A chapter batch landed; read paths for the match should refresh.
    BatchCommitted {
        match_id: MatchId,
        chapter: String,
        request_ids: Vec<RequestId>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Sink backed by a broadcast channel; each subscriber gets its own receiver.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<RequestEvent>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl BroadcastNotifier {
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RequestEvent> {
        self.sender.subscribe()
    }
}

impl NotificationSink for BroadcastNotifier {
    fn publish(&self, event: RequestEvent) -> Result<(), NotificationError> {
        // No subscribers is a normal state, not a delivery failure.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_published_events() {
        let notifier = BroadcastNotifier::default();
        let mut receiver = notifier.subscribe();

        let event = RequestEvent::BatchCommitted {
            match_id: MatchId("m-1".to_string()),
            chapter: "Rosario".to_string(),
            request_ids: vec![RequestId("req-000001".to_string())],
        };
        notifier.publish(event.clone()).expect("publish");

        assert_eq!(receiver.try_recv().expect("event queued"), event);
    }

    #[test]
    fn publishing_without_subscribers_succeeds() {
        let notifier = BroadcastNotifier::with_capacity(4);
        let event = RequestEvent::StatusChanged {
            request_id: RequestId("req-000001".to_string()),
            match_id: MatchId("m-1".to_string()),
            from: RequestStatus::Pending,
            to: RequestStatus::Approved,
        };
        assert!(notifier.publish(event).is_ok());
    }
}
