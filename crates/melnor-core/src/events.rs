//! Device event system for connection and sync notifications.
//!
//! A [`Device`](crate::Device) built with an [`EventSender`] publishes an
//! event whenever its link changes state or a fetch or push completes.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use melnor_types::ModelInfo;

/// Events emitted by a device session.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeviceEvent {
    /// Link established and model read.
    Connected {
        address: String,
        model: Option<ModelInfo>,
    },
    /// Link lost or closed.
    Disconnected {
        address: String,
        reason: DisconnectReason,
    },
    /// A fetch finished; `failed_records` lists records that were not refreshed.
    StateFetched {
        address: String,
        battery: u8,
        failed_records: Vec<String>,
    },
    /// Every record was written to the device.
    StatePushed { address: String },
    /// An operation failed.
    Error { address: String, error: String },
}

/// Reason for disconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    UserRequested,
    /// The transport reported the link dropped.
    LinkLost,
    /// The post-connect model read failed.
    HandshakeFailed,
}

/// Sender for device events.
pub type EventSender = broadcast::Sender<DeviceEvent>;

/// Receiver for device events.
pub type EventReceiver = broadcast::Receiver<DeviceEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}

/// Create a default event channel with capacity 100.
pub fn default_event_channel() -> (EventSender, EventReceiver) {
    event_channel(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = DeviceEvent::Disconnected {
            address: "AA:BB:CC:DD:EE:FF".into(),
            reason: DisconnectReason::LinkLost,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"disconnected""#));
        assert!(json.contains(r#""reason":"link_lost""#));

        let back: DeviceEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_channel_delivers_to_subscribers() {
        let (tx, mut rx) = default_event_channel();
        let mut second = tx.subscribe();
        tx.send(DeviceEvent::StatePushed {
            address: "dev".into(),
        })
        .unwrap();

        assert!(matches!(rx.recv().await.unwrap(), DeviceEvent::StatePushed { .. }));
        assert!(matches!(second.recv().await.unwrap(), DeviceEvent::StatePushed { .. }));
    }
}
