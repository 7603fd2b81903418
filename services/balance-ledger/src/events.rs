//! Outbound balance events
//!
//! The sequencer writes, publisher threads drain. Queues are unbounded so a
//! slow publisher backpressures the drain side, never drops a financial
//! event.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use types::ids::ClientId;
use types::wallet::ClientBalanceUpdate;

/// Signal that some balance of this client changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdateNotification {
    pub client_id: ClientId,
}

/// Old/new pairs for every (client, asset) one operation touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdateEvent {
    pub message_id: String,
    /// Unix nanos.
    pub timestamp: i64,
    pub balances: Vec<ClientBalanceUpdate>,
}

/// Sequencer-side handles.
#[derive(Debug, Clone)]
pub struct BalanceEventSenders {
    pub notifications: Sender<BalanceUpdateNotification>,
    pub updates: Sender<BalanceUpdateEvent>,
}

/// Publisher-side handles.
#[derive(Debug)]
pub struct BalanceEventReceivers {
    pub notifications: Receiver<BalanceUpdateNotification>,
    pub updates: Receiver<BalanceUpdateEvent>,
}

/// Create the connected sender/receiver pair.
pub fn balance_event_queues() -> (BalanceEventSenders, BalanceEventReceivers) {
    let (notification_tx, notification_rx) = unbounded();
    let (update_tx, update_rx) = unbounded();
    (
        BalanceEventSenders {
            notifications: notification_tx,
            updates: update_tx,
        },
        BalanceEventReceivers {
            notifications: notification_rx,
            updates: update_rx,
        },
    )
}
