//! Event Publisher - Publishes ledger events to subscribers
//!
//! Every committed mutation leaves one [`LedgerEvent`] in the append-only
//! event log and is then fanned out over a broadcast channel, so dashboards
//! can follow the ledger without polling full state.

use crate::{
    config::EventsConfig,
    models::{AccountId, EntityKind, LedgerEvent},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Event recorded inside a transaction, sequenced on commit
#[derive(Debug, Clone)]
pub(crate) struct PendingEvent {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub operation: &'static str,
    pub actor: Option<AccountId>,
}

/// Append-only log of committed events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    last_sequence: u64,
    events: Vec<LedgerEvent>,
}

impl EventLog {
    /// Sequence and store the events of one committed transaction
    pub(crate) fn append(
        &mut self,
        pending: Vec<PendingEvent>,
        timestamp: DateTime<Utc>,
    ) -> Vec<LedgerEvent> {
        let mut committed = Vec::with_capacity(pending.len());

        for event in pending {
            self.last_sequence += 1;
            let event = LedgerEvent {
                id: Uuid::new_v4(),
                sequence: self.last_sequence,
                entity_kind: event.entity_kind,
                entity_id: event.entity_id,
                operation: event.operation.to_string(),
                actor: event.actor,
                timestamp,
            };
            self.events.push(event.clone());
            committed.push(event);
        }

        committed
    }

    /// Events with a sequence strictly greater than `sequence`
    pub fn since(&self, sequence: u64) -> Vec<LedgerEvent> {
        // Sequences are dense and start at 1, so the index is sequence itself
        let start = usize::try_from(sequence)
            .unwrap_or(usize::MAX)
            .min(self.events.len());
        self.events[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

/// Main event publisher
#[derive(Debug)]
pub struct EventPublisher {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventPublisher {
    /// Create a new event publisher
    pub fn new(config: &EventsConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self { sender }
    }

    /// Publish a committed event to current subscribers
    pub fn publish(&self, event: LedgerEvent) {
        debug!(
            sequence = event.sequence,
            kind = ?event.entity_kind,
            entity_id = %event.entity_id,
            operation = %event.operation,
            "Publishing ledger event"
        );

        // No subscribers is fine: the log keeps the event for catch-up reads
        let _ = self.sender.send(event);
    }

    /// Subscribe to events committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
