//! Broadcast channel for ledger events.
//!
//! Every applied donation transition publishes a [`LedgerEvent`] through the
//! [`EventBus`]. The server's audit-log task takes the whole stream;
//! [`EventBus::subscribe_for`] narrows it to one campaign and tracks that
//! campaign's running total as credits and refunds arrive.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::{CampaignId, LedgerEvent};

/// Broadcast bus for [`LedgerEvent`]s.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity.
/// When the ring buffer is full, the oldest events are dropped for lagging
/// receivers. Publishing never blocks the ledger.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    /// If there are no active receivers, the event is silently dropped.
    pub fn publish(&self, event: LedgerEvent) -> usize {
        let kind = event.event_type_str();
        let delivered = self.sender.send(event).unwrap_or(0);
        tracing::trace!(event_type = kind, delivered, "ledger event published");
        delivered
    }

    /// Creates a new receiver that will receive all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Subscribes to the events of one campaign only.
    ///
    /// `last_total` seeds [`CampaignEvents::total`]; pass the campaign's
    /// current total read right before subscribing.
    #[must_use]
    pub fn subscribe_for(&self, campaign_id: CampaignId, last_total: u64) -> CampaignEvents {
        CampaignEvents {
            campaign_id,
            total: last_total,
            receiver: self.sender.subscribe(),
        }
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver filtered to a single campaign.
#[derive(Debug)]
pub struct CampaignEvents {
    campaign_id: CampaignId,
    total: u64,
    receiver: broadcast::Receiver<LedgerEvent>,
}

impl CampaignEvents {
    /// Campaign this receiver follows.
    #[must_use]
    pub const fn campaign_id(&self) -> CampaignId {
        self.campaign_id
    }

    /// Running total as of the last credit or refund received.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    fn accept(&mut self, event: &LedgerEvent) -> bool {
        if event.campaign_id() != self.campaign_id {
            return false;
        }
        if let Some(total) = event.campaign_total() {
            self.total = total;
        }
        true
    }

    /// Waits for the next event of this campaign.
    ///
    /// # Errors
    ///
    /// [`RecvError::Lagged`] if events were dropped, after which
    /// [`Self::total`] may be stale until the next credit or refund, and
    /// [`RecvError::Closed`] once the bus is gone.
    pub async fn recv(&mut self) -> Result<LedgerEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accept(&event) {
                return Ok(event);
            }
        }
    }

    /// Returns the next buffered event of this campaign without waiting.
    ///
    /// # Errors
    ///
    /// [`TryRecvError::Empty`] when nothing for this campaign is buffered,
    /// otherwise as [`broadcast::Receiver::try_recv`].
    pub fn try_recv(&mut self) -> Result<LedgerEvent, TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.accept(&event) {
                return Ok(event);
            }
        }
    }
}
