//! Participant connection management and outbound fan-out
//!
//! This module handles the hub-side view of connected participants:
//! - Connection lifecycle (attach on connect, detach on disconnect)
//! - Per-connection outbound queues so the hub never awaits a send
//! - Broadcast delivery to every live connection
//!
//! Each participant row holds the sending half of that connection's outbound
//! channel. The transport's writer task drains the other half, which keeps
//! delivery ordered per connection while the hub's critical section stays
//! free of suspension points.

use log::{debug, info, warn};
use quiz_protocol::{ConnId, ServerEvent};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;

/// One live connection as the hub sees it.
#[derive(Debug)]
pub struct Participant {
    /// Transport-assigned connection identity.
    pub id: ConnId,
    /// When this connection attached.
    pub connected_at: Instant,
    /// Queue into the connection's writer task.
    sender: UnboundedSender<ServerEvent>,
}

/// All currently connected participants.
///
/// Mutated only on connect and disconnect; its size is the broadcast
/// online count.
pub struct ParticipantRegistry {
    participants: HashMap<ConnId, Participant>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self {
            participants: HashMap::new(),
        }
    }

    /// Attaches a new connection. Returns false if the id is already
    /// present, which would indicate a transport bug.
    pub fn add(&mut self, id: ConnId, sender: UnboundedSender<ServerEvent>) -> bool {
        if self.participants.contains_key(&id) {
            warn!("duplicate connection id {} refused", id);
            return false;
        }

        info!("participant {} connected", id);
        self.participants.insert(
            id,
            Participant {
                id,
                connected_at: Instant::now(),
                sender,
            },
        );
        true
    }

    /// Detaches a connection. Returns true if it was present.
    pub fn remove(&mut self, id: ConnId) -> bool {
        if self.participants.remove(&id).is_some() {
            info!("participant {} disconnected", id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.participants.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Best-effort delivery to one connection.
    ///
    /// A missing participant or a closed queue is logged and skipped; send
    /// failures never propagate into the hub's event handling.
    pub fn send_to(&self, id: ConnId, event: ServerEvent) {
        match self.participants.get(&id) {
            Some(participant) => {
                if participant.sender.send(event).is_err() {
                    debug!("outbound queue for {} is closed, dropping event", id);
                }
            }
            None => debug!("send to unknown participant {} dropped", id),
        }
    }

    /// Delivery to every currently connected participant.
    pub fn broadcast(&self, event: &ServerEvent) {
        for participant in self.participants.values() {
            if participant.sender.send(event.clone()).is_err() {
                debug!(
                    "outbound queue for {} is closed, dropping broadcast",
                    participant.id
                );
            }
        }
    }
}

impl Default for ParticipantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn attach(registry: &mut ParticipantRegistry, raw: u64) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        assert!(registry.add(ConnId::new(raw), tx));
        rx
    }

    #[test]
    fn test_add_and_remove_track_count() {
        let mut registry = ParticipantRegistry::new();
        assert!(registry.is_empty());

        let _rx1 = attach(&mut registry, 1);
        let _rx2 = attach(&mut registry, 2);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(ConnId::new(1)));

        assert!(registry.remove(ConnId::new(1)));
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(ConnId::new(1)));

        assert!(!registry.remove(ConnId::new(99)));
    }

    #[test]
    fn test_duplicate_id_is_refused() {
        let mut registry = ParticipantRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        assert!(registry.add(ConnId::new(1), tx1));
        assert!(!registry.add(ConnId::new(1), tx2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_send_to_reaches_only_the_target() {
        let mut registry = ParticipantRegistry::new();
        let mut rx1 = attach(&mut registry, 1);
        let mut rx2 = attach(&mut registry, 2);

        registry.send_to(ConnId::new(1), ServerEvent::UserCount { count: 2 });

        assert_eq!(rx1.try_recv().unwrap(), ServerEvent::UserCount { count: 2 });
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let mut registry = ParticipantRegistry::new();
        let mut rx1 = attach(&mut registry, 1);
        let mut rx2 = attach(&mut registry, 2);

        registry.broadcast(&ServerEvent::UserCount { count: 2 });

        assert_eq!(rx1.try_recv().unwrap(), ServerEvent::UserCount { count: 2 });
        assert_eq!(rx2.try_recv().unwrap(), ServerEvent::UserCount { count: 2 });
    }

    #[test]
    fn test_closed_queue_does_not_panic() {
        let mut registry = ParticipantRegistry::new();
        let rx = attach(&mut registry, 1);
        drop(rx);

        // Both paths must swallow the closed-channel error.
        registry.send_to(ConnId::new(1), ServerEvent::UserCount { count: 1 });
        registry.broadcast(&ServerEvent::UserCount { count: 1 });
    }

    #[test]
    fn test_send_to_unknown_participant_is_dropped() {
        let registry = ParticipantRegistry::new();
        registry.send_to(ConnId::new(42), ServerEvent::UserCount { count: 0 });
    }
}
