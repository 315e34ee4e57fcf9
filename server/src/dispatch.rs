//! Event fan-out to registered connections
//!
//! The dispatcher encodes an event once and pushes the resulting frame to
//! every connection in a fresh registry snapshot. Sends run concurrently
//! and fail independently; a broken peer is unregistered and never stalls
//! delivery to the others.

use crate::connections::{ConnectionRegistry, Peer, SendError};
use futures_util::future::join_all;
use log::warn;
use shared::{encode, Event};
use std::sync::Arc;

pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Dispatcher { registry }
    }

    /// Sends an event to every connection registered at call time.
    ///
    /// Waits until each send has either completed or failed. Failures
    /// are swallowed: the affected connection is unregistered and the
    /// broadcast proceeds for everyone else.
    pub async fn broadcast(&self, event: &Event) {
        let peers = self.registry.snapshot().await;
        if peers.is_empty() {
            return;
        }

        let frame = encode(event);
        let sends = peers.into_iter().map(|peer| {
            let frame = frame.clone();
            async move {
                let result = peer.send(frame).await;
                (peer.id, result)
            }
        });

        for (id, result) in join_all(sends).await {
            if result.is_err() {
                warn!("Dropping connection {}: send failed during broadcast", id);
                self.registry.unregister(id).await;
            }
        }
    }

    /// Single-recipient send, used for query-style replies.
    ///
    /// A failure unregisters the connection and is reported to the
    /// caller, who typically has nothing left to do with it.
    pub async fn send_to(&self, peer: &Peer, event: &Event) -> Result<(), SendError> {
        match peer.send(encode(event)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("Dropping connection {}: send failed", peer.id);
                self.registry.unregister(peer.id).await;
                Err(err)
            }
        }
    }
}
