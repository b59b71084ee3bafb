//! # Live View Hub
//!
//! Fan-out of fill events to every connected WebSocket.
//!
//! - Each subscriber owns a bounded queue, the hub only holds the sending half
//! - A subscriber whose queue is full or closed is dropped on the next broadcast
//! - The initial snapshot is queued before the subscriber becomes visible, so it
//!   always arrives before any live event
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use fountain::FillEvent;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tracing::{debug, warn};

const QUEUE_DEPTH: usize = 256;

pub struct Subscription {
    pub id: u64,
    pub frames: Receiver<String>,
}

#[derive(Default)]
pub struct Hub {
    subscribers: Mutex<HashMap<u64, Sender<String>>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_with(&self, initial: &FillEvent) -> Subscription {
        let (sender, frames) = channel(QUEUE_DEPTH);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // empty queue, cannot be full
        let _ = sender.try_send(initial.to_string());

        match self.subscribers.lock() {
            Ok(mut subscribers) => {
                subscribers.insert(id, sender);
                debug!("Live view {id} subscribed, {} open", subscribers.len());
            }
            Err(_) => warn!("Hub lock poisoned, live view {id} gets the snapshot only"),
        }

        Subscription { id, frames }
    }

    pub fn unsubscribe(&self, id: u64) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.remove(&id);
            debug!("Live view {id} left, {} open", subscribers.len());
        }
    }

    pub fn broadcast(&self, event: &FillEvent) {
        let frame = event.to_string();

        let Ok(mut subscribers) = self.subscribers.lock() else {
            warn!("Hub lock poisoned, dropping {frame}");
            return;
        };

        let dead: Vec<u64> = subscribers
            .iter()
            .filter(|(_, sender)| sender.try_send(frame.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();

        for id in dead {
            subscribers.remove(&id);
            debug!("Dropped unresponsive live view {id}");
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
