//! Viewer fan-out
//!
//! Keeps the registry of connected dashboard viewers and pushes one update
//! event per accepted observation into each viewer's bounded buffer.
//! Join and publish take the same registry lock, so a joining viewer's init
//! snapshot and its subsequent update stream have no gap and no duplicate.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::history::HistoryStore;
use crate::model::{Observation, ViewerEvent};

/// Observations included in the init event sent to a joining viewer.
pub const INIT_SNAPSHOT_LEN: usize = 25;

const DEFAULT_VIEWER_BUFFER: usize = 256;

/// A registered viewer: its id and the stream of events to forward.
pub struct ViewerHandle {
    pub id: Uuid,
    pub events: mpsc::Receiver<ViewerEvent>,
}

pub struct Broadcaster {
    history: Arc<HistoryStore>,
    viewers: Mutex<HashMap<Uuid, mpsc::Sender<ViewerEvent>>>,
    viewer_buffer: usize,
}

impl Broadcaster {
    pub fn new(history: Arc<HistoryStore>) -> Self {
        Self {
            history,
            viewers: Mutex::new(HashMap::new()),
            viewer_buffer: DEFAULT_VIEWER_BUFFER,
        }
    }

    pub fn with_viewer_buffer(mut self, capacity: usize) -> Self {
        self.viewer_buffer = capacity;
        self
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Registers a new viewer and queues its init event (last 25
    /// observations plus the sorted gateway list). The init travels
    /// through the viewer's own buffer, so it is delivered before any
    /// update published after the join.
    pub async fn join(&self) -> ViewerHandle {
        let mut viewers = self.viewers.lock().await;
        let messages = self.history.snapshot(INIT_SNAPSHOT_LEN).await;
        let gateways = self.history.gateways().await;

        // capacity 0 would panic in mpsc::channel
        let (events_tx, events_rx) = mpsc::channel(self.viewer_buffer.max(1));
        let init = ViewerEvent::Init { messages, gateways };
        let _ = events_tx.try_send(init);

        let id = Uuid::new_v4();
        viewers.insert(id, events_tx);
        log::debug!("viewer {} joined, {} connected", id, viewers.len());

        ViewerHandle {
            id,
            events: events_rx,
        }
    }

    /// Removes a viewer from the registry. Safe to call for an id that
    /// was already pruned.
    pub async fn leave(&self, id: Uuid) {
        let mut viewers = self.viewers.lock().await;
        if viewers.remove(&id).is_some() {
            log::debug!("viewer {} left, {} connected", id, viewers.len());
        }
    }

    /// Appends the observation to history and fans the update out to every
    /// connected viewer, all under the registry lock. Delivery is
    /// best-effort: a full viewer buffer drops this update for that viewer
    /// only, a closed one removes the viewer.
    pub async fn publish(&self, observation: Observation) {
        let mut viewers = self.viewers.lock().await;
        self.history.append(observation.clone()).await;

        if viewers.is_empty() {
            return;
        }
        let update = ViewerEvent::Update(observation);
        viewers.retain(|id, events| match events.try_send(update.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("viewer {} is not keeping up, dropping update", id);
                true
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("viewer {} channel closed, pruning", id);
                false
            }
        });
    }

    pub async fn viewer_count(&self) -> usize {
        self.viewers.lock().await.len()
    }
}
