//! Shared service wiring
//!
//! One `AppContext` is built at startup and handed to every session,
//! request handler and ingest task.

use crate::classifier::DirectionClassifier;
use crate::connections::ConnectionRegistry;
use crate::dispatch::Dispatcher;
use crate::leaderboard::Leaderboard;
use crate::persist::{SqliteStore, StoreError};
use shared::EventRegistry;
use std::path::Path;
use std::sync::{Arc, RwLock};

pub struct AppContext {
    pub events: EventRegistry,
    pub connections: Arc<ConnectionRegistry>,
    pub dispatcher: Dispatcher,
    pub store: Arc<SqliteStore>,
    pub leaderboard: Arc<Leaderboard>,
    classifier: RwLock<Option<Arc<DirectionClassifier>>>,
}

impl AppContext {
    /// Wires the services over a disk-backed store.
    pub fn open(db_path: &Path) -> Result<Arc<Self>, StoreError> {
        Self::build(SqliteStore::open(db_path)?)
    }

    /// Wires the services over an in-memory store; scores last only for
    /// this process lifetime.
    pub fn open_in_memory() -> Result<Arc<Self>, StoreError> {
        Self::build(SqliteStore::open_in_memory()?)
    }

    fn build(store: SqliteStore) -> Result<Arc<Self>, StoreError> {
        let store = Arc::new(store);
        let connections = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&connections));
        let leaderboard = Arc::new(Leaderboard::open(Arc::clone(&store))?);

        Ok(Arc::new(AppContext {
            events: EventRegistry::with_defaults(),
            connections,
            dispatcher,
            store,
            leaderboard,
            classifier: RwLock::new(None),
        }))
    }

    /// Swaps in a (re)loaded classifier. In-flight handlers keep using
    /// the instance they already hold.
    pub fn set_classifier(&self, classifier: DirectionClassifier) {
        *self.classifier.write().unwrap() = Some(Arc::new(classifier));
    }

    pub fn classifier(&self) -> Option<Arc<DirectionClassifier>> {
        self.classifier.read().unwrap().clone()
    }
}
