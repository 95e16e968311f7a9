//! Application state.

use portlane_scheduler::{Dispatcher, JobStore};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub store: JobStore,
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, webhook_secret: Option<String>) -> Self {
        Self {
            store: dispatcher.store().clone(),
            dispatcher,
            webhook_secret: webhook_secret.map(Arc::from),
        }
    }
}
