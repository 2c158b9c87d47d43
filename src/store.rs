//! Store Interface (`spec.md` §4.6): an opaque contract the engine uses to
//! persist and fetch prior responses for `previous_response_id` chain
//! reconstruction. The engine does not depend on storage durability —
//! `save` may be a no-op implementation; failures there are logged, not
//! surfaced (`spec.md` §4.4 step 5, §7).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use antwort_protocol::{ApiError, Item, Response};

#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn save(&self, response: &Response) -> Result<(), ApiError>;

    /// Fetch a prior response to resolve `previous_response_id` chains.
    /// Not found is a hard error for this path (`spec.md` §4.4 step 2).
    async fn get_for_chain(&self, id: &str) -> Result<Response, ApiError>;

    async fn get(&self, id: &str) -> Option<Response>;

    async fn delete(&self, id: &str) -> bool;

    async fn list(&self) -> Vec<Response>;

    async fn get_input_items(&self, id: &str) -> Option<Vec<Item>>;
}

/// Default non-durable implementation so the engine and HTTP surface are
/// runnable end to end without an external database.
#[derive(Default)]
pub struct InMemoryResponseStore {
    responses: Mutex<HashMap<String, Response>>,
}

impl InMemoryResponseStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ResponseStore for InMemoryResponseStore {
    async fn save(&self, response: &Response) -> Result<(), ApiError> {
        self.responses
            .lock()
            .insert(response.id.clone(), response.clone());
        Ok(())
    }

    async fn get_for_chain(&self, id: &str) -> Result<Response, ApiError> {
        self.responses
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("no response with id '{id}'")))
    }

    async fn get(&self, id: &str) -> Option<Response> {
        self.responses.lock().get(id).cloned()
    }

    async fn delete(&self, id: &str) -> bool {
        self.responses.lock().remove(id).is_some()
    }

    async fn list(&self) -> Vec<Response> {
        self.responses.lock().values().cloned().collect()
    }

    async fn get_input_items(&self, id: &str) -> Option<Vec<Item>> {
        self.responses.lock().get(id).map(|r| r.output.clone())
    }
}
