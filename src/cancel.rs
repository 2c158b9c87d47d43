//! The single cancellation token threaded from the HTTP adapter into the
//! engine, backend adapter, translator, and tool executors (`spec.md` §5),
//! plus the in-flight registry that `DELETE /v1/responses/{id}` uses to
//! reach it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// response-id → cancel handle, shared across HTTP workers behind a
/// single lock with short critical sections (`spec.md` §5 "Shared state").
#[derive(Default)]
pub struct InFlightRegistry {
    handles: Mutex<HashMap<String, CancelToken>>,
}

impl InFlightRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, response_id: impl Into<String>) -> CancelToken {
        let token = CancelToken::new();
        self.handles.lock().insert(response_id.into(), token.clone());
        token
    }

    pub fn unregister(&self, response_id: &str) {
        self.handles.lock().remove(response_id);
    }

    /// Cancels the in-flight response, if any. Returns whether one was found.
    pub fn cancel(&self, response_id: &str) -> bool {
        match self.handles.lock().get(response_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
