//! Callbacks around the transport call.
//!
//! `requesting` callbacks run after the request is signed and before it is
//! handed to the transport; `requested` callbacks run once a response came
//! back. Both run synchronously, in registration order. A failed transport
//! call skips the `requested` callbacks.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::response::SignatureResponse;
use crate::transport::OutgoingRequest;

pub type RequestingHook = Arc<dyn Fn(&OutgoingRequest) + Send + Sync>;
pub type RequestedHook = Arc<dyn Fn(&OutgoingRequest, &SignatureResponse) + Send + Sync>;

#[derive(Default)]
struct HookLists {
    requesting: Vec<RequestingHook>,
    requested: Vec<RequestedHook>,
}

/// Ordered hook registry shared by every client of a manager.
#[derive(Default)]
pub struct RequestHooks {
    lists: RwLock<HookLists>,
}

impl RequestHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HookLists> {
        match self.lists.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HookLists> {
        match self.lists.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn on_requesting<F>(&self, hook: F)
    where
        F: Fn(&OutgoingRequest) + Send + Sync + 'static,
    {
        self.write().requesting.push(Arc::new(hook));
    }

    pub fn on_requested<F>(&self, hook: F)
    where
        F: Fn(&OutgoingRequest, &SignatureResponse) + Send + Sync + 'static,
    {
        self.write().requested.push(Arc::new(hook));
    }

    pub(crate) fn fire_requesting(&self, request: &OutgoingRequest) {
        // Clone the list so a hook may register further hooks without deadlocking.
        let hooks = self.read().requesting.clone();
        for hook in hooks {
            hook(request);
        }
    }

    pub(crate) fn fire_requested(&self, request: &OutgoingRequest, response: &SignatureResponse) {
        let hooks = self.read().requested.clone();
        for hook in hooks {
            hook(request, response);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        let lists = self.read();
        lists.requesting.is_empty() && lists.requested.is_empty()
    }
}

impl std::fmt::Debug for RequestHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lists = self.read();
        f.debug_struct("RequestHooks")
            .field("requesting", &lists.requesting.len())
            .field("requested", &lists.requested.len())
            .finish()
    }
}
