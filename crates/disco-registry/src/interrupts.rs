//! Hand-off from interrupt context to trigger latches

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use disco_entities::{Edge, HardwareError, InterruptController, InterruptLatch, InterruptSource};

/// Snapshot of interrupt source → latch routes
///
/// Cheap to clone and safe to move into interrupt handlers. Routing only
/// touches the latch's atomics, never the entity itself.
#[derive(Clone, Default)]
pub struct InterruptRouter {
    routes: Arc<IndexMap<InterruptSource, (Edge, Arc<InterruptLatch>)>>,
}

impl InterruptRouter {
    pub(crate) fn new(routes: IndexMap<InterruptSource, (Edge, Arc<InterruptLatch>)>) -> Self {
        Self {
            routes: Arc::new(routes),
        }
    }

    /// Deliver a fire from `source`. Returns true when it latched a pending
    /// read, false when debounced or unrouted.
    pub fn route(&self, source: InterruptSource) -> bool {
        match self.routes.get(&source) {
            Some((_, latch)) => latch.fire(),
            None => {
                trace!(%source, "Interrupt from unrouted source");
                false
            }
        }
    }

    /// Whether any routed latch awaits its forced read
    pub fn any_pending(&self) -> bool {
        self.routes.values().any(|(_, latch)| latch.is_pending())
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Register one handler per routed source on a hardware controller
    pub fn bind(&self, controller: &mut dyn InterruptController) -> Result<(), HardwareError> {
        for (source, (edge, latch)) in self.routes.iter() {
            let latch = latch.clone();
            controller.register(
                *source,
                *edge,
                Box::new(move |_| {
                    latch.fire();
                }),
            )?;
        }
        Ok(())
    }
}
