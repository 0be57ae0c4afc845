//! Interrupt-driven binary sensors

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace};

use disco_core::{on_off, EntityName, IntegrationKind, Readings, SharedClock, Signature, SignatureEntry};

use crate::{Edge, Entity, InterruptDriven, InterruptSource, TOGGLE_ICON};

const NEVER: u64 = u64::MAX;

/// Debounce window applied when none is configured
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Lock-free hand-off between interrupt context and the run loop
///
/// Interrupt context only ever calls [`fire`](Self::fire); the run loop reads
/// and clears with [`take`](Self::take). Fires closer together than the
/// debounce window are dropped.
pub struct InterruptLatch {
    pending: AtomicBool,
    last_fire_us: AtomicU64,
    debounce: Duration,
    clock: SharedClock,
}

impl InterruptLatch {
    pub fn new(debounce: Duration, clock: SharedClock) -> Self {
        Self {
            pending: AtomicBool::new(false),
            last_fire_us: AtomicU64::new(NEVER),
            debounce,
            clock,
        }
    }

    /// Record a fire. Returns false when it fell inside the debounce window.
    pub fn fire(&self) -> bool {
        let now = self.clock.now().as_micros() as u64;
        let last = self.last_fire_us.load(Ordering::Acquire);

        if last != NEVER && now.saturating_sub(last) < self.debounce.as_micros() as u64 {
            return false;
        }
        // a concurrent fire that wins the exchange owns this window
        if self
            .last_fire_us
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.pending.store(true, Ordering::Release);
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Read and clear the pending flag
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

/// Binary sensor reporting `ON` once per debounced interrupt
///
/// Discovered as a `binary_sensor` but publishes on the shared sensor state
/// topic alongside every other readable entity.
pub struct Trigger {
    name: EntityName,
    signature: Signature,
    state_key: String,
    source: InterruptSource,
    edge: Edge,
    latch: Arc<InterruptLatch>,
    clock: SharedClock,
    /// Reads before this instant are suppressed
    ready_at: Duration,
}

impl Trigger {
    pub fn new(name: EntityName, source: InterruptSource, clock: SharedClock) -> Self {
        let state_key = format!("{name}_state");

        Self {
            signature: Signature::single(state_key.clone(), SignatureEntry::new().icon(TOGGLE_ICON)),
            name,
            state_key,
            source,
            edge: Edge::Rising,
            latch: Arc::new(InterruptLatch::new(DEFAULT_DEBOUNCE, clock.clone())),
            ready_at: clock.now(),
            clock,
        }
    }

    /// Set the debounce window
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.latch = Arc::new(InterruptLatch::new(debounce, self.clock.clone()));
        self
    }

    /// Set the edge the line fires on
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edge = edge;
        self
    }

    /// Suppress reports for `window` after construction
    ///
    /// Some detectors (PIR modules) fire spuriously while settling.
    pub fn with_warmup(mut self, window: Duration) -> Self {
        self.ready_at = self.clock.now() + window;
        self
    }

    pub fn is_warming_up(&self) -> bool {
        self.clock.now() < self.ready_at
    }
}

impl Entity for Trigger {
    fn name(&self) -> &EntityName {
        &self.name
    }

    fn integration(&self) -> IntegrationKind {
        IntegrationKind::BinarySensor
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn read(&mut self) -> Option<Readings> {
        if self.is_warming_up() {
            if self.latch.take() {
                debug!(entity = %self.name, "Discarding interrupt during warm-up");
            }
            return None;
        }

        let fired = self.latch.take();
        trace!(entity = %self.name, fired, "Trigger read");

        let mut readings = Readings::new();
        readings.insert(self.state_key.clone(), Value::from(on_off(fired)));
        Some(readings)
    }

    fn as_interrupt_driven(&self) -> Option<&dyn InterruptDriven> {
        Some(self)
    }
}

impl InterruptDriven for Trigger {
    fn interrupt_source(&self) -> InterruptSource {
        self.source
    }

    fn edge(&self) -> Edge {
        self.edge
    }

    fn latch(&self) -> Arc<InterruptLatch> {
        self.latch.clone()
    }
}
