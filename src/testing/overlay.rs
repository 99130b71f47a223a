use super::Counter;
use crate::frame::FrameRef;
use crate::port::{OverlayEvent, OverlayManager};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

/// An overlay manager that counts what it is asked to do.
#[derive(Debug, Default)]
pub struct TestOverlayManager {
    next_handle: AtomicI32,
    inits: Counter,
    events: Counter,
    blends: Counter,
    flushes: Counter,
}

impl TestOverlayManager {
    /// Create a manager.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `init` calls.
    pub fn inits(&self) -> u64 {
        self.inits.get()
    }

    /// Events queued.
    pub fn events(&self) -> u64 {
        self.events.get()
    }

    /// `blend` calls.
    pub fn blends(&self) -> u64 {
        self.blends.get()
    }

    /// `flush_events` calls.
    pub fn flushes(&self) -> u64 {
        self.flushes.get()
    }
}

impl OverlayManager for TestOverlayManager {
    fn init(&self) {
        self.inits.bump();
    }

    fn dispose(&self) {}

    fn get_handle(&self, _object_type: i32) -> i32 {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }

    fn free_handle(&self, _handle: i32) {}

    fn add_event(&self, _event: &OverlayEvent) -> i32 {
        self.events.bump();
        0
    }

    fn flush_events(&self) {
        self.flushes.bump();
    }

    fn redraw_needed(&self, _vpts: i64) -> bool {
        false
    }

    fn blend(&self, _vpts: i64, _frame: &FrameRef, _enabled: bool) {
        self.blends.bump();
    }
}
