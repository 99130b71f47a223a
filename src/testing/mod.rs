//! Instrumented in-memory collaborators.
//!
//! These stand in for real output backends in tests and benches: every
//! operation is counted, and failure modes (refusing to open, running out of
//! frames) can be switched on.

mod audio;
mod overlay;
mod video;

pub use audio::TestAudioPort;
pub use overlay::TestOverlayManager;
pub use video::{RENDER_VPTS_OFFSET, TEST_CAPABILITIES, TestFrame, TestVideoPort};

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing event counter.
#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicU64);

impl Counter {
    pub(crate) fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
