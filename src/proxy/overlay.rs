//! Overlay manager proxy.

use super::hold;
use super::hooks::VideoHooks;
use super::video::VideoInner;
use crate::frame::FrameRef;
use crate::port::{OverlayEvent, OverlayManager, OverlayManagerRef};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Decorator over the overlay manager of a proxied video port.
///
/// Created once per port on first retrieval and cached. The cached original
/// is checked against what the port reports on every retrieval, and a rewire
/// marks it stale so the next call re-fetches it from the new port.
pub struct OverlayManagerProxy {
    port: Weak<VideoInner>,
    hooks: Arc<dyn VideoHooks>,
    manager_lock: Option<Mutex<()>>,
    original: RwLock<OverlayManagerRef>,
    stale: AtomicBool,
}

impl OverlayManagerProxy {
    pub(crate) fn new(
        port: Weak<VideoInner>,
        hooks: Arc<dyn VideoHooks>,
        manager_lock: bool,
        original: OverlayManagerRef,
    ) -> Self {
        Self {
            port,
            hooks,
            manager_lock: manager_lock.then(|| Mutex::new(())),
            original: RwLock::new(original),
            stale: AtomicBool::new(false),
        }
    }

    /// Adopt the manager the port currently reports, if it changed.
    pub(crate) fn sync(&self, reported: &OverlayManagerRef) {
        let mut original = self.original.write().unwrap();
        if !same_manager(&original, reported) {
            tracing::debug!("overlay manager changed; resynchronizing proxy");
            *original = Arc::clone(reported);
        }
        self.stale.store(false, Ordering::Release);
    }

    /// Force a re-fetch from the port on next use.
    pub(crate) fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    /// Whether the cached original must be re-fetched.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// The manager calls are forwarded to.
    pub fn original(&self) -> OverlayManagerRef {
        if self.is_stale() {
            let reported = self
                .port
                .upgrade()
                .and_then(|port| port.original().overlay_manager());
            if let Some(reported) = reported {
                self.sync(&reported);
            }
        }
        Arc::clone(&self.original.read().unwrap())
    }

    /// Forward `blend` to the original manager.
    pub fn forward_blend(&self, vpts: i64, frame: &FrameRef, enabled: bool) {
        let original = self.original();
        let _manager = hold(&self.manager_lock);
        original.blend(vpts, frame, enabled);
    }

    fn forward<R>(&self, op: impl FnOnce(&OverlayManagerRef) -> R) -> R {
        let original = self.original();
        let _manager = hold(&self.manager_lock);
        op(&original)
    }
}

fn same_manager(a: &OverlayManagerRef, b: &OverlayManagerRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl OverlayManager for OverlayManagerProxy {
    fn init(&self) {
        self.forward(|original| original.init());
    }

    fn dispose(&self) {
        self.forward(|original| original.dispose());
    }

    fn get_handle(&self, object_type: i32) -> i32 {
        self.forward(|original| original.get_handle(object_type))
    }

    fn free_handle(&self, handle: i32) {
        self.forward(|original| original.free_handle(handle));
    }

    fn add_event(&self, event: &OverlayEvent) -> i32 {
        self.forward(|original| original.add_event(event))
    }

    fn flush_events(&self) {
        self.forward(|original| original.flush_events());
    }

    fn redraw_needed(&self, vpts: i64) -> bool {
        self.forward(|original| original.redraw_needed(vpts))
    }

    fn blend(&self, vpts: i64, frame: &FrameRef, enabled: bool) {
        self.hooks.blend(self, vpts, frame, enabled);
    }
}

impl std::fmt::Debug for OverlayManagerProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayManagerProxy")
            .field("stale", &self.is_stale())
            .finish()
    }
}
