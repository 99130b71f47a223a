//! Frame interception and restoration.

use super::video::VideoInner;
use crate::error::{Error, Result};
use crate::frame::{
    FieldParity, Frame, FrameData, FrameRef, Preprocess, StreamRef, sync_down, sync_up,
};
use crate::observability::trace_violation;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// A frame wrapped by a video port proxy.
///
/// The proxy carries its own copy of the value fields and exactly one link
/// to the frame it wraps. Every forwarded operation pushes the proxy's fields
/// down into the original before the call and pulls the output-side fields
/// back up after it.
///
/// Proxies live in their port's [`FramePool`](super::FramePool). A proxy
/// starts with a lock count of one; `lock` adds to it and `free` takes from
/// it. The free that brings the count to zero detaches the original, hands it
/// its final `dispose`, and returns the proxy to the pool.
pub struct FrameProxy {
    data: FrameData,
    slot: usize,
    port: Weak<VideoInner>,
    link: Mutex<Link>,
}

#[derive(Default)]
struct Link {
    original: Option<FrameRef>,
    lock_count: usize,
    preprocess: Preprocess,
}

impl FrameProxy {
    pub(crate) fn new(slot: usize, port: Weak<VideoInner>) -> Self {
        Self {
            data: FrameData::default(),
            slot,
            port,
            link: Mutex::new(Link::default()),
        }
    }

    /// Pool slot this proxy occupies.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The wrapped frame, or `None` once the proxy has been restored.
    pub fn original(&self) -> Option<FrameRef> {
        self.link().original.clone()
    }

    /// Outstanding references on this proxy.
    pub fn lock_count(&self) -> usize {
        self.link().lock_count
    }

    /// Forward `render` to the wrapped frame.
    pub fn forward_render(&self, stream: Option<&StreamRef>) -> Result<u32> {
        self.forward(|original| original.render(stream))?
    }

    /// Forward `field` to the wrapped frame.
    pub fn forward_field(&self, parity: FieldParity) {
        if self.forward(|original| original.field(parity)).is_err() {
            self.violation("field on a restored frame");
        }
    }

    /// Wrap `original`; the proxy takes over the caller's reference.
    pub(crate) fn attach(&self, original: FrameRef, preprocess: Preprocess) {
        // Shallow copy; cloning the stream handle keeps the stream alive
        self.data.replace(original.data().snapshot());

        let mut link = self.link();
        debug_assert!(link.original.is_none(), "pooled frame proxy still attached");
        link.original = Some(original);
        link.lock_count = 1;
        link.preprocess = preprocess;
    }

    /// Detach the wrapped frame after a last copy down.
    fn restore(&self) -> Option<FrameRef> {
        let original = {
            let mut link = self.link();
            let original = link.original.take()?;
            link.lock_count = 0;
            link.preprocess = Preprocess::NONE;
            original
        };

        sync_down(&self.data, original.data());
        self.data.fields().stream = None;
        Some(original)
    }

    /// Run `op` on the wrapped frame with the two-phase field copy, under the
    /// port's frame lock.
    fn forward<R>(&self, op: impl FnOnce(&FrameRef) -> R) -> Result<R> {
        let original = self.original().ok_or(Error::StaleFrame)?;
        let port = self.port.upgrade();
        let _frame = port.as_deref().and_then(VideoInner::hold_frame);
        Ok(self.forward_to(&original, op))
    }

    fn forward_to<R>(&self, original: &FrameRef, op: impl FnOnce(&FrameRef) -> R) -> R {
        sync_down(&self.data, original.data());
        let result = op(original);
        sync_up(&self.data, original.data());
        result
    }

    /// Hand the slot back to the port once the caller's handle is gone.
    fn retire(self: Arc<Self>, port: Option<Arc<VideoInner>>) {
        let slot = self.slot;
        drop(self);
        if let Some(port) = port {
            port.restored(slot);
        }
    }

    fn violation(&self, what: &str) {
        match self.port.upgrade() {
            Some(port) => trace_violation(port.stage_name(), port.input_name(), what),
            None => trace_violation("", "", what),
        }
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap()
    }
}

impl Frame for FrameProxy {
    fn data(&self) -> &FrameData {
        &self.data
    }

    fn lock(&self) {
        let port = self.port.upgrade();
        let _frame = port.as_deref().and_then(VideoInner::hold_frame);

        let original = {
            let mut link = self.link();
            let Some(original) = link.original.clone() else {
                drop(link);
                self.violation("lock on a restored frame");
                debug_assert!(false, "lock on a restored frame proxy");
                return;
            };
            link.lock_count += 1;
            original
        };
        self.forward_to(&original, |original| original.lock());
    }

    fn free(self: Arc<Self>) {
        let port = self.port.upgrade();
        let frame = port.as_deref().and_then(VideoInner::hold_frame);

        let (original, remaining) = {
            let mut link = self.link();
            let Some(original) = link.original.clone() else {
                drop(link);
                self.violation("free without a matching lock");
                debug_assert!(false, "free on a restored frame proxy");
                return;
            };
            let Some(remaining) = link.lock_count.checked_sub(1) else {
                drop(link);
                self.violation("free with no outstanding references");
                debug_assert!(false, "free with no outstanding references on a frame proxy");
                return;
            };
            link.lock_count = remaining;
            (original, remaining)
        };

        if remaining > 0 {
            // Still referenced elsewhere
            self.forward_to(&original, |original| Arc::clone(original).free());
            return;
        }
        drop(original);

        if let Some(original) = self.restore() {
            original.dispose();
        }
        drop(frame);
        self.retire(port);
    }

    fn dispose(self: Arc<Self>) {
        let port = self.port.upgrade();
        let frame = port.as_deref().and_then(VideoInner::hold_frame);

        let outstanding = {
            let mut link = self.link();
            if link.original.is_none() {
                drop(link);
                self.violation("dispose on a restored frame");
                debug_assert!(false, "dispose on a restored frame proxy");
                return;
            }
            std::mem::replace(&mut link.lock_count, 0)
        };
        if outstanding > 1 {
            self.violation("disposed with outstanding references");
            debug_assert!(
                false,
                "dispose on a frame proxy with {outstanding} outstanding references"
            );
        }

        if let Some(original) = self.restore() {
            original.dispose();
        }
        drop(frame);
        self.retire(port);
    }

    fn render(&self, stream: Option<&StreamRef>) -> Result<u32> {
        match self.port.upgrade() {
            Some(port) => port.hooks().render(self, stream),
            None => self.forward_render(stream),
        }
    }

    fn field(&self, parity: FieldParity) {
        match self.port.upgrade() {
            Some(port) => port.hooks().field(self, parity),
            None => self.forward_field(parity),
        }
    }

    fn preprocess(&self) -> Preprocess {
        self.link().preprocess
    }

    fn proc_frame(&self) {
        if self.preprocess().frame {
            let _ = self.forward(|original| original.proc_frame());
        }
    }

    fn proc_slice(&self, planes: &[&[u8]]) {
        if self.preprocess().slice {
            let _ = self.forward(|original| original.proc_slice(planes));
        }
    }
}

impl std::fmt::Debug for FrameProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let link = self.link();
        f.debug_struct("FrameProxy")
            .field("slot", &self.slot)
            .field("attached", &link.original.is_some())
            .field("lock_count", &link.lock_count)
            .finish()
    }
}
