//! Video port proxy.

use super::frame::FrameProxy;
use super::hooks::VideoHooks;
use super::overlay::OverlayManagerProxy;
use super::pool::FramePool;
use super::usage::UsageCounter;
use super::{PortSetup, StageInner, hold};
use crate::error::{Error, Result};
use crate::frame::{FrameRef, Preprocess, StreamRef};
use crate::observability::{
    PortMetrics, record_rewire, span_rewire, trace_intercept, trace_restore, trace_violation,
};
use crate::port::{
    FrameRequest, OverlayManagerRef, VideoPort, VideoPortRef, VideoStatus,
};
use crate::ticket::Ticket;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A video port decorating a swappable original port.
///
/// Producers open and pull frames from the proxy exactly as from a real
/// port. Admitted frames are wrapped in [`FrameProxy`]s drawn from the
/// port's pool; the original port is replaced with [`rewire`](Self::rewire).
///
/// The handle is cheap to clone; all clones share the same proxy.
#[derive(Clone)]
pub struct VideoPortProxy {
    inner: Arc<VideoInner>,
}

pub(crate) struct VideoInner {
    input: String,
    output: String,
    stage_name: String,
    stage: Weak<StageInner>,
    ticket: Arc<Ticket>,
    original: RwLock<VideoPortRef>,
    /// Stream of the open session, reused when rewiring.
    session: Mutex<Option<StreamRef>>,
    hooks: Arc<dyn VideoHooks>,
    pool: FramePool<FrameProxy>,
    usage: UsageCounter,
    port_lock: Option<Mutex<()>>,
    frame_lock: Option<Mutex<()>>,
    manager_lock: bool,
    overlay: OnceLock<Arc<OverlayManagerProxy>>,
    metrics: PortMetrics,
    rewire_timeout: Option<Duration>,
    this: Weak<VideoInner>,
}

impl VideoInner {
    pub(crate) fn new(
        setup: PortSetup<'_>,
        original: VideoPortRef,
        hooks: Arc<dyn VideoHooks>,
    ) -> Arc<Self> {
        let input = setup.input_name("video");
        let output = setup.output_name("video");
        let locks = setup.config.locks;

        Arc::new_cyclic(|this: &Weak<VideoInner>| {
            let pool = FramePool::new();
            pool.prealloc(setup.config.pool_prealloc, |slot| {
                FrameProxy::new(slot, this.clone())
            });

            let metrics = PortMetrics::new(&setup.config.name, &input);
            metrics.record_pool_slots(pool.len());

            Self {
                stage_name: setup.config.name.clone(),
                stage: setup.stage.clone(),
                ticket: Arc::clone(setup.ticket),
                original: RwLock::new(original),
                session: Mutex::new(None),
                hooks,
                pool,
                usage: UsageCounter::new(),
                port_lock: locks.port.then(|| Mutex::new(())),
                frame_lock: locks.frame.then(|| Mutex::new(())),
                manager_lock: locks.manager,
                overlay: OnceLock::new(),
                metrics,
                rewire_timeout: setup.config.rewire_timeout,
                this: this.clone(),
                input,
                output,
            }
        })
    }

    pub(crate) fn handle(self: &Arc<Self>) -> VideoPortProxy {
        VideoPortProxy {
            inner: Arc::clone(self),
        }
    }

    pub(crate) fn input_name(&self) -> &str {
        &self.input
    }

    pub(crate) fn output_name(&self) -> &str {
        &self.output
    }

    pub(crate) fn stage_name(&self) -> &str {
        &self.stage_name
    }

    pub(crate) fn hooks(&self) -> &dyn VideoHooks {
        self.hooks.as_ref()
    }

    pub(crate) fn usage(&self) -> &UsageCounter {
        &self.usage
    }

    pub(crate) fn pool(&self) -> &FramePool<FrameProxy> {
        &self.pool
    }

    pub(crate) fn metrics(&self) -> &PortMetrics {
        &self.metrics
    }

    pub(crate) fn hold_frame(&self) -> Option<MutexGuard<'_, ()>> {
        hold(&self.frame_lock)
    }

    pub(crate) fn original(&self) -> VideoPortRef {
        Arc::clone(&self.original.read().unwrap())
    }

    /// Count a new session unless the stage refuses it.
    fn admit_session(&self) -> Result<()> {
        self.usage.increment_unless(|| match self.stage.upgrade() {
            Some(stage) => stage.check_open(),
            None => Ok(()),
        })
    }

    /// Drop one usage reference, retrying a pending disposal at zero.
    pub(crate) fn release_usage(&self) {
        match self.usage.decrement() {
            None => {
                trace_violation(&self.stage_name, &self.input, "usage released below zero");
                self.metrics.record_underflow();
            }
            Some(0) => {
                if let Some(stage) = self.stage.upgrade() {
                    if stage.is_dispose_pending() {
                        stage.try_dispose();
                    }
                }
            }
            Some(_) => {}
        }
    }

    /// Wrap a frame from the original port.
    fn intercept(&self, original: FrameRef) -> FrameRef {
        let _frame = self.hold_frame();

        let mut preprocess = original.preprocess();
        if self.hooks.overrides_render() && !self.hooks.route_preprocessing() {
            preprocess = Preprocess::NONE;
        }

        let (slot, proxy) = self
            .pool
            .acquire(|slot| FrameProxy::new(slot, self.this.clone()));
        proxy.attach(original, preprocess);
        self.usage.increment();

        self.metrics.record_intercepted();
        self.metrics.record_pool_slots(self.pool.len());
        trace_intercept(&self.stage_name, &self.input, slot);

        proxy
    }

    /// A restored frame proxy has released its slot.
    pub(crate) fn restored(&self, slot: usize) {
        self.pool.release(slot);
        self.metrics.record_restored();
        trace_restore(&self.stage_name, &self.input, slot);
        self.release_usage();
    }

    pub(crate) fn rewire(&self, target: VideoPortRef) -> Result<()> {
        let _span = span_rewire(&self.stage_name, &self.output).entered();
        let rewiring = self.ticket.lock_rewiring(self.rewire_timeout)?;
        let quiesced = self.ticket.quiesce();
        info!(stage = %self.stage_name, output = %self.output, "rewiring");

        let old = self.original();
        let stream = self.session.lock().unwrap().clone();
        if old.status(stream.as_ref()).open {
            if let Err(source) = target.open(stream.as_ref()) {
                warn!(
                    stage = %self.stage_name,
                    output = %self.output,
                    error = %source,
                    "rewire target refused to open; keeping current port"
                );
                return Err(Error::RewireFailed {
                    output: self.output.clone(),
                    source: Box::new(source),
                });
            }
            old.close(stream.as_ref());
        }

        *self.original.write().unwrap() = target;
        if let Some(overlay) = self.overlay.get() {
            overlay.mark_stale();
        }

        drop(quiesced);
        drop(rewiring);

        record_rewire(&self.stage_name, &self.output);
        info!(stage = %self.stage_name, output = %self.output, "rewired");
        Ok(())
    }
}

impl VideoPortProxy {
    /// Input name of this port.
    pub fn name(&self) -> &str {
        self.inner.input_name()
    }

    /// Name of the output that feeds the original port.
    pub fn output_name(&self) -> &str {
        self.inner.output_name()
    }

    /// The port currently wired as original.
    pub fn original(&self) -> VideoPortRef {
        self.inner.original()
    }

    /// Replace the original port while the pipeline runs.
    ///
    /// Traffic on the shared ticket is quiesced for the swap. If a session is
    /// open it is opened on `target` and closed on the old port; frames
    /// already handed out keep their link to frames of the old port.
    pub fn rewire(&self, target: VideoPortRef) -> Result<()> {
        self.inner.rewire(target)
    }

    /// Open sessions plus intercepted frames still alive.
    pub fn usage(&self) -> usize {
        self.inner.usage.get()
    }

    /// Clamped usage decrements observed.
    pub fn usage_underflows(&self) -> u64 {
        self.inner.usage.underflows()
    }

    /// Frame proxies allocated by this port.
    pub fn pool_len(&self) -> usize {
        self.inner.pool.len()
    }

    /// Frame proxies ready for reuse.
    pub fn pool_available(&self) -> usize {
        self.inner.pool.available()
    }

    /// The overlay manager proxy, if one was created.
    pub fn overlay_proxy(&self) -> Option<Arc<OverlayManagerProxy>> {
        self.inner.overlay.get().cloned()
    }

    /// Share this proxy as a plain port handle.
    pub fn into_ref(self) -> VideoPortRef {
        Arc::new(self)
    }

    fn port(&self) -> (VideoPortRef, Option<MutexGuard<'_, ()>>) {
        (self.inner.original(), hold(&self.inner.port_lock))
    }
}

impl VideoPort for VideoPortProxy {
    fn capabilities(&self) -> u32 {
        let (original, _port) = self.port();
        original.capabilities()
    }

    fn open(&self, stream: Option<&StreamRef>) -> Result<()> {
        let inner = &self.inner;
        inner.ticket.checkpoint();
        let _admitted = inner.ticket.acquire();

        inner.admit_session()?;

        let opened = {
            let (original, _port) = self.port();
            original.open(stream)
        };
        if let Err(err) = opened {
            inner.release_usage();
            return Err(err);
        }

        *inner.session.lock().unwrap() = stream.cloned();
        inner.hooks.opened(stream);
        debug!(stage = %inner.stage_name, port = %inner.input, "session opened");
        Ok(())
    }

    fn get_frame(&self, request: &FrameRequest) -> Option<FrameRef> {
        let inner = &self.inner;
        inner.ticket.checkpoint();
        let _admitted = inner.ticket.acquire();

        let frame = {
            let (original, _port) = self.port();
            original.get_frame(request)
        }?;

        if !inner.hooks.intercept_frame(&frame) {
            return Some(frame);
        }
        Some(inner.intercept(frame))
    }

    fn last_frame(&self) -> Option<FrameRef> {
        let (original, _port) = self.port();
        original.last_frame()
    }

    fn enable_overlay(&self, enabled: bool) {
        let (original, _port) = self.port();
        original.enable_overlay(enabled);
    }

    fn close(&self, stream: Option<&StreamRef>) {
        let inner = &self.inner;
        let admitted = inner.ticket.acquire();
        {
            let (original, _port) = self.port();
            original.close(stream);
        }

        inner.session.lock().unwrap().take();
        inner.hooks.closed(stream);
        drop(admitted);
        debug!(stage = %inner.stage_name, port = %inner.input, "session closed");
        inner.release_usage();
    }

    fn exit(&self) {
        let (original, _port) = self.port();
        original.exit();
    }

    fn overlay_manager(&self) -> Option<OverlayManagerRef> {
        let inner = &self.inner;
        let reported = {
            let (original, _port) = self.port();
            original.overlay_manager()
        }?;

        if !inner.hooks.intercept_overlay() {
            return Some(reported);
        }

        let proxy = inner.overlay.get_or_init(|| {
            Arc::new(OverlayManagerProxy::new(
                inner.this.clone(),
                Arc::clone(&inner.hooks),
                inner.manager_lock,
                Arc::clone(&reported),
            ))
        });
        proxy.sync(&reported);
        Some(Arc::clone(proxy) as OverlayManagerRef)
    }

    fn flush(&self) {
        let (original, _port) = self.port();
        original.flush();
    }

    fn trigger_drawing(&self) {
        let (original, _port) = self.port();
        original.trigger_drawing();
    }

    fn status(&self, stream: Option<&StreamRef>) -> VideoStatus {
        let (original, _port) = self.port();
        original.status(stream)
    }

    fn get_property(&self, property: i32) -> i32 {
        let (original, _port) = self.port();
        original.get_property(property)
    }

    fn set_property(&self, property: i32, value: i32) -> i32 {
        let (original, _port) = self.port();
        original.set_property(property, value)
    }
}

impl std::fmt::Debug for VideoPortProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoPortProxy")
            .field("stage", &self.inner.stage_name)
            .field("input", &self.inner.input)
            .field("output", &self.inner.output)
            .field("usage", &self.inner.usage.get())
            .finish()
    }
}
