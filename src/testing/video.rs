use super::Counter;
use crate::error::{Error, Result};
use crate::frame::{
    FieldParity, Frame, FrameData, FrameFields, FrameRef, Preprocess, StreamRef,
};
use crate::port::{FrameRequest, OverlayManagerRef, VideoPort, VideoStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Capability bits reported by [`TestVideoPort`].
pub const TEST_CAPABILITIES: u32 = 0x0001;

/// Added to a frame's `pts` to produce its `vpts` when rendered.
pub const RENDER_VPTS_OFFSET: i64 = 1_000;

#[derive(Debug, Default)]
struct VideoStats {
    opens: Counter,
    closes: Counter,
    exits: Counter,
    flushes: Counter,
    frames_issued: Counter,
    frames_disposed: Counter,
    frame_locks: Counter,
    frame_frees: Counter,
    renders: Counter,
    fields: Counter,
    proc_frames: Counter,
    proc_slices: Counter,
    last_pts: AtomicI64,
}

#[derive(Default)]
struct VideoState {
    open: bool,
    stream: Option<StreamRef>,
    fail_open: bool,
    refuse_frames: bool,
    preprocess: Preprocess,
    overlay: Option<OverlayManagerRef>,
    overlay_enabled: bool,
    properties: HashMap<i32, i32>,
    width: u32,
    height: u32,
}

/// A frame produced by [`TestVideoPort`].
///
/// Keeps its own reference count: `free` at zero disposes the frame.
pub struct TestFrame {
    data: FrameData,
    refs: AtomicUsize,
    preprocess: Preprocess,
    stats: Arc<VideoStats>,
}

impl TestFrame {
    /// Outstanding references.
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }
}

impl Frame for TestFrame {
    fn data(&self) -> &FrameData {
        &self.data
    }

    fn lock(&self) {
        self.stats.frame_locks.bump();
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    fn free(self: Arc<Self>) {
        self.stats.frame_frees.bump();
        if self.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.dispose();
        }
    }

    fn dispose(self: Arc<Self>) {
        self.stats.frames_disposed.bump();
    }

    fn render(&self, _stream: Option<&StreamRef>) -> Result<u32> {
        let mut fields = self.data.fields();
        fields.vpts = fields.pts + RENDER_VPTS_OFFSET;
        self.stats.last_pts.store(fields.pts, Ordering::SeqCst);
        self.stats.renders.bump();
        Ok(0)
    }

    fn field(&self, _parity: FieldParity) {
        self.stats.fields.bump();
    }

    fn preprocess(&self) -> Preprocess {
        self.preprocess
    }

    fn proc_frame(&self) {
        self.stats.proc_frames.bump();
    }

    fn proc_slice(&self, _planes: &[&[u8]]) {
        self.stats.proc_slices.bump();
    }
}

/// An in-memory video output.
pub struct TestVideoPort {
    label: String,
    stats: Arc<VideoStats>,
    state: Mutex<VideoState>,
}

impl TestVideoPort {
    /// Create a port; `label` names it in failures.
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            stats: Arc::new(VideoStats::default()),
            state: Mutex::new(VideoState::default()),
        })
    }

    /// Port label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Make `open` fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    /// Make `get_frame` return `None`.
    pub fn set_refuse_frames(&self, refuse: bool) {
        self.state().refuse_frames = refuse;
    }

    /// Preprocessing hooks of frames produced from now on.
    pub fn set_preprocess(&self, preprocess: Preprocess) {
        self.state().preprocess = preprocess;
    }

    /// Overlay manager reported by the port.
    pub fn set_overlay_manager(&self, manager: Option<OverlayManagerRef>) {
        self.state().overlay = manager;
    }

    /// Whether a session is open.
    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Stream of the open session.
    pub fn session_stream(&self) -> Option<StreamRef> {
        self.state().stream.clone()
    }

    /// Whether overlay blending is enabled.
    pub fn overlay_enabled(&self) -> bool {
        self.state().overlay_enabled
    }

    /// Successful `open` calls.
    pub fn opens(&self) -> u64 {
        self.stats.opens.get()
    }

    /// `close` calls.
    pub fn closes(&self) -> u64 {
        self.stats.closes.get()
    }

    /// `exit` calls.
    pub fn exits(&self) -> u64 {
        self.stats.exits.get()
    }

    /// `flush` calls.
    pub fn flushes(&self) -> u64 {
        self.stats.flushes.get()
    }

    /// Frames handed out.
    pub fn frames_issued(&self) -> u64 {
        self.stats.frames_issued.get()
    }

    /// Frames disposed.
    pub fn frames_disposed(&self) -> u64 {
        self.stats.frames_disposed.get()
    }

    /// Frames handed out and not yet disposed.
    pub fn frames_outstanding(&self) -> u64 {
        self.frames_issued() - self.frames_disposed()
    }

    /// `lock` calls on this port's frames.
    pub fn frame_locks(&self) -> u64 {
        self.stats.frame_locks.get()
    }

    /// `free` calls on this port's frames.
    pub fn frame_frees(&self) -> u64 {
        self.stats.frame_frees.get()
    }

    /// Frames rendered.
    pub fn frames_rendered(&self) -> u64 {
        self.stats.renders.get()
    }

    /// `field` calls on this port's frames.
    pub fn fields_selected(&self) -> u64 {
        self.stats.fields.get()
    }

    /// `proc_frame` calls on this port's frames.
    pub fn proc_frames(&self) -> u64 {
        self.stats.proc_frames.get()
    }

    /// `proc_slice` calls on this port's frames.
    pub fn proc_slices(&self) -> u64 {
        self.stats.proc_slices.get()
    }

    /// `pts` of the last rendered frame.
    pub fn last_pts(&self) -> i64 {
        self.stats.last_pts.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, VideoState> {
        self.state.lock().unwrap()
    }
}

impl VideoPort for TestVideoPort {
    fn capabilities(&self) -> u32 {
        TEST_CAPABILITIES
    }

    fn open(&self, stream: Option<&StreamRef>) -> Result<()> {
        let mut state = self.state();
        if state.fail_open {
            return Err(Error::port(format!("{} refused to open", self.label)));
        }
        state.open = true;
        state.stream = stream.cloned();
        self.stats.opens.bump();
        Ok(())
    }

    fn get_frame(&self, request: &FrameRequest) -> Option<FrameRef> {
        let mut state = self.state();
        if state.refuse_frames {
            return None;
        }
        state.width = request.width;
        state.height = request.height;

        let frame = TestFrame {
            data: FrameData::new(FrameFields::with_geometry(
                request.width,
                request.height,
                request.ratio,
                request.format,
                request.flags,
            )),
            refs: AtomicUsize::new(1),
            preprocess: state.preprocess,
            stats: Arc::clone(&self.stats),
        };
        self.stats.frames_issued.bump();
        Some(Arc::new(frame))
    }

    fn last_frame(&self) -> Option<FrameRef> {
        None
    }

    fn enable_overlay(&self, enabled: bool) {
        self.state().overlay_enabled = enabled;
    }

    fn close(&self, _stream: Option<&StreamRef>) {
        let mut state = self.state();
        state.open = false;
        state.stream = None;
        self.stats.closes.bump();
    }

    fn exit(&self) {
        self.stats.exits.bump();
    }

    fn overlay_manager(&self) -> Option<OverlayManagerRef> {
        self.state().overlay.clone()
    }

    fn flush(&self) {
        self.stats.flushes.bump();
    }

    fn trigger_drawing(&self) {}

    fn status(&self, _stream: Option<&StreamRef>) -> VideoStatus {
        let state = self.state();
        VideoStatus {
            open: state.open,
            width: state.width,
            height: state.height,
            img_duration: 0,
        }
    }

    fn get_property(&self, property: i32) -> i32 {
        self.state().properties.get(&property).copied().unwrap_or(0)
    }

    fn set_property(&self, property: i32, value: i32) -> i32 {
        self.state().properties.insert(property, value);
        value
    }
}

impl std::fmt::Debug for TestVideoPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestVideoPort")
            .field("label", &self.label)
            .field("frames_outstanding", &self.frames_outstanding())
            .finish()
    }
}
