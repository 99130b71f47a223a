use super::Counter;
use crate::error::{Error, Result};
use crate::frame::StreamRef;
use crate::port::{AudioBuffer, AudioFormat, AudioPort, AudioStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Size of buffers handed out by [`TestAudioPort::get_buffer`].
const BUFFER_BYTES: usize = 4096;

#[derive(Default)]
struct AudioState {
    open: bool,
    stream: Option<StreamRef>,
    format: AudioFormat,
    fail_open: bool,
    properties: HashMap<i32, i32>,
}

/// An in-memory audio output.
pub struct TestAudioPort {
    label: String,
    state: Mutex<AudioState>,
    opens: Counter,
    closes: Counter,
    buffers_put: Counter,
    controls: Counter,
}

impl TestAudioPort {
    /// Create a port; `label` names it in failures.
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            state: Mutex::new(AudioState::default()),
            opens: Counter::default(),
            closes: Counter::default(),
            buffers_put: Counter::default(),
            controls: Counter::default(),
        })
    }

    /// Make `open` fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    /// Whether a session is open.
    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Format of the open session.
    pub fn format(&self) -> AudioFormat {
        self.state().format
    }

    /// Stream of the open session.
    pub fn session_stream(&self) -> Option<StreamRef> {
        self.state().stream.clone()
    }

    /// Successful `open` calls.
    pub fn opens(&self) -> u64 {
        self.opens.get()
    }

    /// `close` calls.
    pub fn closes(&self) -> u64 {
        self.closes.get()
    }

    /// Buffers queued.
    pub fn buffers_put(&self) -> u64 {
        self.buffers_put.get()
    }

    /// `control` calls.
    pub fn controls(&self) -> u64 {
        self.controls.get()
    }

    fn state(&self) -> MutexGuard<'_, AudioState> {
        self.state.lock().unwrap()
    }
}

impl AudioPort for TestAudioPort {
    fn capabilities(&self) -> u32 {
        0
    }

    fn open(&self, stream: Option<&StreamRef>, format: AudioFormat) -> Result<u32> {
        let mut state = self.state();
        if state.fail_open {
            return Err(Error::port(format!("{} refused to open", self.label)));
        }
        state.open = true;
        state.stream = stream.cloned();
        state.format = format;
        self.opens.bump();
        Ok(format.rate)
    }

    fn get_buffer(&self) -> Option<AudioBuffer> {
        let format = self.state().format;
        Some(AudioBuffer {
            format,
            ..AudioBuffer::with_capacity(BUFFER_BYTES)
        })
    }

    fn put_buffer(&self, _buffer: AudioBuffer, _stream: Option<&StreamRef>) {
        self.buffers_put.bump();
    }

    fn close(&self, _stream: Option<&StreamRef>) {
        let mut state = self.state();
        state.open = false;
        state.stream = None;
        self.closes.bump();
    }

    fn exit(&self) {}

    fn get_property(&self, property: i32) -> i32 {
        self.state().properties.get(&property).copied().unwrap_or(0)
    }

    fn set_property(&self, property: i32, value: i32) -> i32 {
        self.state().properties.insert(property, value);
        value
    }

    fn control(&self, _command: i32, _arg: i32) -> i32 {
        self.controls.bump();
        0
    }

    fn flush(&self) {}

    fn status(&self, _stream: Option<&StreamRef>) -> AudioStatus {
        let state = self.state();
        AudioStatus {
            open: state.open,
            format: state.format,
        }
    }
}

impl std::fmt::Debug for TestAudioPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestAudioPort")
            .field("label", &self.label)
            .finish()
    }
}
