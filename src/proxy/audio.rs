//! Audio port proxy.
//!
//! Sample buffers are forwarded, not wrapped: an audio buffer is plain data
//! owned by whoever holds it, so only sessions count as usage.

use super::hooks::AudioHooks;
use super::usage::UsageCounter;
use super::{PortSetup, StageInner, hold};
use crate::error::{Error, Result};
use crate::frame::StreamRef;
use crate::observability::{PortMetrics, record_rewire, span_rewire, trace_violation};
use crate::port::{AudioBuffer, AudioFormat, AudioPort, AudioPortRef, AudioStatus};
use crate::ticket::Ticket;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// An audio port decorating a swappable original port.
#[derive(Clone)]
pub struct AudioPortProxy {
    inner: Arc<AudioInner>,
}

pub(crate) struct AudioInner {
    input: String,
    output: String,
    stage_name: String,
    stage: Weak<StageInner>,
    ticket: Arc<Ticket>,
    original: RwLock<AudioPortRef>,
    session: Mutex<AudioSession>,
    hooks: Arc<dyn AudioHooks>,
    usage: UsageCounter,
    port_lock: Option<Mutex<()>>,
    metrics: PortMetrics,
    rewire_timeout: Option<Duration>,
}

/// Parameters of the open session, replayed on the new port when rewiring.
#[derive(Debug, Clone, Default)]
struct AudioSession {
    open: bool,
    stream: Option<StreamRef>,
    format: AudioFormat,
}

impl AudioInner {
    pub(crate) fn new(
        setup: PortSetup<'_>,
        original: AudioPortRef,
        hooks: Arc<dyn AudioHooks>,
    ) -> Arc<Self> {
        let input = setup.input_name("audio");
        let output = setup.output_name("audio");

        Arc::new(Self {
            metrics: PortMetrics::new(&setup.config.name, &input),
            stage_name: setup.config.name.clone(),
            stage: setup.stage.clone(),
            ticket: Arc::clone(setup.ticket),
            original: RwLock::new(original),
            session: Mutex::new(AudioSession::default()),
            hooks,
            usage: UsageCounter::new(),
            port_lock: setup.config.locks.port.then(|| Mutex::new(())),
            rewire_timeout: setup.config.rewire_timeout,
            input,
            output,
        })
    }

    pub(crate) fn handle(self: &Arc<Self>) -> AudioPortProxy {
        AudioPortProxy {
            inner: Arc::clone(self),
        }
    }

    pub(crate) fn input_name(&self) -> &str {
        &self.input
    }

    pub(crate) fn output_name(&self) -> &str {
        &self.output
    }

    pub(crate) fn usage(&self) -> &UsageCounter {
        &self.usage
    }

    pub(crate) fn original(&self) -> AudioPortRef {
        Arc::clone(&self.original.read().unwrap())
    }

    fn session(&self) -> MutexGuard<'_, AudioSession> {
        self.session.lock().unwrap()
    }

    fn admit_session(&self) -> Result<()> {
        self.usage.increment_unless(|| match self.stage.upgrade() {
            Some(stage) => stage.check_open(),
            None => Ok(()),
        })
    }

    fn release_usage(&self) {
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

    pub(crate) fn rewire(&self, target: AudioPortRef) -> Result<()> {
        let _span = span_rewire(&self.stage_name, &self.output).entered();
        let rewiring = self.ticket.lock_rewiring(self.rewire_timeout)?;
        let quiesced = self.ticket.quiesce();
        info!(stage = %self.stage_name, output = %self.output, "rewiring");

        let old = self.original();
        let session = self.session().clone();
        if old.status(session.stream.as_ref()).open {
            if let Err(source) = target.open(session.stream.as_ref(), session.format) {
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
            old.close(session.stream.as_ref());
        }

        *self.original.write().unwrap() = target;

        drop(quiesced);
        drop(rewiring);

        record_rewire(&self.stage_name, &self.output);
        info!(stage = %self.stage_name, output = %self.output, "rewired");
        Ok(())
    }
}

impl AudioPortProxy {
    /// Input name of this port.
    pub fn name(&self) -> &str {
        self.inner.input_name()
    }

    /// Name of the output that feeds the original port.
    pub fn output_name(&self) -> &str {
        self.inner.output_name()
    }

    /// The port currently wired as original.
    pub fn original(&self) -> AudioPortRef {
        self.inner.original()
    }

    /// Replace the original port while the pipeline runs.
    pub fn rewire(&self, target: AudioPortRef) -> Result<()> {
        self.inner.rewire(target)
    }

    /// Open sessions.
    pub fn usage(&self) -> usize {
        self.inner.usage.get()
    }

    /// Clamped usage decrements observed.
    pub fn usage_underflows(&self) -> u64 {
        self.inner.usage.underflows()
    }

    /// Format recorded by the last successful `open`.
    pub fn format(&self) -> AudioFormat {
        self.inner.session().format
    }

    /// Forward a filled buffer to the original port.
    pub fn forward_put_buffer(&self, buffer: AudioBuffer, stream: Option<&StreamRef>) {
        let (original, _port) = self.port();
        original.put_buffer(buffer, stream);
    }

    /// Share this proxy as a plain port handle.
    pub fn into_ref(self) -> AudioPortRef {
        Arc::new(self)
    }

    fn port(&self) -> (AudioPortRef, Option<MutexGuard<'_, ()>>) {
        (self.inner.original(), hold(&self.inner.port_lock))
    }
}

impl AudioPort for AudioPortProxy {
    fn capabilities(&self) -> u32 {
        let (original, _port) = self.port();
        original.capabilities()
    }

    fn open(&self, stream: Option<&StreamRef>, format: AudioFormat) -> Result<u32> {
        let inner = &self.inner;
        inner.ticket.checkpoint();
        let _admitted = inner.ticket.acquire();

        inner.admit_session()?;

        let opened = {
            let (original, _port) = self.port();
            original.open(stream, format)
        };
        let rate = match opened {
            Ok(rate) => rate,
            Err(err) => {
                inner.release_usage();
                return Err(err);
            }
        };

        *inner.session() = AudioSession {
            open: true,
            stream: stream.cloned(),
            format,
        };
        inner.hooks.opened(stream, format);
        debug!(
            stage = %inner.stage_name,
            port = %inner.input,
            bits = format.bits,
            rate = format.rate,
            mode = format.mode,
            "session opened"
        );
        Ok(rate)
    }

    fn get_buffer(&self) -> Option<AudioBuffer> {
        let inner = &self.inner;
        inner.ticket.checkpoint();
        let _admitted = inner.ticket.acquire();

        let (original, _port) = self.port();
        original.get_buffer()
    }

    fn put_buffer(&self, buffer: AudioBuffer, stream: Option<&StreamRef>) {
        let _admitted = self.inner.ticket.acquire();
        let hooks = Arc::clone(&self.inner.hooks);
        hooks.put_buffer(self, buffer, stream);
    }

    fn close(&self, stream: Option<&StreamRef>) {
        let inner = &self.inner;
        let admitted = inner.ticket.acquire();
        {
            let (original, _port) = self.port();
            original.close(stream);
        }

        {
            let mut session = inner.session();
            session.open = false;
            session.stream = None;
        }
        inner.hooks.closed(stream);
        drop(admitted);
        debug!(stage = %inner.stage_name, port = %inner.input, "session closed");
        inner.release_usage();
    }

    fn exit(&self) {
        let (original, _port) = self.port();
        original.exit();
    }

    fn get_property(&self, property: i32) -> i32 {
        let (original, _port) = self.port();
        original.get_property(property)
    }

    fn set_property(&self, property: i32, value: i32) -> i32 {
        let (original, _port) = self.port();
        original.set_property(property, value)
    }

    fn control(&self, command: i32, arg: i32) -> i32 {
        let (original, _port) = self.port();
        original.control(command, arg)
    }

    fn flush(&self) {
        let (original, _port) = self.port();
        original.flush();
    }

    fn status(&self, stream: Option<&StreamRef>) -> AudioStatus {
        let mut status = {
            let (original, _port) = self.port();
            original.status(stream)
        };

        let session = self.inner.session();
        if session.open {
            status.format = session.format;
        }
        status
    }
}

impl std::fmt::Debug for AudioPortProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPortProxy")
            .field("stage", &self.inner.stage_name)
            .field("input", &self.inner.input)
            .field("output", &self.inner.output)
            .field("usage", &self.inner.usage.get())
            .finish()
    }
}
