//! The interception layer: stages, port proxies and frame proxies.
//!
//! A [`Stage`] is a processing step inserted in front of one or more output
//! ports. For every port it wraps, it exposes a proxy implementing the same
//! contract: producers open the proxy instead of the port, and frames they
//! pull are wrapped in [`FrameProxy`]s drawn from a per-port [`FramePool`].
//! The stage customizes behavior through [`VideoHooks`] and [`AudioHooks`].
//!
//! # Wiring
//!
//! Each proxied port is a named input (`"video in"`, `"audio in"`, numbered
//! from the second port of a kind on: `"video in 1"`) and a named output
//! (`"video out"`, ...). An output can be rewired to a different port while
//! the pipeline runs; the swap happens with traffic on the shared
//! [`Ticket`] quiesced.
//!
//! # Disposal
//!
//! Sessions and intercepted frames keep a usage count per port. A disposal
//! request is recorded on the stage and completes only once every count is
//! zero; until then new sessions are refused, and the last release retries
//! the disposal.
//!
//! # Example
//!
//! ```rust
//! use interpose::config::StageConfig;
//! use interpose::frame::Frame;
//! use interpose::port::{FrameRequest, VideoPort};
//! use interpose::proxy::{DefaultHooks, Disposal, Stage};
//! use interpose::testing::TestVideoPort;
//! use interpose::ticket::Ticket;
//! use std::sync::Arc;
//!
//! let output = TestVideoPort::new("output");
//! let stage = Stage::builder(StageConfig::new("example"), Arc::new(Ticket::new()))
//!     .video(output.clone(), Arc::new(DefaultHooks))
//!     .build();
//!
//! let port = stage.video_port(0).unwrap();
//! port.open(None).unwrap();
//! let frame = port.get_frame(&FrameRequest::new(64, 48)).unwrap();
//! frame.free();
//! port.close(None);
//!
//! assert_eq!(output.frames_disposed(), 1);
//! assert_eq!(stage.dispose(), Disposal::Complete);
//! ```

mod audio;
mod frame;
mod hooks;
mod overlay;
mod pool;
mod usage;
mod video;

pub use audio::AudioPortProxy;
pub use frame::FrameProxy;
pub use hooks::{AudioHooks, DefaultHooks, VideoHooks};
pub use overlay::OverlayManagerProxy;
pub use pool::FramePool;
pub use usage::UsageCounter;
pub use video::VideoPortProxy;

use crate::config::StageConfig;
use crate::error::{Error, Result};
use crate::observability::{instrument_dispose, record_disposal_deferred, span_stage};
use crate::port::{AudioPortRef, PortKind, Target, VideoPortRef};
use crate::ticket::Ticket;
use audio::AudioInner;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{info, warn};
use video::VideoInner;

/// Usage locks held across a disposal attempt; stages rarely wrap more than
/// a couple of ports per kind.
type UsageGuards<'a> = SmallVec<[MutexGuard<'a, usize>; 2]>;

/// Take an optional serialization lock.
pub(crate) fn hold(lock: &Option<Mutex<()>>) -> Option<MutexGuard<'_, ()>> {
    lock.as_ref().map(|lock| lock.lock().unwrap())
}

/// Outcome of a disposal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    /// The stage released its pools and wiring.
    Complete,
    /// Ports are still in use; the request stays recorded.
    Deferred {
        /// Sum of all usage counts at the time of the attempt.
        in_use: usize,
    },
}

impl Disposal {
    /// Whether the disposal completed.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Everything a port proxy needs from the stage it belongs to.
#[derive(Clone, Copy)]
pub(crate) struct PortSetup<'a> {
    stage: &'a Weak<StageInner>,
    ticket: &'a Arc<Ticket>,
    config: &'a StageConfig,
    index: usize,
}

impl PortSetup<'_> {
    fn input_name(&self, kind: &str) -> String {
        port_name(kind, "in", self.index)
    }

    fn output_name(&self, kind: &str) -> String {
        port_name(kind, "out", self.index)
    }
}

fn port_name(kind: &str, direction: &str, index: usize) -> String {
    match index {
        0 => format!("{kind} {direction}"),
        n => format!("{kind} {direction} {n}"),
    }
}

struct Input {
    name: String,
    target: Target,
}

struct Output {
    name: String,
    kind: PortKind,
    index: usize,
}

#[derive(Default)]
struct StageIo {
    inputs: Vec<Input>,
    outputs: Vec<Output>,
}

pub(crate) struct StageInner {
    name: String,
    video: Vec<Arc<VideoInner>>,
    audio: Vec<Arc<AudioInner>>,
    io: Mutex<StageIo>,
    dispose_pending: AtomicBool,
    disposed: AtomicBool,
}

impl StageInner {
    /// Refuse new sessions once disposal was requested.
    ///
    /// Called under the port's usage lock.
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed {
                stage: self.name.clone(),
            });
        }
        if self.dispose_pending.load(Ordering::Acquire) {
            return Err(Error::DisposalPending {
                stage: self.name.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn is_dispose_pending(&self) -> bool {
        self.dispose_pending.load(Ordering::Acquire)
    }

    pub(crate) fn try_dispose(&self) -> Disposal {
        let _span = instrument_dispose(&self.name);

        // Video ports first, then audio ports, each in declared order
        let video: UsageGuards<'_> = self
            .video
            .iter()
            .map(|port| port.usage().lock())
            .collect();
        let audio: UsageGuards<'_> = self
            .audio
            .iter()
            .map(|port| port.usage().lock())
            .collect();

        if self.disposed.load(Ordering::Acquire) {
            return Disposal::Complete;
        }
        self.dispose_pending.store(true, Ordering::Release);

        let in_use: usize = video.iter().chain(audio.iter()).map(|count| **count).sum();
        if in_use > 0 {
            drop(audio);
            drop(video);
            record_disposal_deferred(&self.name);
            warn!(stage = %self.name, in_use, "disposal deferred; ports still in use");
            return Disposal::Deferred { in_use };
        }

        self.disposed.store(true, Ordering::Release);
        drop(audio);
        drop(video);

        for port in &self.video {
            port.pool().clear();
            port.metrics().record_pool_slots(0);
        }
        let io = std::mem::take(&mut *self.io.lock().unwrap());
        drop(io);

        info!(stage = %self.name, "stage disposed");
        Disposal::Complete
    }
}

/// A processing stage wrapping a set of output ports.
///
/// Cloning the handle shares the stage.
#[derive(Clone)]
pub struct Stage {
    inner: Arc<StageInner>,
}

impl Stage {
    /// Start building a stage.
    pub fn builder(config: StageConfig, ticket: Arc<Ticket>) -> StageBuilder {
        StageBuilder {
            config,
            ticket,
            video: Vec::new(),
            audio: Vec::new(),
        }
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The proxy of the `index`-th video port.
    pub fn video_port(&self, index: usize) -> Option<VideoPortProxy> {
        self.inner.video.get(index).map(VideoInner::handle)
    }

    /// The proxy of the `index`-th audio port.
    pub fn audio_port(&self, index: usize) -> Option<AudioPortProxy> {
        self.inner.audio.get(index).map(AudioInner::handle)
    }

    /// Look up an input by name.
    pub fn input(&self, name: &str) -> Result<Target> {
        let io = self.inner.io.lock().unwrap();
        io.inputs
            .iter()
            .find(|input| input.name == name)
            .map(|input| input.target.clone())
            .ok_or_else(|| Error::UnknownInput(name.to_string()))
    }

    /// Names of all inputs.
    pub fn input_names(&self) -> Vec<String> {
        let io = self.inner.io.lock().unwrap();
        io.inputs.iter().map(|input| input.name.clone()).collect()
    }

    /// Names of all outputs.
    pub fn output_names(&self) -> Vec<String> {
        let io = self.inner.io.lock().unwrap();
        io.outputs.iter().map(|output| output.name.clone()).collect()
    }

    /// Rewire the named output to `target`.
    pub fn rewire(&self, output: &str, target: Target) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed {
                stage: self.inner.name.clone(),
            });
        }

        let (kind, index) = {
            let io = self.inner.io.lock().unwrap();
            let output = io
                .outputs
                .iter()
                .find(|candidate| candidate.name == output)
                .ok_or_else(|| Error::UnknownOutput(output.to_string()))?;
            (output.kind, output.index)
        };

        if target.kind() != kind {
            return Err(Error::KindMismatch {
                expected: kind,
                found: target.kind(),
            });
        }

        match target {
            Target::Video(port) => self.inner.video[index].rewire(port),
            Target::Audio(port) => self.inner.audio[index].rewire(port),
        }
    }

    /// Sum of all ports' usage counts.
    pub fn usage(&self) -> usize {
        let video: usize = self.inner.video.iter().map(|port| port.usage().get()).sum();
        let audio: usize = self.inner.audio.iter().map(|port| port.usage().get()).sum();
        video + audio
    }

    /// Request disposal.
    ///
    /// Completes immediately if no port is in use. Otherwise the request is
    /// recorded, new sessions are refused, and disposal completes when the
    /// last usage is released or on a later call.
    pub fn dispose(&self) -> Disposal {
        self.inner.try_dispose()
    }

    /// Whether a disposal was requested.
    pub fn is_dispose_pending(&self) -> bool {
        self.inner.is_dispose_pending()
    }

    /// Whether disposal completed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.inner.name)
            .field("video_ports", &self.inner.video.len())
            .field("audio_ports", &self.inner.audio.len())
            .field("dispose_pending", &self.is_dispose_pending())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Builder for [`Stage`].
pub struct StageBuilder {
    config: StageConfig,
    ticket: Arc<Ticket>,
    video: Vec<(VideoPortRef, Arc<dyn VideoHooks>)>,
    audio: Vec<(AudioPortRef, Arc<dyn AudioHooks>)>,
}

impl StageBuilder {
    /// Wrap a video port.
    pub fn video(mut self, target: VideoPortRef, hooks: Arc<dyn VideoHooks>) -> Self {
        self.video.push((target, hooks));
        self
    }

    /// Wrap an audio port.
    pub fn audio(mut self, target: AudioPortRef, hooks: Arc<dyn AudioHooks>) -> Self {
        self.audio.push((target, hooks));
        self
    }

    /// Create the stage and its port proxies.
    pub fn build(self) -> Stage {
        let Self {
            config,
            ticket,
            video,
            audio,
        } = self;
        let _span = span_stage(&config.name).entered();

        let inner = Arc::new_cyclic(|stage: &Weak<StageInner>| {
            let setup = |index| PortSetup {
                stage,
                ticket: &ticket,
                config: &config,
                index,
            };

            let video: Vec<_> = video
                .into_iter()
                .enumerate()
                .map(|(index, (target, hooks))| VideoInner::new(setup(index), target, hooks))
                .collect();
            let audio: Vec<_> = audio
                .into_iter()
                .enumerate()
                .map(|(index, (target, hooks))| AudioInner::new(setup(index), target, hooks))
                .collect();

            let mut io = StageIo::default();
            for (index, port) in video.iter().enumerate() {
                io.inputs.push(Input {
                    name: port.input_name().to_string(),
                    target: Target::Video(port.handle().into_ref()),
                });
                io.outputs.push(Output {
                    name: port.output_name().to_string(),
                    kind: PortKind::Video,
                    index,
                });
            }
            for (index, port) in audio.iter().enumerate() {
                io.inputs.push(Input {
                    name: port.input_name().to_string(),
                    target: Target::Audio(port.handle().into_ref()),
                });
                io.outputs.push(Output {
                    name: port.output_name().to_string(),
                    kind: PortKind::Audio,
                    index,
                });
            }

            StageInner {
                name: config.name.clone(),
                video,
                audio,
                io: Mutex::new(io),
                dispose_pending: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }
        });

        info!(
            stage = %inner.name,
            video_ports = inner.video.len(),
            audio_ports = inner.audio.len(),
            "stage created"
        );
        Stage { inner }
    }
}
