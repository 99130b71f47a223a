//! The port contract: the endpoints producers open and pull frames from.
//!
//! Output backends implement [`VideoPort`] and [`AudioPort`]. Proxies in
//! [`crate::proxy`] implement the same traits, so a producer cannot tell a
//! proxied port from a real one and stages stack by targeting each other.

use crate::error::Result;
use crate::frame::{ExtraInfo, FrameRef, StreamRef};
use std::fmt;
use std::sync::Arc;

/// Shared handle to a video port.
pub type VideoPortRef = Arc<dyn VideoPort>;

/// Shared handle to an audio port.
pub type AudioPortRef = Arc<dyn AudioPort>;

/// Shared handle to an overlay manager.
pub type OverlayManagerRef = Arc<dyn OverlayManager>;

/// Capability class of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// Video-like port (frames).
    Video,
    /// Audio-like port (sample buffers).
    Audio,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Constraints for [`VideoPort::get_frame`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRequest {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Display aspect ratio.
    pub ratio: f64,
    /// Opaque format tag (fourcc).
    pub format: u32,
    /// Allocation flags.
    pub flags: u32,
}

impl FrameRequest {
    /// Request a frame of the given size with square pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ratio: width as f64 / height.max(1) as f64,
            format: 0,
            flags: 0,
        }
    }

    /// Set the format tag.
    pub fn with_format(mut self, format: u32) -> Self {
        self.format = format;
        self
    }
}

/// Session status reported by [`VideoPort::status`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoStatus {
    /// A session for the queried stream is open.
    pub open: bool,
    /// Width of the last frame.
    pub width: u32,
    /// Height of the last frame.
    pub height: u32,
    /// Duration of the last frame.
    pub img_duration: i64,
}

/// Sample format of an audio session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioFormat {
    /// Bits per sample.
    pub bits: u32,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Channel mode.
    pub mode: u32,
}

impl AudioFormat {
    /// Build a format.
    pub fn new(bits: u32, rate: u32, mode: u32) -> Self {
        Self { bits, rate, mode }
    }
}

/// Session status reported by [`AudioPort::status`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStatus {
    /// A session for the queried stream is open.
    pub open: bool,
    /// Format of the session.
    pub format: AudioFormat,
}

/// A buffer of audio samples.
#[derive(Debug, Clone, Default)]
pub struct AudioBuffer {
    /// Interleaved sample bytes.
    pub data: Vec<u8>,
    /// Number of sample frames in `data`.
    pub num_frames: u32,
    /// Presentation time on the output clock.
    pub vpts: i64,
    /// Sample format.
    pub format: AudioFormat,
    /// Stream affiliation.
    pub stream: Option<StreamRef>,
    /// Positional information.
    pub extra_info: ExtraInfo,
}

impl AudioBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            ..Default::default()
        }
    }
}

/// An overlay event scheduled on the side channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayEvent {
    /// Event type (show, hide, menu, ...).
    pub event_type: u32,
    /// Presentation time the event applies at.
    pub vpts: i64,
    /// Overlay object the event refers to.
    pub object_handle: i32,
}

/// Auxiliary control-plane object exposed by a video port.
pub trait OverlayManager: Send + Sync {
    /// Reset all overlay state.
    fn init(&self);
    /// Tear the manager down.
    fn dispose(&self);
    /// Allocate an overlay object handle; negative when none is available.
    fn get_handle(&self, object_type: i32) -> i32;
    /// Release an overlay object handle.
    fn free_handle(&self, handle: i32);
    /// Queue an event; returns the event slot or a negative value.
    fn add_event(&self, event: &OverlayEvent) -> i32;
    /// Drop all queued events.
    fn flush_events(&self);
    /// Whether overlays changed since `vpts`.
    fn redraw_needed(&self, vpts: i64) -> bool;
    /// Blend all overlays active at `vpts` into `frame`.
    fn blend(&self, vpts: i64, frame: &FrameRef, enabled: bool);
}

/// The video port contract.
pub trait VideoPort: Send + Sync {
    /// Capability bits of the backend.
    fn capabilities(&self) -> u32;

    /// Open a session for `stream`.
    fn open(&self, stream: Option<&StreamRef>) -> Result<()>;

    /// Obtain a frame matching `request`, or `None` if the port has none.
    fn get_frame(&self, request: &FrameRequest) -> Option<FrameRef>;

    /// The most recently displayed frame, locked for the caller.
    fn last_frame(&self) -> Option<FrameRef>;

    /// Enable or disable overlay blending.
    fn enable_overlay(&self, enabled: bool);

    /// Close the session for `stream`.
    fn close(&self, stream: Option<&StreamRef>);

    /// Final teardown; no further calls follow.
    fn exit(&self);

    /// The overlay side channel, if the backend has one.
    fn overlay_manager(&self) -> Option<OverlayManagerRef>;

    /// Drop all queued frames.
    fn flush(&self);

    /// Redraw the current frame now.
    fn trigger_drawing(&self);

    /// Session status for `stream`.
    fn status(&self, stream: Option<&StreamRef>) -> VideoStatus;

    /// Read a property.
    fn get_property(&self, property: i32) -> i32;

    /// Write a property; returns the value actually applied.
    fn set_property(&self, property: i32, value: i32) -> i32;
}

/// The audio port contract.
pub trait AudioPort: Send + Sync {
    /// Capability bits of the backend.
    fn capabilities(&self) -> u32;

    /// Open a session for `stream`; returns the output sample rate.
    fn open(&self, stream: Option<&StreamRef>, format: AudioFormat) -> Result<u32>;

    /// Obtain an empty buffer, or `None` if the port has none.
    fn get_buffer(&self) -> Option<AudioBuffer>;

    /// Queue a filled buffer for output.
    fn put_buffer(&self, buffer: AudioBuffer, stream: Option<&StreamRef>);

    /// Close the session for `stream`.
    fn close(&self, stream: Option<&StreamRef>);

    /// Final teardown; no further calls follow.
    fn exit(&self);

    /// Read a property.
    fn get_property(&self, property: i32) -> i32;

    /// Write a property; returns the value actually applied.
    fn set_property(&self, property: i32, value: i32) -> i32;

    /// Backend-specific control command.
    fn control(&self, command: i32, arg: i32) -> i32;

    /// Drop all queued buffers.
    fn flush(&self);

    /// Session status for `stream`.
    fn status(&self, stream: Option<&StreamRef>) -> AudioStatus;
}

/// A port of either kind, used to wire stage outputs.
#[derive(Clone)]
pub enum Target {
    /// A video port.
    Video(VideoPortRef),
    /// An audio port.
    Audio(AudioPortRef),
}

impl Target {
    /// Kind of the wrapped port.
    pub fn kind(&self) -> PortKind {
        match self {
            Self::Video(_) => PortKind::Video,
            Self::Audio(_) => PortKind::Audio,
        }
    }

    /// The video port, if this is one.
    pub fn into_video(self) -> Option<VideoPortRef> {
        match self {
            Self::Video(port) => Some(port),
            Self::Audio(_) => None,
        }
    }

    /// The audio port, if this is one.
    pub fn into_audio(self) -> Option<AudioPortRef> {
        match self {
            Self::Audio(port) => Some(port),
            Self::Video(_) => None,
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Target").field(&self.kind()).finish()
    }
}
