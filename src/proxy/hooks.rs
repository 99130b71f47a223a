//! Customization points for stages.
//!
//! A stage supplies one [`VideoHooks`] per video port and one [`AudioHooks`]
//! per audio port. Every method has a default that forwards unchanged, so a
//! stage overrides only the behavior it adds.

use super::audio::AudioPortProxy;
use super::frame::FrameProxy;
use super::overlay::OverlayManagerProxy;
use crate::error::Result;
use crate::frame::{FieldParity, FrameRef, StreamRef};
use crate::port::{AudioBuffer, AudioFormat};

/// Per-port customization of a video port proxy.
pub trait VideoHooks: Send + Sync {
    /// Admission predicate: whether a frame from the original port is wrapped.
    ///
    /// Frames that are not admitted reach the producer untouched and do not
    /// count as usage.
    fn intercept_frame(&self, _frame: &FrameRef) -> bool {
        true
    }

    /// Whether [`render`](Self::render) is customized.
    ///
    /// A stage that replaces rendering usually consumes the pixels itself, so
    /// preprocessing hooks of the original frame are hidden unless
    /// [`route_preprocessing`](Self::route_preprocessing) asks for them.
    fn overrides_render(&self) -> bool {
        false
    }

    /// Expose the original frame's preprocessing hooks even though `render`
    /// is overridden.
    fn route_preprocessing(&self) -> bool {
        false
    }

    /// Render an intercepted frame.
    fn render(&self, frame: &FrameProxy, stream: Option<&StreamRef>) -> Result<u32> {
        frame.forward_render(stream)
    }

    /// Field selection on an intercepted frame.
    fn field(&self, frame: &FrameProxy, parity: FieldParity) {
        frame.forward_field(parity);
    }

    /// Whether the overlay side channel is wrapped by a manager proxy.
    fn intercept_overlay(&self) -> bool {
        false
    }

    /// Blend overlays into a frame through the manager proxy.
    fn blend(&self, manager: &OverlayManagerProxy, vpts: i64, frame: &FrameRef, enabled: bool) {
        manager.forward_blend(vpts, frame, enabled);
    }

    /// Called after a session was opened on the original port.
    fn opened(&self, _stream: Option<&StreamRef>) {}

    /// Called after a session was closed on the original port.
    fn closed(&self, _stream: Option<&StreamRef>) {}
}

/// Per-port customization of an audio port proxy.
pub trait AudioHooks: Send + Sync {
    /// Called after a session was opened on the original port.
    fn opened(&self, _stream: Option<&StreamRef>, _format: AudioFormat) {}

    /// Called after a session was closed on the original port.
    fn closed(&self, _stream: Option<&StreamRef>) {}

    /// Queue a filled buffer.
    fn put_buffer(&self, port: &AudioPortProxy, buffer: AudioBuffer, stream: Option<&StreamRef>) {
        port.forward_put_buffer(buffer, stream);
    }
}

/// Hooks that change nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl VideoHooks for DefaultHooks {}

impl AudioHooks for DefaultHooks {}
