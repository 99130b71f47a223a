//! Passthrough stage.

use crate::config::StageConfig;
use crate::error::Result;
use crate::frame::FrameRef;
use crate::plugin::StageFactory;
use crate::port::{AudioPortRef, VideoPortRef};
use crate::proxy::{AudioHooks, Stage, VideoHooks};
use crate::ticket::Ticket;
use std::sync::Arc;

/// Hooks that admit no frames: every call is forwarded unchanged.
///
/// Useful as a rewirable junction in front of an output.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl VideoHooks for Passthrough {
    fn intercept_frame(&self, _frame: &FrameRef) -> bool {
        false
    }
}

impl AudioHooks for Passthrough {}

/// Factory for [`Passthrough`] stages.
#[derive(Debug, Default)]
pub struct PassthroughFactory;

impl StageFactory for PassthroughFactory {
    fn identifier(&self) -> &str {
        "passthrough"
    }

    fn description(&self) -> &str {
        "Forwards every call to the wired ports without wrapping frames"
    }

    fn open(
        &self,
        config: StageConfig,
        ticket: Arc<Ticket>,
        audio: Vec<AudioPortRef>,
        video: Vec<VideoPortRef>,
    ) -> Result<Stage> {
        let mut builder = Stage::builder(config, ticket);
        for target in video {
            builder = builder.video(target, Arc::new(Passthrough));
        }
        for target in audio {
            builder = builder.audio(target, Arc::new(Passthrough));
        }
        Ok(builder.build())
    }
}
