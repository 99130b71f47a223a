//! Probe stage: intercepts everything and records what passes.
//!
//! The probe is both a diagnostic stage and the reference for writing one:
//! it overrides rendering, field selection, overlay blending and audio
//! buffer delivery, and forwards each after recording it.

use crate::config::StageConfig;
use crate::error::Result;
use crate::frame::{FieldParity, Frame, FrameRef, StreamRef};
use crate::plugin::StageFactory;
use crate::port::{AudioBuffer, AudioPortRef, VideoPortRef};
use crate::proxy::{
    AudioHooks, AudioPortProxy, FrameProxy, OverlayManagerProxy, Stage, VideoHooks,
};
use crate::ticket::Ticket;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters shared between a probe and its handles.
#[derive(Debug, Default)]
struct ProbeStats {
    renders: AtomicU64,
    fields: AtomicU64,
    blends: AtomicU64,
    audio_buffers: AtomicU64,
    audio_frames: AtomicU64,
    last_pts: AtomicI64,
}

/// Hooks recording rendered frames, overlay blends and audio buffers.
///
/// Clones share their counters, so a clone kept by the caller observes a
/// probe installed in a stage.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    stats: Arc<ProbeStats>,
    intercept_overlay: bool,
}

impl Probe {
    /// Create a probe that leaves the overlay side channel alone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also wrap the overlay manager and count blends.
    pub fn with_overlay(mut self, intercept: bool) -> Self {
        self.intercept_overlay = intercept;
        self
    }

    /// Frames rendered through the probe.
    pub fn renders(&self) -> u64 {
        self.stats.renders.load(Ordering::Relaxed)
    }

    /// Field selections seen.
    pub fn fields(&self) -> u64 {
        self.stats.fields.load(Ordering::Relaxed)
    }

    /// Overlay blends seen.
    pub fn blends(&self) -> u64 {
        self.stats.blends.load(Ordering::Relaxed)
    }

    /// Audio buffers delivered.
    pub fn audio_buffers(&self) -> u64 {
        self.stats.audio_buffers.load(Ordering::Relaxed)
    }

    /// Audio sample frames delivered.
    pub fn audio_frames(&self) -> u64 {
        self.stats.audio_frames.load(Ordering::Relaxed)
    }

    /// `pts` of the last rendered frame.
    pub fn last_pts(&self) -> i64 {
        self.stats.last_pts.load(Ordering::Relaxed)
    }

    /// Install this probe on every port of a new stage.
    pub fn build(
        &self,
        config: StageConfig,
        ticket: Arc<Ticket>,
        audio: Vec<AudioPortRef>,
        video: Vec<VideoPortRef>,
    ) -> Stage {
        let mut builder = Stage::builder(config, ticket);
        for target in video {
            builder = builder.video(target, Arc::new(self.clone()));
        }
        for target in audio {
            builder = builder.audio(target, Arc::new(self.clone()));
        }
        builder.build()
    }
}

impl VideoHooks for Probe {
    fn overrides_render(&self) -> bool {
        true
    }

    fn route_preprocessing(&self) -> bool {
        true
    }

    fn render(&self, frame: &FrameProxy, stream: Option<&StreamRef>) -> Result<u32> {
        let pts = frame.data().fields().pts;
        self.stats.last_pts.store(pts, Ordering::Relaxed);
        self.stats.renders.fetch_add(1, Ordering::Relaxed);
        frame.forward_render(stream)
    }

    fn field(&self, frame: &FrameProxy, parity: FieldParity) {
        self.stats.fields.fetch_add(1, Ordering::Relaxed);
        frame.forward_field(parity);
    }

    fn intercept_overlay(&self) -> bool {
        self.intercept_overlay
    }

    fn blend(&self, manager: &OverlayManagerProxy, vpts: i64, frame: &FrameRef, enabled: bool) {
        self.stats.blends.fetch_add(1, Ordering::Relaxed);
        manager.forward_blend(vpts, frame, enabled);
    }
}

impl AudioHooks for Probe {
    fn put_buffer(&self, port: &AudioPortProxy, buffer: AudioBuffer, stream: Option<&StreamRef>) {
        self.stats.audio_buffers.fetch_add(1, Ordering::Relaxed);
        self.stats
            .audio_frames
            .fetch_add(u64::from(buffer.num_frames), Ordering::Relaxed);
        port.forward_put_buffer(buffer, stream);
    }
}

/// Factory for [`Probe`] stages.
///
/// Every stage it opens shares the factory's probe counters.
#[derive(Debug, Default)]
pub struct ProbeFactory {
    probe: Probe,
}

impl ProbeFactory {
    /// Open stages with `probe` installed.
    pub fn new(probe: Probe) -> Self {
        Self { probe }
    }

    /// The shared probe.
    pub fn probe(&self) -> &Probe {
        &self.probe
    }
}

impl StageFactory for ProbeFactory {
    fn identifier(&self) -> &str {
        "probe"
    }

    fn description(&self) -> &str {
        "Intercepts every frame and records render, blend and audio statistics"
    }

    fn open(
        &self,
        config: StageConfig,
        ticket: Arc<Ticket>,
        audio: Vec<AudioPortRef>,
        video: Vec<VideoPortRef>,
    ) -> Result<Stage> {
        Ok(self.probe.build(config, ticket, audio, video))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Preprocess;
    use crate::port::{AudioFormat, AudioPort, FrameRequest, VideoPort};
    use crate::testing::{RENDER_VPTS_OFFSET, TestAudioPort, TestVideoPort};

    #[test]
    fn test_probe_records_renders() {
        let output = TestVideoPort::new("out");
        let probe = Probe::new();
        let stage = probe.build(
            StageConfig::new("probe"),
            Arc::new(Ticket::new()),
            Vec::new(),
            vec![output.clone() as VideoPortRef],
        );

        let port = stage.video_port(0).unwrap();
        port.open(None).unwrap();
        let frame = port.get_frame(&FrameRequest::new(32, 32)).unwrap();
        frame.data().fields().pts = 4200;
        frame.render(None).unwrap();
        frame.field(FieldParity::Top);

        assert_eq!(probe.renders(), 1);
        assert_eq!(probe.fields(), 1);
        assert_eq!(probe.last_pts(), 4200);
        assert_eq!(output.frames_rendered(), 1);
        assert_eq!(output.fields_selected(), 1);
        // Output-side timestamp came back up
        assert_eq!(frame.data().snapshot().vpts, 4200 + RENDER_VPTS_OFFSET);

        frame.free();
        port.close(None);
    }

    #[test]
    fn test_probe_routes_preprocessing() {
        let output = TestVideoPort::new("out");
        output.set_preprocess(Preprocess::ALL);
        let stage = Probe::new().build(
            StageConfig::new("probe"),
            Arc::new(Ticket::new()),
            Vec::new(),
            vec![output.clone() as VideoPortRef],
        );

        let port = stage.video_port(0).unwrap();
        port.open(None).unwrap();
        let frame = port.get_frame(&FrameRequest::new(32, 32)).unwrap();

        assert_eq!(frame.preprocess(), Preprocess::ALL);
        frame.proc_frame();
        let plane: &[u8] = &[0; 16];
        frame.proc_slice(&[plane]);
        assert_eq!(output.proc_frames(), 1);
        assert_eq!(output.proc_slices(), 1);

        frame.free();
        port.close(None);
    }

    #[test]
    fn test_probe_counts_audio_buffers() {
        let output = TestAudioPort::new("out");
        let probe = Probe::new();
        let stage = probe.build(
            StageConfig::new("probe"),
            Arc::new(Ticket::new()),
            vec![output.clone() as AudioPortRef],
            Vec::new(),
        );

        let port = stage.audio_port(0).unwrap();
        let rate = port.open(None, AudioFormat::new(16, 48_000, 2)).unwrap();
        assert_eq!(rate, 48_000);

        let mut buffer = port.get_buffer().unwrap();
        buffer.num_frames = 1024;
        port.put_buffer(buffer, None);

        assert_eq!(probe.audio_buffers(), 1);
        assert_eq!(probe.audio_frames(), 1024);
        assert_eq!(output.buffers_put(), 1);
        port.close(None);
    }
}
