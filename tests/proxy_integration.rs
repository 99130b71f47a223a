//! Integration tests for port and frame interception.

use interpose::config::StageConfig;
use interpose::error::Error;
use interpose::frame::{Frame, FrameRef, Preprocess, Stream, StreamRef, u_turn};
use interpose::port::{
    FrameRequest, OverlayManager, OverlayManagerRef, Target, VideoPort, VideoPortRef,
};
use interpose::proxy::{DefaultHooks, Disposal, FrameProxy, Stage, VideoHooks, VideoPortProxy};
use interpose::stages::Probe;
use interpose::testing::{RENDER_VPTS_OFFSET, TestOverlayManager, TestVideoPort};
use interpose::ticket::Ticket;
use std::sync::Arc;
use std::thread;

fn request() -> FrameRequest {
    FrameRequest::new(320, 240)
}

fn single_port_stage(
    name: &str,
    output: VideoPortRef,
    hooks: Arc<dyn VideoHooks>,
) -> (Stage, VideoPortProxy) {
    let stage = Stage::builder(StageConfig::new(name), Arc::new(Ticket::new()))
        .video(output, hooks)
        .build();
    let port = stage.video_port(0).unwrap();
    (stage, port)
}

fn same_port(a: &VideoPortRef, b: &Arc<TestVideoPort>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Three frames freed without extra locks leave three reusable proxies.
#[test]
fn test_scenario_a_three_frames_fill_pool() {
    let output = TestVideoPort::new("out");
    let (_stage, port) = single_port_stage("a", output.clone(), Arc::new(DefaultHooks));

    port.open(None).unwrap();
    let baseline = port.usage();

    let frames: Vec<FrameRef> = (0..3).map(|_| port.get_frame(&request()).unwrap()).collect();
    assert_eq!(port.usage(), baseline + 3);

    for frame in frames {
        frame.free();
    }

    assert_eq!(port.pool_len(), 3);
    assert_eq!(port.pool_available(), 3);
    assert_eq!(port.usage(), baseline);
    assert_eq!(output.frames_disposed(), 3);

    port.close(None);
}

/// An extra lock defers disposal of the original to the second free.
#[test]
fn test_scenario_b_extra_lock_defers_dispose() {
    let output = TestVideoPort::new("out");
    let (_stage, port) = single_port_stage("b", output.clone(), Arc::new(DefaultHooks));
    port.open(None).unwrap();

    let frame = port.get_frame(&request()).unwrap();
    frame.lock();
    let second_holder = Arc::clone(&frame);

    frame.free();
    assert_eq!(output.frames_disposed(), 0);
    assert_eq!(port.pool_available(), 0);

    second_holder.free();
    assert_eq!(output.frames_disposed(), 1);
    assert_eq!(port.pool_available(), 1);

    // The original saw one lock and one forwarded free before its dispose
    assert_eq!(output.frame_locks(), 1);
    assert_eq!(output.frame_frees(), 1);

    port.close(None);
}

/// Frames in flight across a rewire return to the port that produced them.
#[test]
fn test_scenario_c_rewire_keeps_in_flight_frames() {
    let old = TestVideoPort::new("old");
    let new = TestVideoPort::new("new");
    let (stage, port) = single_port_stage("c", old.clone(), Arc::new(DefaultHooks));

    port.open(None).unwrap();
    let first = port.get_frame(&request()).unwrap();
    let second = port.get_frame(&request()).unwrap();

    stage
        .rewire("video out", Target::Video(new.clone()))
        .unwrap();

    assert!(same_port(&port.original(), &new));
    assert!(new.is_open());
    assert!(!old.is_open());

    first.free();
    second.free();
    assert_eq!(old.frames_disposed(), 2);
    assert_eq!(new.frames_disposed(), 0);

    let next = port.get_frame(&request()).unwrap();
    assert_eq!(new.frames_issued(), 1);
    assert_eq!(old.frames_issued(), 2);

    next.free();
    assert_eq!(new.frames_disposed(), 1);
    port.close(None);
    assert_eq!(new.closes(), 1);
}

/// Locks and frees balance on every original frame, across threads.
#[test]
fn test_reference_balance_concurrent_frames() {
    let output = TestVideoPort::new("out");
    let (_stage, port) = single_port_stage("balance", output.clone(), Arc::new(DefaultHooks));
    port.open(None).unwrap();

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let port = port.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let frame = port.get_frame(&request()).unwrap();
                    let extra = (worker + i) % 3;
                    let holders: Vec<FrameRef> = (0..extra)
                        .map(|_| {
                            frame.lock();
                            Arc::clone(&frame)
                        })
                        .collect();
                    for holder in holders {
                        holder.free();
                    }
                    frame.free();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(output.frames_issued(), 200);
    assert_eq!(output.frames_disposed(), 200);
    assert_eq!(output.frame_locks(), output.frame_frees());
    assert_eq!(port.usage(), 1);
    assert!(port.pool_len() <= 4);
    assert_eq!(port.pool_available(), port.pool_len());

    port.close(None);
}

/// Sequential intercept/restore cycles reuse a single proxy.
#[test]
fn test_pool_reuse_sequential_cycles() {
    let output = TestVideoPort::new("out");
    let (_stage, port) = single_port_stage("reuse", output.clone(), Arc::new(DefaultHooks));
    port.open(None).unwrap();

    for _ in 0..64 {
        port.get_frame(&request()).unwrap().free();
    }

    assert_eq!(port.pool_len(), 1);
    assert_eq!(output.frames_disposed(), 64);
    port.close(None);
}

/// Closing a session that was never opened clamps the usage counter.
#[test]
fn test_close_without_open_is_clamped() {
    let output = TestVideoPort::new("out");
    let (_stage, port) = single_port_stage("clamp", output.clone(), Arc::new(DefaultHooks));

    port.close(None);
    port.close(None);

    assert_eq!(port.usage(), 0);
    assert_eq!(port.usage_underflows(), 2);
    assert_eq!(output.closes(), 2);

    // Counter still works normally afterwards
    port.open(None).unwrap();
    assert_eq!(port.usage(), 1);
    port.close(None);
    assert_eq!(port.usage(), 0);
    assert_eq!(port.usage_underflows(), 2);
}

/// A disposal attempt while ports are in use changes nothing but the flag.
#[test]
fn test_disposal_gating() {
    let output = TestVideoPort::new("out");
    let (stage, port) = single_port_stage("gating", output.clone(), Arc::new(DefaultHooks));
    port.open(None).unwrap();
    let frame = port.get_frame(&request()).unwrap();

    let usage = port.usage();
    let pool = (port.pool_len(), port.pool_available());

    assert_eq!(stage.dispose(), Disposal::Deferred { in_use: 2 });
    assert!(stage.is_dispose_pending());
    assert!(!stage.is_disposed());
    assert_eq!(port.usage(), usage);
    assert_eq!((port.pool_len(), port.pool_available()), pool);

    // Retrying changes nothing while usage remains
    assert_eq!(stage.dispose(), Disposal::Deferred { in_use: 2 });

    frame.free();
    assert!(!stage.is_disposed());

    port.close(None);
    assert!(stage.is_disposed());
    assert_eq!(port.pool_len(), 0);
    assert_eq!(stage.dispose(), Disposal::Complete);
}

/// Stages stack by targeting another stage's input.
#[test]
fn test_stacked_stages() {
    let output = TestVideoPort::new("out");
    let ticket = Arc::new(Ticket::new());
    let inner_probe = Probe::new();
    let outer_probe = Probe::new();

    let inner = inner_probe.build(
        StageConfig::new("inner"),
        Arc::clone(&ticket),
        Vec::new(),
        vec![output.clone() as VideoPortRef],
    );
    let inner_input = inner.input("video in").unwrap().into_video().unwrap();
    let outer = outer_probe.build(
        StageConfig::new("outer"),
        Arc::clone(&ticket),
        Vec::new(),
        vec![inner_input],
    );

    let port = outer.video_port(0).unwrap();
    port.open(None).unwrap();
    assert!(output.is_open());

    let frame = port.get_frame(&request()).unwrap();
    frame.data().fields().pts = 90;
    frame.render(None).unwrap();

    assert_eq!(outer_probe.renders(), 1);
    assert_eq!(inner_probe.renders(), 1);
    assert_eq!(output.frames_rendered(), 1);
    assert_eq!(output.last_pts(), 90);
    assert_eq!(frame.data().snapshot().vpts, 90 + RENDER_VPTS_OFFSET);

    frame.free();
    assert_eq!(output.frames_disposed(), 1);
    assert_eq!(inner.video_port(0).unwrap().pool_available(), 1);
    assert_eq!(port.pool_available(), 1);

    port.close(None);
    assert!(!output.is_open());
    assert_eq!(inner.usage(), 0);
    assert_eq!(outer.usage(), 0);
}

/// Stream affiliation references are dropped when frames are restored.
#[test]
fn test_stream_reference_released_on_restore() {
    let output = TestVideoPort::new("out");
    let (_stage, port) = single_port_stage("stream", output.clone(), Arc::new(DefaultHooks));
    let stream = Stream::new("main");

    port.open(Some(&stream)).unwrap();
    let frame = port.get_frame(&request()).unwrap();
    frame.data().fields().stream = Some(Arc::clone(&stream));
    frame.render(Some(&stream)).unwrap();
    assert!(Arc::strong_count(&stream) > 1);

    frame.free();
    port.close(Some(&stream));

    assert_eq!(Arc::strong_count(&stream), 1);
}

/// A stage that consumes frames itself instead of passing them on.
struct Consumer;

impl VideoHooks for Consumer {
    fn overrides_render(&self) -> bool {
        true
    }

    fn render(&self, frame: &FrameProxy, stream: Option<&StreamRef>) -> interpose::Result<u32> {
        u_turn(frame, stream);
        Ok(0)
    }
}

/// Overriding render hides preprocessing unless routed; DefaultHooks exposes it.
#[test]
fn test_preprocessing_routing() {
    let output = TestVideoPort::new("out");
    output.set_preprocess(Preprocess::ALL);

    let (_stage, port) = single_port_stage("default", output.clone(), Arc::new(DefaultHooks));
    port.open(None).unwrap();
    let frame = port.get_frame(&request()).unwrap();
    assert_eq!(frame.preprocess(), Preprocess::ALL);
    frame.proc_frame();
    assert_eq!(output.proc_frames(), 1);
    frame.free();
    port.close(None);

    let (_stage, port) = single_port_stage("consumer", output.clone(), Arc::new(Consumer));
    port.open(None).unwrap();
    let frame = port.get_frame(&request()).unwrap();
    assert_eq!(frame.preprocess(), Preprocess::NONE);
    frame.proc_frame();
    assert_eq!(output.proc_frames(), 1);
    frame.free();
    port.close(None);
}

/// A consuming stage ends the frame's travel with a u-turn.
#[test]
fn test_u_turn_consumes_frame() {
    let output = TestVideoPort::new("out");
    let (_stage, port) = single_port_stage("consumer", output.clone(), Arc::new(Consumer));
    let stream = Stream::new("main");

    port.open(Some(&stream)).unwrap();
    let frame = port.get_frame(&request()).unwrap();
    frame.render(Some(&stream)).unwrap();

    assert_eq!(output.frames_rendered(), 0);
    let fields = frame.data().snapshot();
    assert!(Arc::ptr_eq(fields.stream.as_ref().unwrap(), &stream));
    drop(fields);

    frame.free();
    port.close(Some(&stream));
    assert_eq!(output.frames_disposed(), 1);
    assert_eq!(Arc::strong_count(&stream), 1);
}

/// Only frames accepted by the admission predicate are wrapped.
struct LargeFramesOnly;

impl VideoHooks for LargeFramesOnly {
    fn intercept_frame(&self, frame: &FrameRef) -> bool {
        frame.data().fields().width >= 640
    }
}

#[test]
fn test_admission_predicate() {
    let output = TestVideoPort::new("out");
    let (_stage, port) = single_port_stage("admit", output.clone(), Arc::new(LargeFramesOnly));
    port.open(None).unwrap();

    let small = port.get_frame(&FrameRequest::new(320, 240)).unwrap();
    assert_eq!(port.usage(), 1);
    assert_eq!(port.pool_len(), 0);

    let large = port.get_frame(&FrameRequest::new(1280, 720)).unwrap();
    assert_eq!(port.usage(), 2);
    assert_eq!(port.pool_len(), 1);

    small.free();
    large.free();
    assert_eq!(output.frames_disposed(), 2);
    assert_eq!(port.usage(), 1);
    port.close(None);
}

/// A port without frames leaves the usage counter alone.
#[test]
fn test_no_frame_does_not_count() {
    let output = TestVideoPort::new("out");
    let (_stage, port) = single_port_stage("empty", output.clone(), Arc::new(DefaultHooks));
    port.open(None).unwrap();
    output.set_refuse_frames(true);

    assert!(port.get_frame(&request()).is_none());
    assert_eq!(port.usage(), 1);
    port.close(None);
}

/// Failures of the original port reach the caller unchanged.
#[test]
fn test_open_failure_propagates() {
    let output = TestVideoPort::new("broken");
    output.set_fail_open(true);
    let (_stage, port) = single_port_stage("fail", output.clone(), Arc::new(DefaultHooks));

    let err = port.open(None).unwrap_err();
    assert!(matches!(err, Error::Port(reason) if reason.contains("broken")));
    assert_eq!(port.usage(), 0);
    assert_eq!(port.usage_underflows(), 0);
}

/// Properties, status and capabilities are forwarded.
#[test]
fn test_forwarded_calls() {
    let output = TestVideoPort::new("out");
    let (_stage, port) = single_port_stage("forward", output.clone(), Arc::new(DefaultHooks));

    assert_eq!(port.set_property(7, 42), 42);
    assert_eq!(port.get_property(7), 42);
    assert_eq!(port.capabilities(), output.capabilities());

    port.open(None).unwrap();
    assert!(port.status(None).open);
    port.flush();
    port.enable_overlay(true);
    port.exit();
    assert_eq!(output.flushes(), 1);
    assert_eq!(output.exits(), 1);
    assert!(output.overlay_enabled());
    port.close(None);
    assert!(!port.status(None).open);
}

/// The overlay manager proxy is created once and follows the wired port.
#[test]
fn test_overlay_manager_proxy() {
    let first_manager = TestOverlayManager::new();
    let second_manager = TestOverlayManager::new();
    let old = TestVideoPort::new("old");
    let new = TestVideoPort::new("new");
    old.set_overlay_manager(Some(first_manager.clone()));
    new.set_overlay_manager(Some(second_manager.clone()));

    let probe = Probe::new().with_overlay(true);
    let stage = probe.build(
        StageConfig::new("overlay"),
        Arc::new(Ticket::new()),
        Vec::new(),
        vec![old.clone() as VideoPortRef],
    );
    let port = stage.video_port(0).unwrap();
    port.open(None).unwrap();

    let manager = port.overlay_manager().unwrap();
    let original: OverlayManagerRef = first_manager.clone();
    assert!(!std::ptr::addr_eq(Arc::as_ptr(&manager), Arc::as_ptr(&original)));

    let again = port.overlay_manager().unwrap();
    assert!(std::ptr::addr_eq(Arc::as_ptr(&manager), Arc::as_ptr(&again)));

    let frame = port.get_frame(&request()).unwrap();
    manager.blend(0, &frame, true);
    manager.init();
    assert_eq!(probe.blends(), 1);
    assert_eq!(first_manager.blends(), 1);
    assert_eq!(first_manager.inits(), 1);

    stage.rewire("video out", Target::Video(new.clone())).unwrap();
    assert!(port.overlay_proxy().unwrap().is_stale());

    // A cached handle re-fetches from the new port on next use
    manager.blend(0, &frame, true);
    assert_eq!(first_manager.blends(), 1);
    assert_eq!(second_manager.blends(), 1);
    assert!(!port.overlay_proxy().unwrap().is_stale());

    frame.free();
    port.close(None);
}

/// Without overlay interception the original manager is returned.
#[test]
fn test_overlay_manager_passthrough() {
    let manager = TestOverlayManager::new();
    let output = TestVideoPort::new("out");
    output.set_overlay_manager(Some(manager.clone()));

    let (_stage, port) = single_port_stage("plain", output.clone(), Arc::new(DefaultHooks));
    let reported = port.overlay_manager().unwrap();
    let original: OverlayManagerRef = manager;
    assert!(std::ptr::addr_eq(Arc::as_ptr(&reported), Arc::as_ptr(&original)));
    assert!(port.overlay_proxy().is_none());
}

/// Rendering a restored proxy through a stale handle is refused.
#[test]
fn test_stale_handle_render_is_refused() {
    let output = TestVideoPort::new("out");
    let (_stage, port) = single_port_stage("stale", output.clone(), Arc::new(DefaultHooks));
    port.open(None).unwrap();

    let frame = port.get_frame(&request()).unwrap();
    let stale = Arc::clone(&frame);
    frame.free();

    assert!(matches!(stale.render(None), Err(Error::StaleFrame)));
    drop(stale);
    port.close(None);
}

/// Freeing a frame more often than it was locked is a contract violation.
#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "free on a restored frame proxy")]
fn test_double_free_is_asserted() {
    let output = TestVideoPort::new("out");
    let (_stage, port) = single_port_stage("double", output.clone(), Arc::new(DefaultHooks));
    port.open(None).unwrap();

    let frame = port.get_frame(&request()).unwrap();
    let extra = Arc::clone(&frame);
    frame.free();
    extra.free();
}
