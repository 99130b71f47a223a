//! # Interpose
//!
//! Transparent processing stages for media output ports, with live rewiring.
//!
//! Interpose sits between the producers of a media pipeline and its output
//! backends. A stage wraps an output port in a proxy that implements the same
//! port contract, intercepts the frames that cross it, and can be pointed at
//! a different port while the pipeline keeps running.
//!
//! ## Features
//!
//! - **Port proxies**: video and audio decorators over a swappable original port
//! - **Frame proxies**: pooled wrappers with two-phase field propagation
//! - **Live rewiring**: quiesce traffic on a shared ticket, swap, resume
//! - **Deferred disposal**: stages go away only once nothing references them
//! - **Stacking**: stages target each other like any other port
//!
//! ## Quick Start
//!
//! ```rust
//! use interpose::prelude::*;
//! use interpose::testing::TestVideoPort;
//! use std::sync::Arc;
//!
//! let ticket = Arc::new(Ticket::new());
//! let screen = TestVideoPort::new("screen");
//! let probe = Probe::new();
//!
//! let stage = probe.build(StageConfig::new("probe"), ticket, Vec::new(), vec![screen.clone() as VideoPortRef]);
//! let port = stage.video_port(0).unwrap();
//!
//! port.open(None)?;
//! let frame = port.get_frame(&FrameRequest::new(720, 576)).unwrap();
//! frame.render(None)?;
//! frame.free();
//! port.close(None);
//!
//! assert_eq!(probe.renders(), 1);
//! assert_eq!(screen.frames_disposed(), 1);
//! # Ok::<(), interpose::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod frame;
pub mod observability;
pub mod plugin;
pub mod port;
pub mod proxy;
pub mod stages;
pub mod testing;
pub mod ticket;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{LockPolicy, StageConfig};
    pub use crate::error::{Error, Result};
    pub use crate::frame::{Frame, FrameData, FrameFields, FrameRef, Stream, StreamRef};
    pub use crate::plugin::{StageFactory, StageRegistry};
    pub use crate::port::{
        AudioFormat, AudioPort, AudioPortRef, FrameRequest, PortKind, Target, VideoPort,
        VideoPortRef,
    };
    pub use crate::proxy::{AudioHooks, DefaultHooks, Disposal, Stage, VideoHooks};
    pub use crate::stages::{Passthrough, Probe};
    pub use crate::ticket::Ticket;
}

pub use error::{Error, Result};
