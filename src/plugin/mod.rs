//! Stage factories and their registry.
//!
//! A stage factory knows how to build one kind of stage against a set of
//! target ports. Factories are registered by identifier and looked up when a
//! pipeline inserts a stage.
//!
//! # Example
//!
//! ```rust
//! use interpose::config::StageConfig;
//! use interpose::plugin::StageRegistry;
//! use interpose::port::VideoPortRef;
//! use interpose::testing::TestVideoPort;
//! use interpose::ticket::Ticket;
//! use std::sync::Arc;
//!
//! let registry = StageRegistry::with_builtin();
//! let output: VideoPortRef = TestVideoPort::new("output");
//!
//! let stage = registry
//!     .open(
//!         "passthrough",
//!         StageConfig::new("junction"),
//!         Arc::new(Ticket::new()),
//!         Vec::new(),
//!         vec![output],
//!     )
//!     .unwrap();
//! assert_eq!(stage.output_names(), ["video out"]);
//! ```

mod registry;

pub use registry::StageRegistry;

use crate::config::StageConfig;
use crate::error::Result;
use crate::port::{AudioPortRef, VideoPortRef};
use crate::proxy::Stage;
use crate::ticket::Ticket;
use std::sync::Arc;

/// Builds stages of one kind.
pub trait StageFactory: Send + Sync {
    /// Unique identifier the factory is registered under.
    fn identifier(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Build a stage wrapping `audio` and `video` targets.
    fn open(
        &self,
        config: StageConfig,
        ticket: Arc<Ticket>,
        audio: Vec<AudioPortRef>,
        video: Vec<VideoPortRef>,
    ) -> Result<Stage>;
}
