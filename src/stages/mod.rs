//! Built-in stages.
//!
//! - [`Passthrough`]: forwards everything, wraps nothing
//! - [`Probe`]: wraps every frame and records what it sees

mod passthrough;
mod probe;

pub use passthrough::{Passthrough, PassthroughFactory};
pub use probe::{Probe, ProbeFactory};
