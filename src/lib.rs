//! birdseye: inspect recorded Python function calls against live source.
//!
//! The call inspector anchors a traced function's ranges in the source,
//! steps through recorded loop iterations and renders captured values the
//! way an editor plugin would show them.

// Core infrastructure - re-exported from birdseye-core
pub use birdseye_core::anchor;
pub use birdseye_core::call;
pub use birdseye_core::client;
pub use birdseye_core::config;
pub use birdseye_core::error;
pub use birdseye_core::hash;
pub use birdseye_core::host;
pub use birdseye_core::inspector;
pub use birdseye_core::navigator;
pub use birdseye_core::poll;
pub use birdseye_core::range;
pub use birdseye_core::session;
pub use birdseye_core::snapshot;
pub use birdseye_core::text;
pub use birdseye_core::trace;
pub use birdseye_core::value;

// Front door
pub mod cli;
pub mod output;
