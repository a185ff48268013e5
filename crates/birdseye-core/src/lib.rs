//! Core of the birdseye call inspector.
//!
//! This crate holds everything between an editor and a birdseye trace
//! server, independent of either:
//! - Anchors that follow traced ranges through document edits
//! - Function snapshots matched to recorded calls by body hash
//! - Loop navigation over recorded iterations
//! - Lazily decoded value trees and the inspector built from them
//! - Calls with their highlights, hover and selection state
//! - Sessions tracking open calls per function
//! - Background polling of which functions have calls
//! - Settings and error types

pub mod anchor;
pub mod call;
pub mod client;
pub mod config;
pub mod error;
pub mod hash;
pub mod host;
pub mod inspector;
pub mod navigator;
pub mod poll;
pub mod range;
pub mod session;
pub mod snapshot;
pub mod text;
pub mod trace;
pub mod value;
