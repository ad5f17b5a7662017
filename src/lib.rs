//! statico — an in-process HTTP origin for static web assets.
//!
//! Two subsystems carry the weight: a pre-compressed, content-negotiated
//! response cache keyed on `(path, encoding, versioned-flavor)` and kept
//! coherent by a file-change invalidator, and an asset-versioning pipeline
//! that computes content-hashed filenames, rewrites HTML references to
//! them, and labels versioned responses immutable.

pub mod cache;
pub mod compress;
pub mod config;
pub mod error;
pub mod http;
pub mod invalidate;
pub mod metrics;
pub mod telemetry;
pub mod util;
pub mod version;
