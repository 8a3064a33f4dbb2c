//! # pipemux
//!
//! Chains `N` copies of an external filter program with pipes and drives every
//! pipe end from a single readiness loop.
//!
//! ```text
//!  input ─▶ [link 0] ─▶ stage 0 ─▶ [link 1] ─▶ … ─▶ stage N-1 ─▶ [link N] ─▶ output
//! ```
//!
//! Each link is a single-slot buffer: it either accepts one read from its
//! producer or holds bytes waiting for its consumer, never both. Every link
//! keeps a running checksum of the bytes it carried; with byte-preserving
//! stages the checksums of adjacent links must agree once data has passed
//! through, which the integrity verifier checks whenever the pipeline goes
//! quiet.
//!
//! ## Features
//!
//! - **One thread**: a single `poll(2)` per iteration services all `2(N+1)`
//!   endpoints
//! - **Backpressure**: single-slot links, partial writes carried over
//! - **Integrity checks**: per-link byte sums compared on quiescence
//! - **Clean teardown**: stages are always reaped, descriptors always closed
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipemux::prelude::*;
//!
//! let config = PipelineConfig::identity(3);
//! let report = run_pipeline(&config, EndpointFd::stdin(), EndpointFd::stdout())?;
//! eprintln!("{} bytes in {:?}", report.bytes_out, report.elapsed);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod link;
pub mod mux;
pub mod observability;
pub mod stage;
pub mod topology;
pub mod verify;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{FilterCommand, PipelineConfig, VerifyMode};
    pub use crate::endpoint::{EndpointFd, Role};
    pub use crate::error::{Error, Result};
    pub use crate::mux::{Multiplexer, Outcome, RunReport, StopHandle, run_pipeline};
    pub use crate::stage::StageExit;
    pub use crate::topology::Topology;
}

pub use error::{Error, Result};
pub use mux::{Multiplexer, RunReport, run_pipeline};
