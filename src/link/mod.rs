//! Link buffers connecting adjacent pipeline positions.
//!
//! A pipeline with N stages has N+1 links:
//!
//! ```text
//!   input ─▶ [link 0] ─▶ stage 0 ─▶ [link 1] ─▶ … ─▶ stage N-1 ─▶ [link N] ─▶ output
//! ```
//!
//! Each link is a single-slot buffer. It is either fillable (empty, its
//! producer may read) or drainable (holding bytes, its consumer may write),
//! never both, which is the whole of the pipeline's flow control.

mod buffer;

pub use buffer::{FillOutcome, LinkBuffer, LinkState, checksum_of};
