//! Error types for pipemux.
//!
//! Every error is terminal for the whole pipeline. The variants split along the
//! lines that callers care about:
//!
//! - [`Error::Construction`]: the topology could not be built; nothing is left running.
//! - [`Error::Io`]: an endpoint failed while the loop was moving data.
//! - [`Error::IntegrityMismatch`]: adjacent link checksums disagree, which points
//!   at the multiplexer itself rather than the environment.
//! - [`Error::Undelivered`]: the output closed while upstream data was still
//!   in flight.

use crate::endpoint::EndpointId;
use thiserror::Error;

/// Result type alias using pipemux's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pipemux operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Pipe creation, descriptor setup or spawning failed while building the topology.
    #[error("failed to construct {}: {source}", stage_label(.stage))]
    Construction {
        /// Stage being built when the failure happened, if any.
        stage: Option<usize>,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A read or write on an endpoint failed with a non-retryable error.
    #[error("I/O error on {endpoint}: {source}")]
    Io {
        /// Endpoint that failed.
        endpoint: EndpointId,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Adjacent link checksums disagree.
    #[error(
        "integrity mismatch between link {upstream} (checksum {upstream_checksum}) \
         and link {downstream} (checksum {downstream_checksum})"
    )]
    IntegrityMismatch {
        /// Upstream link index.
        upstream: usize,
        /// Downstream link index.
        downstream: usize,
        /// Checksum accumulated by the upstream link.
        upstream_checksum: u64,
        /// Checksum accumulated by the downstream link.
        downstream_checksum: u64,
    },

    /// The output reached end-of-stream while an upstream link still had
    /// data to deliver or had not seen end-of-stream.
    #[error("output ended before link {link} was finished ({pending} bytes undelivered)")]
    Undelivered {
        /// First link that was not finished.
        link: usize,
        /// Bytes it still held.
        pending: usize,
    },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error outside of endpoint service (reaping, opening boundary files).
    #[error("I/O error: {0}")]
    Os(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

fn stage_label(stage: &Option<usize>) -> String {
    match stage {
        Some(index) => format!("stage {index}"),
        None => "pipeline".to_string(),
    }
}

impl Error {
    /// Build a construction error for the given stage.
    pub fn construction(stage: Option<usize>, source: impl Into<std::io::Error>) -> Self {
        Error::Construction {
            stage,
            source: source.into(),
        }
    }

    /// Build a loop I/O error for the given endpoint.
    pub fn io(endpoint: EndpointId, source: impl Into<std::io::Error>) -> Self {
        Error::Io {
            endpoint,
            source: source.into(),
        }
    }

    /// True if the pipeline failed before any data moved.
    pub fn is_construction(&self) -> bool {
        matches!(self, Error::Construction { .. })
    }

    /// True if the integrity verifier rejected the link checksums.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::IntegrityMismatch { .. })
    }

    /// True if the run ended with data left behind in the pipeline.
    pub fn is_undelivered(&self) -> bool {
        matches!(self, Error::Undelivered { .. })
    }

    /// True if an endpoint read or write failed.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io { .. } | Error::Os(_) | Error::System(_))
    }
}
