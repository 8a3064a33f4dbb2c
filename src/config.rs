//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is assembled once, validated, and then handed by
//! reference to the topology builder and the multiplexer. Nothing mutates it
//! after construction.

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default link buffer capacity: one page, the unit the kernel moves through a pipe atomically.
pub const DEFAULT_CHUNK_SIZE: usize = 0x1000;

/// Default readiness timeout. An iteration that waits this long with nothing
/// ready is treated as quiescent.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// The external filter program every stage runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCommand {
    /// Program path, resolved through `PATH` when it has no slash.
    pub program: OsString,
    /// Arguments passed to every stage (not including argv\[0\]).
    pub args: Vec<OsString>,
}

impl FilterCommand {
    /// Create a filter command with no arguments.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The identity filter (`cat`).
    pub fn identity() -> Self {
        Self::new("cat")
    }
}

impl fmt::Display for FilterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// When the integrity verifier compares link checksums.
///
/// Checksum equality across a hop only holds if the stage on that hop is
/// byte-preserving. Pipelines running transforming filters must use
/// [`VerifyMode::Off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    /// Never compare checksums.
    Off,
    /// On quiescent iterations, compare only hops whose stage has seen
    /// end-of-stream on both sides. Every pair is compared at termination.
    #[default]
    Settled,
    /// On every quiescent iteration, compare every adjacent pair of links.
    ///
    /// Also assumes that a stage holds no bytes internally once the pipeline
    /// goes quiet.
    Strict,
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyMode::Off => write!(f, "off"),
            VerifyMode::Settled => write!(f, "settled"),
            VerifyMode::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for VerifyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(VerifyMode::Off),
            "settled" => Ok(VerifyMode::Settled),
            "strict" => Ok(VerifyMode::Strict),
            other => Err(format!(
                "unknown verify mode '{other}' (expected off, settled or strict)"
            )),
        }
    }
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Name used in log spans and metric labels.
    pub name: String,
    /// Filter program run by every stage.
    pub filter: FilterCommand,
    /// Number of stages. Zero copies input straight to output.
    pub stages: usize,
    /// Capacity of each link buffer in bytes.
    pub chunk_size: usize,
    /// How long one readiness wait may block.
    pub poll_timeout: Duration,
    /// Integrity checking policy.
    pub verify: VerifyMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: String::from("pipemux"),
            filter: FilterCommand::identity(),
            stages: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            verify: VerifyMode::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a config chaining `stages` copies of `filter`.
    pub fn new(filter: FilterCommand, stages: usize) -> Self {
        Self {
            filter,
            stages,
            ..Default::default()
        }
    }

    /// Create a config chaining `stages` identity filters.
    pub fn identity(stages: usize) -> Self {
        Self::new(FilterCommand::identity(), stages)
    }

    /// Set the pipeline name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the link buffer capacity.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the readiness timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the integrity checking policy.
    pub fn with_verify(mut self, verify: VerifyMode) -> Self {
        self.verify = verify;
        self
    }

    /// Number of link buffers (always one more than the stage count).
    pub fn link_count(&self) -> usize {
        self.stages + 1
    }

    /// Check the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk size must be non-zero".into()));
        }
        if self.poll_timeout.is_zero() {
            return Err(Error::InvalidConfig("poll timeout must be non-zero".into()));
        }
        if self.stages > 0 && self.filter.program.is_empty() {
            return Err(Error::InvalidConfig("filter program is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.poll_timeout, Duration::from_millis(10));
        assert_eq!(config.verify, VerifyMode::Settled);
        assert_eq!(config.link_count(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = PipelineConfig::new(FilterCommand::new("tr").args(["a-z", "A-Z"]), 3)
            .with_name("upper")
            .with_chunk_size(512)
            .with_poll_timeout(Duration::from_millis(25))
            .with_verify(VerifyMode::Off);

        assert_eq!(config.name, "upper");
        assert_eq!(config.stages, 3);
        assert_eq!(config.link_count(), 4);
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.filter.to_string(), "tr a-z A-Z");
        assert_eq!(config.verify, VerifyMode::Off);
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let config = PipelineConfig::identity(1).with_chunk_size(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = PipelineConfig::identity(1).with_poll_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_empty_program_only_matters_with_stages() {
        let config = PipelineConfig::new(FilterCommand::new(""), 0);
        assert!(config.validate().is_ok());

        let config = PipelineConfig::new(FilterCommand::new(""), 2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_verify_mode_parse() {
        assert_eq!("off".parse::<VerifyMode>().unwrap(), VerifyMode::Off);
        assert_eq!("Settled".parse::<VerifyMode>().unwrap(), VerifyMode::Settled);
        assert_eq!("STRICT".parse::<VerifyMode>().unwrap(), VerifyMode::Strict);
        assert!("sometimes".parse::<VerifyMode>().is_err());
        assert_eq!(VerifyMode::Strict.to_string(), "strict");
    }
}
