//! The I/O multiplexer loop.
//!
//! One thread drives every endpoint of the pipeline from a single `poll(2)`
//! call per iteration:
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────┐
//!   │ interest: producer wants IN  iff its link is fillable    │
//!   │           consumer wants OUT iff its link is drainable   │
//!   ├──────────────────────────────────────────────────────────┤
//!   │ poll(interested endpoints, timeout)                      │
//!   ├───────────────┬──────────────────────────────────────────┤
//!   │ nothing ready │ quiescent: run the integrity verifier    │
//!   │ some ready    │ one read or one write per ready endpoint │
//!   └───────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Interest is recomputed from link occupancy on every iteration, so no
//! readiness state survives from one iteration to the next. The loop ends when
//! the last link has seen end-of-stream and every byte has been delivered to
//! the output. A run only completes if every other link has finished too;
//! an output that closes early while data is still upstream is an error.

use crate::config::PipelineConfig;
use crate::endpoint::{Endpoint, EndpointFd, Role, is_transient};
use crate::error::{Error, Result};
use crate::link::{FillOutcome, LinkBuffer};
use crate::observability::{
    LinkMetrics, PipelineMetrics, span_pipeline, trace_eos, trace_error, trace_link_drained,
    trace_link_filled, trace_quiescent,
};
use crate::stage::StageExit;
use crate::topology::Topology;
use crate::verify::{IntegrityVerifier, ensure_drained};
use rustix::event::{Nsecs, PollFd, PollFlags, Secs, Timespec, poll};
use rustix::io::Errno;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::Span;

/// Cooperative cancellation for a running pipeline.
///
/// Checked once per iteration. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    /// Create a handle that is not stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the pipeline to stop at the start of its next iteration.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// True once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Input reached end-of-stream and every byte reached the output.
    Completed,
    /// The run was cancelled through a [`StopHandle`].
    Stopped,
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// How the run ended.
    pub outcome: Outcome,
    /// Bytes read from the external input.
    pub bytes_in: u64,
    /// Bytes written to the external output.
    pub bytes_out: u64,
    /// Loop iterations.
    pub iterations: u64,
    /// Iterations with nothing ready.
    pub quiescent_iterations: u64,
    /// Checksum pair comparisons performed.
    pub checks: u64,
    /// Final checksum of every link, in pipeline order.
    pub checksums: Vec<u64>,
    /// Exit status of every stage, in pipeline order.
    pub stage_exits: Vec<StageExit>,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl RunReport {
    /// True if the run completed rather than being stopped.
    pub fn is_completed(&self) -> bool {
        self.outcome == Outcome::Completed
    }

    /// First stage that exited unsuccessfully.
    pub fn failed_stage(&self) -> Option<&StageExit> {
        self.stage_exits.iter().find(|exit| !exit.success())
    }

    /// True if every stage exited with status 0.
    pub fn stages_succeeded(&self) -> bool {
        self.failed_stage().is_none()
    }
}

#[derive(Debug, Default)]
struct LoopStats {
    iterations: u64,
    quiescent: u64,
    checks: u64,
}

/// Drives a built [`Topology`] to completion.
pub struct Multiplexer {
    name: String,
    poll_timeout: Duration,
    topology: Topology,
    verifier: IntegrityVerifier,
    stop: StopHandle,
    metrics: PipelineMetrics,
    link_metrics: Vec<LinkMetrics>,
    span: Span,
}

impl Multiplexer {
    /// Wrap an already built topology.
    pub fn new(config: &PipelineConfig, topology: Topology) -> Self {
        let span = span_pipeline(&config.name, topology.stage_count());
        Self::with_span(config, topology, span)
    }

    /// Build the topology for `config` and wrap it.
    ///
    /// Stage spawning and the later run share one `pipeline` span.
    pub fn build(config: &PipelineConfig, input: EndpointFd, output: EndpointFd) -> Result<Self> {
        let span = span_pipeline(&config.name, config.stages);
        let topology = span.in_scope(|| Topology::build(config, input, output))?;
        Ok(Self::with_span(config, topology, span))
    }

    fn with_span(config: &PipelineConfig, topology: Topology, span: Span) -> Self {
        let link_metrics = (0..topology.link_count())
            .map(|j| LinkMetrics::new(&config.name, j))
            .collect();
        Self {
            name: config.name.clone(),
            poll_timeout: config.poll_timeout,
            topology,
            verifier: IntegrityVerifier::new(config.verify),
            stop: StopHandle::new(),
            metrics: PipelineMetrics::new(&config.name),
            link_metrics,
            span,
        }
    }

    /// Handle that cancels this run.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// The wired pipeline.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Run until the output has received end-of-stream, a stop is requested,
    /// or a fatal error occurs.
    ///
    /// Every endpoint is closed and every stage reaped before this returns.
    /// On error the stages are killed first.
    pub fn run(mut self) -> Result<RunReport> {
        let _span = self.span.clone().entered();
        let start = Instant::now();
        let mut stats = LoopStats::default();

        let outcome = match self.drive(&mut stats) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.record_error();
                trace_error(&self.name, &e);
                if let Err(teardown) = self.topology.shutdown(true) {
                    tracing::warn!(error = %teardown, "teardown after failure incomplete");
                }
                return Err(e);
            }
        };

        let stage_exits = self.topology.shutdown(false)?;
        let links = self.topology.links();
        let elapsed = start.elapsed();
        self.metrics.record_duration(elapsed);

        let report = RunReport {
            outcome,
            bytes_in: links.first().map_or(0, LinkBuffer::bytes_in),
            bytes_out: links.last().map_or(0, LinkBuffer::bytes_out),
            iterations: stats.iterations,
            quiescent_iterations: stats.quiescent,
            checks: stats.checks,
            checksums: self.topology.checksums(),
            stage_exits,
            elapsed,
        };

        tracing::info!(
            outcome = ?report.outcome,
            bytes_in = report.bytes_in,
            bytes_out = report.bytes_out,
            iterations = report.iterations,
            quiescent = report.quiescent_iterations,
            checks = report.checks,
            elapsed_ms = elapsed.as_millis() as u64,
            "pipeline finished"
        );
        Ok(report)
    }

    fn drive(&mut self, stats: &mut LoopStats) -> Result<Outcome> {
        let timeout = timespec(self.poll_timeout);
        let last = self.topology.link_count() - 1;

        loop {
            if self.stop.is_stopped() {
                tracing::info!(iteration = stats.iterations, "stop requested");
                return Ok(Outcome::Stopped);
            }

            let (endpoints, links) = self.topology.split_mut();
            close_finished_consumers(endpoints, links);

            if links[last].is_finished() {
                let checked = self.verifier.on_finish(links)?;
                stats.checks += checked as u64;
                self.metrics.record_checks(checked);
                ensure_drained(links)?;
                return Ok(Outcome::Completed);
            }

            stats.iterations += 1;
            self.metrics.record_iteration();

            let ready = match wait_ready(endpoints, links, &timeout) {
                Ok(ready) => ready,
                Err(Errno::INTR) => continue,
                Err(e) => return Err(e.into()),
            };

            if ready.is_empty() {
                stats.quiescent += 1;
                self.metrics.record_quiescent();
                trace_quiescent(
                    stats.iterations,
                    links.iter().filter(|l| l.is_drainable()).count(),
                );
                let checked = self.verifier.on_quiescence(links)?;
                stats.checks += checked as u64;
                self.metrics.record_checks(checked);
                continue;
            }

            for (slot, revents) in ready {
                let endpoint = &mut endpoints[slot];
                let j = endpoint.link();
                service(endpoint, revents, &mut links[j], &self.link_metrics[j])?;
            }
        }
    }
}

/// Build and run a pipeline in one call.
pub fn run_pipeline(
    config: &PipelineConfig,
    input: EndpointFd,
    output: EndpointFd,
) -> Result<RunReport> {
    Multiplexer::build(config, input, output)?.run()
}

/// Poll every interested endpoint once and return the ready ones as
/// `(slot, revents)`. An empty result means the timeout elapsed.
fn wait_ready(
    endpoints: &[Endpoint],
    links: &[LinkBuffer],
    timeout: &Timespec,
) -> rustix::io::Result<Vec<(usize, PollFlags)>> {
    let mut slots = Vec::with_capacity(endpoints.len());
    let mut fds = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        let interest = endpoint.interest(&links[endpoint.link()]);
        if let (Some(flags), Some(fd)) = (interest, endpoint.fd()) {
            slots.push(endpoint.id().slot);
            fds.push(PollFd::from_borrowed_fd(fd, flags));
        }
    }

    if poll(&mut fds, Some(timeout))? == 0 {
        return Ok(Vec::new());
    }

    Ok(slots
        .into_iter()
        .zip(&fds)
        .filter_map(|(slot, fd)| {
            let revents = fd.revents();
            (!revents.is_empty()).then_some((slot, revents))
        })
        .collect())
}

/// Perform the single read or write a ready endpoint is owed.
fn service(
    endpoint: &mut Endpoint,
    revents: PollFlags,
    link: &mut LinkBuffer,
    metrics: &LinkMetrics,
) -> Result<()> {
    if revents.contains(PollFlags::NVAL) {
        return Err(Error::io(
            endpoint.id(),
            io::Error::new(io::ErrorKind::InvalidInput, "descriptor is not open"),
        ));
    }

    match endpoint.role() {
        Role::Producer(_) => match endpoint.fill(link) {
            Ok(FillOutcome::Filled(n)) => {
                metrics.record_fill(n);
                trace_link_filled(link.index(), n, link.checksum());
            }
            Ok(FillOutcome::EndOfStream) => {
                trace_eos(link.index(), link.bytes_in(), link.checksum());
                endpoint.close();
            }
            Err(e) if is_transient(&e) => {}
            Err(e) => return Err(Error::io(endpoint.id(), e)),
        },
        Role::Consumer(_) => match endpoint.drain(link) {
            Ok(n) => {
                metrics.record_drain(n, link.size());
                trace_link_drained(link.index(), n, link.size());
            }
            Err(e) if is_transient(&e) => {}
            Err(e) => return Err(Error::io(endpoint.id(), e)),
        },
    }
    Ok(())
}

/// Close the consumer of every link that has seen end-of-stream and been
/// fully drained, so the next stage reads end-of-stream in turn.
fn close_finished_consumers(endpoints: &mut [Endpoint], links: &[LinkBuffer]) {
    for endpoint in endpoints.iter_mut() {
        if endpoint.is_open()
            && !endpoint.role().is_producer()
            && links[endpoint.link()].is_finished()
        {
            endpoint.close();
        }
    }
}

fn timespec(duration: Duration) -> Timespec {
    Timespec {
        tv_sec: Secs::try_from(duration.as_secs()).unwrap_or(Secs::MAX),
        tv_nsec: duration.subsec_nanos() as Nsecs,
    }
}
