//! Topology builder: links, endpoints and stage processes.
//!
//! For `N` stages the builder creates `N + 1` link buffers, spawns `N` copies
//! of the filter program and wires them into an endpoint table:
//!
//! ```text
//!  input ─P0─▶ [link 0] ─C0─▶ stage 0 ─P1─▶ [link 1] ─C1─▶ stage 1 ─P2─▶ [link 2] ─C2─▶ output
//! ```
//!
//! `Pj` is the producer endpoint of link `j` (the descriptor read from) and
//! `Cj` its consumer endpoint (the descriptor written to). Stage `i` reads
//! its standard input from `Ci` and writes its standard output into `P(i+1)`.
//!
//! Construction is all-or-nothing: if any pipe or spawn fails, every stage
//! spawned so far is terminated and reaped and every pipe end is closed before
//! the error is returned.

use crate::config::PipelineConfig;
use crate::endpoint::{Endpoint, EndpointFd, EndpointId, Role};
use crate::error::{Error, Result};
use crate::link::LinkBuffer;
use crate::observability::instrument_stage;
use crate::stage::{StageControl, StageExit, StageProcess, StageSet};
use rustix::fd::OwnedFd;
use rustix::pipe::{PipeFlags, pipe_with};
use std::process::{Command, Stdio};

/// A fully wired pipeline, ready for the multiplexer.
#[derive(Debug)]
pub struct Topology {
    links: Vec<LinkBuffer>,
    endpoints: Vec<Endpoint>,
    stages: StageSet,
}

/// Parent-side ends of a freshly spawned stage.
struct SpawnedStage {
    process: StageProcess,
    /// Write end feeding the stage's standard input.
    stdin: OwnedFd,
    /// Read end draining the stage's standard output.
    stdout: OwnedFd,
}

impl Topology {
    /// Build the pipeline described by `config` between `input` and `output`.
    ///
    /// The boundary descriptors are used as given; they are not switched to
    /// non-blocking mode.
    pub fn build(config: &PipelineConfig, input: EndpointFd, output: EndpointFd) -> Result<Self> {
        config.validate()?;

        let links: Vec<LinkBuffer> = (0..config.link_count())
            .map(|j| LinkBuffer::new(j, config.chunk_size))
            .collect();

        // Declared before `stages` so a failed build drops the stage set first:
        // stages are killed and reaped, then the remaining pipe ends close.
        let mut endpoints = Vec::with_capacity(2 * config.link_count());
        let mut stages = StageSet::new();

        endpoints.push(Endpoint::new(EndpointId::new(0, Role::Producer(0)), input));

        for index in 0..config.stages {
            let spawned = spawn_stage(config, index)?;

            let slot = endpoints.len();
            endpoints.push(Endpoint::new(
                EndpointId::new(slot, Role::Consumer(index)),
                spawned.stdin.into(),
            ));
            endpoints.push(Endpoint::new(
                EndpointId::new(slot + 1, Role::Producer(index + 1)),
                spawned.stdout.into(),
            ));
            stages.push(spawned.process);
        }

        let slot = endpoints.len();
        endpoints.push(Endpoint::new(
            EndpointId::new(slot, Role::Consumer(config.stages)),
            output,
        ));

        tracing::debug!(
            pipeline = %config.name,
            links = links.len(),
            endpoints = endpoints.len(),
            stages = stages.len(),
            "topology built"
        );

        Ok(Self {
            links,
            endpoints,
            stages,
        })
    }

    /// Link buffers, in pipeline order.
    pub fn links(&self) -> &[LinkBuffer] {
        &self.links
    }

    /// The endpoint table.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Number of link buffers.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Number of spawned stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Find the endpoint with the given role.
    pub fn endpoint(&self, role: Role) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.role() == role)
    }

    /// Borrow the endpoint table and links mutably at the same time.
    pub fn split_mut(&mut self) -> (&mut [Endpoint], &mut [LinkBuffer]) {
        (&mut self.endpoints, &mut self.links)
    }

    /// Running checksum of every link, in pipeline order.
    pub fn checksums(&self) -> Vec<u64> {
        self.links.iter().map(LinkBuffer::checksum).collect()
    }

    /// Close every endpoint still open.
    pub fn close_all(&mut self) {
        for endpoint in &mut self.endpoints {
            endpoint.close();
        }
    }

    /// Close every endpoint and collect stage exit statuses.
    ///
    /// With `terminate` set, stages are killed first instead of being left to
    /// finish on end-of-stream.
    pub fn shutdown(&mut self, terminate: bool) -> Result<Vec<StageExit>> {
        self.close_all();
        if terminate {
            self.stages.terminate_all()
        } else {
            self.stages.reap()
        }
    }
}

fn spawn_stage(config: &PipelineConfig, index: usize) -> Result<SpawnedStage> {
    let program = config.filter.program.to_string_lossy();
    let _span = instrument_stage(&config.name, index, &program);

    let construction = |e: std::io::Error| Error::construction(Some(index), e);

    let (stdin_read, stdin_write) =
        pipe_with(PipeFlags::CLOEXEC).map_err(|e| construction(e.into()))?;
    let (stdout_read, stdout_write) =
        pipe_with(PipeFlags::CLOEXEC).map_err(|e| construction(e.into()))?;

    // Only the parent's ends; the child gets ordinary blocking descriptors.
    rustix::io::ioctl_fionbio(&stdin_write, true).map_err(|e| construction(e.into()))?;
    rustix::io::ioctl_fionbio(&stdout_read, true).map_err(|e| construction(e.into()))?;

    let child = Command::new(&config.filter.program)
        .args(&config.filter.args)
        .stdin(Stdio::from(stdin_read))
        .stdout(Stdio::from(stdout_write))
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(construction)?;

    let process = StageProcess::new(index, child);
    tracing::debug!(pid = process.pid(), "stage spawned");

    Ok(SpawnedStage {
        process,
        stdin: stdin_write,
        stdout: stdout_read,
    })
}
