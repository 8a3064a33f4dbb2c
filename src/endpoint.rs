//! Endpoints: descriptor-bound read or write roles on a link.
//!
//! Every link has exactly one producer endpoint and one consumer endpoint.
//! The mapping from endpoint to link is carried by [`Role`] rather than
//! derived from the endpoint's position in the table.

use crate::link::{FillOutcome, LinkBuffer};
use rustix::event::PollFlags;
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use std::fmt;
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

/// What an endpoint does to its link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Reads from its descriptor into the link.
    Producer(usize),
    /// Writes from the link to its descriptor.
    Consumer(usize),
}

impl Role {
    /// Index of the link this role acts on.
    pub fn link(&self) -> usize {
        match *self {
            Role::Producer(link) | Role::Consumer(link) => link,
        }
    }

    /// True for producer roles.
    pub fn is_producer(&self) -> bool {
        matches!(self, Role::Producer(_))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Producer(link) => write!(f, "producer of link {link}"),
            Role::Consumer(link) => write!(f, "consumer of link {link}"),
        }
    }
}

/// Identity of an endpoint: its slot in the endpoint table and its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId {
    /// Position in the endpoint table.
    pub slot: usize,
    /// Role on its link.
    pub role: Role,
}

impl EndpointId {
    /// Create an endpoint id.
    pub fn new(slot: usize, role: Role) -> Self {
        Self { slot, role }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint {} ({})", self.slot, self.role)
    }
}

/// A descriptor either owned by the pipeline or borrowed from the caller.
///
/// Borrowed descriptors (standard input and output, typically) are never
/// closed by the pipeline. Owned ones are closed when their endpoint closes.
#[derive(Debug)]
pub struct EndpointFd(FdHolder);

#[derive(Debug)]
enum FdHolder {
    Borrowed(RawFd),
    Owned(OwnedFd),
}

impl EndpointFd {
    /// Borrow the process's standard input.
    pub fn stdin() -> Self {
        EndpointFd(FdHolder::Borrowed(io::stdin().as_raw_fd()))
    }

    /// Borrow the process's standard output.
    pub fn stdout() -> Self {
        EndpointFd(FdHolder::Borrowed(io::stdout().as_raw_fd()))
    }

    /// Borrow a raw descriptor.
    ///
    /// # Safety
    /// The fd must be open and stay open until the pipeline has finished
    /// running.
    pub unsafe fn borrow_raw(fd: RawFd) -> Self {
        EndpointFd(FdHolder::Borrowed(fd))
    }

    /// Get the raw file descriptor.
    pub fn as_raw_fd(&self) -> RawFd {
        match &self.0 {
            FdHolder::Borrowed(fd) => *fd,
            FdHolder::Owned(fd) => fd.as_raw_fd(),
        }
    }
}

impl AsFd for EndpointFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.0 {
            // SAFETY: only built from the standard streams or through
            // `borrow_raw`, whose caller keeps the fd open for the run.
            FdHolder::Borrowed(fd) => unsafe { BorrowedFd::borrow_raw(*fd) },
            FdHolder::Owned(fd) => fd.as_fd(),
        }
    }
}

impl From<OwnedFd> for EndpointFd {
    fn from(fd: OwnedFd) -> Self {
        EndpointFd(FdHolder::Owned(fd))
    }
}

impl From<File> for EndpointFd {
    fn from(file: File) -> Self {
        EndpointFd(FdHolder::Owned(file.into()))
    }
}

/// One row of the endpoint table.
#[derive(Debug)]
pub struct Endpoint {
    id: EndpointId,
    fd: Option<EndpointFd>,
}

impl Endpoint {
    /// Create an open endpoint.
    pub fn new(id: EndpointId, fd: EndpointFd) -> Self {
        Self { id, fd: Some(fd) }
    }

    /// Endpoint identity.
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Role on its link.
    pub fn role(&self) -> Role {
        self.id.role
    }

    /// Index of the link this endpoint acts on.
    pub fn link(&self) -> usize {
        self.id.role.link()
    }

    /// True until the endpoint is closed.
    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Borrow the descriptor, if still open.
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }

    /// Close the endpoint. Owned descriptors are closed; borrowed ones are released.
    ///
    /// Closing is permanent: a closed endpoint is never polled again.
    pub fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            tracing::trace!(endpoint = %self.id, fd = fd.as_raw_fd(), "endpoint closed");
        }
    }

    /// Readiness this endpoint should wait for, given its link's occupancy.
    ///
    /// A producer is interested in reading only while its link is fillable and
    /// has not reached end-of-stream; a consumer is interested in writing only
    /// while its link is drainable. Both can never hold at once.
    pub fn interest(&self, link: &LinkBuffer) -> Option<PollFlags> {
        if !self.is_open() {
            return None;
        }
        match self.role() {
            Role::Producer(_) if link.is_fillable() && !link.is_exhausted() => Some(PollFlags::IN),
            Role::Consumer(_) if link.is_drainable() => Some(PollFlags::OUT),
            _ => None,
        }
    }

    /// Perform one read into `link`.
    pub fn fill(&self, link: &mut LinkBuffer) -> io::Result<FillOutcome> {
        let fd = self.open_fd()?;
        link.fill_with(|buf| rustix::io::read(fd, buf).map_err(io::Error::from))
    }

    /// Perform one write out of `link`. May accept fewer bytes than pending.
    pub fn drain(&self, link: &mut LinkBuffer) -> io::Result<usize> {
        let fd = self.open_fd()?;
        link.drain_with(|data| rustix::io::write(fd, data).map_err(io::Error::from))
    }

    fn open_fd(&self) -> io::Result<BorrowedFd<'_>> {
        self.fd()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "endpoint closed"))
    }
}

/// True if an I/O error only means "try again on a later iteration".
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
