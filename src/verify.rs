//! Integrity verification over link checksums.
//!
//! Every link keeps a running sum of the bytes read into it. With
//! byte-preserving stages, whatever entered link `j` eventually enters link
//! `j + 1`, so once a hop has fully passed its data the two sums must match.
//! A mismatch means bytes were lost or duplicated inside the multiplexer.
//!
//! Sums catch loss and duplication, not reordering or deliberate tampering.
//! Stages that transform their input break the precondition; run those
//! pipelines with [`VerifyMode::Off`].

use crate::config::VerifyMode;
use crate::error::{Error, Result};
use crate::link::LinkBuffer;

/// True once every byte that entered `upstream` has gone through the stage
/// and the stage has closed its output into `downstream`.
pub fn hop_settled(upstream: &LinkBuffer, downstream: &LinkBuffer) -> bool {
    upstream.is_finished() && downstream.is_exhausted()
}

/// Fail unless every link has seen end-of-stream and delivered every byte.
///
/// Runs regardless of [`VerifyMode`]: it does not depend on stages being
/// byte-preserving.
pub fn ensure_drained(links: &[LinkBuffer]) -> Result<()> {
    match links.iter().find(|link| !link.is_finished()) {
        Some(link) => Err(Error::Undelivered {
            link: link.index(),
            pending: link.size(),
        }),
        None => Ok(()),
    }
}

/// Compare every adjacent pair of checksums.
///
/// Returns the number of pairs compared, or the first mismatch.
pub fn verify_checksums(checksums: &[u64]) -> Result<usize> {
    for (upstream, pair) in checksums.windows(2).enumerate() {
        check_pair(upstream, pair[0], pair[1])?;
    }
    Ok(checksums.len().saturating_sub(1))
}

fn check_pair(upstream: usize, upstream_checksum: u64, downstream_checksum: u64) -> Result<()> {
    if upstream_checksum == downstream_checksum {
        return Ok(());
    }
    Err(Error::IntegrityMismatch {
        upstream,
        downstream: upstream + 1,
        upstream_checksum,
        downstream_checksum,
    })
}

/// Runs checksum comparisons according to a [`VerifyMode`].
#[derive(Debug, Clone, Copy)]
pub struct IntegrityVerifier {
    mode: VerifyMode,
}

impl IntegrityVerifier {
    /// Create a verifier.
    pub fn new(mode: VerifyMode) -> Self {
        Self { mode }
    }

    /// Check to run on a quiescent iteration.
    ///
    /// Returns the number of pairs compared.
    pub fn on_quiescence(&self, links: &[LinkBuffer]) -> Result<usize> {
        match self.mode {
            VerifyMode::Off => Ok(0),
            VerifyMode::Settled => Self::verify_settled(links),
            VerifyMode::Strict => Self::verify_all(links),
        }
    }

    /// Check to run once the output has reached end-of-stream.
    ///
    /// Every pair is compared: a hop that has not settled by now has lost
    /// data.
    pub fn on_finish(&self, links: &[LinkBuffer]) -> Result<usize> {
        match self.mode {
            VerifyMode::Off => Ok(0),
            VerifyMode::Settled | VerifyMode::Strict => Self::verify_all(links),
        }
    }

    /// Compare every adjacent pair of links regardless of progress.
    pub fn verify_all(links: &[LinkBuffer]) -> Result<usize> {
        let checksums: Vec<u64> = links.iter().map(LinkBuffer::checksum).collect();
        verify_checksums(&checksums)
    }

    /// Compare only pairs whose hop has settled.
    pub fn verify_settled(links: &[LinkBuffer]) -> Result<usize> {
        let mut compared = 0;
        for (upstream, pair) in links.windows(2).enumerate() {
            if hop_settled(&pair[0], &pair[1]) {
                check_pair(upstream, pair[0].checksum(), pair[1].checksum())?;
                compared += 1;
            }
        }
        Ok(compared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_with(index: usize, bytes: &[u8], drained: bool, exhausted: bool) -> LinkBuffer {
        let mut link = LinkBuffer::new(index, 64);
        if !bytes.is_empty() {
            link.fill_with(|buf| {
                buf[..bytes.len()].copy_from_slice(bytes);
                Ok(bytes.len())
            })
            .unwrap();
        }
        if drained && link.is_drainable() {
            link.drain_with(|d| Ok(d.len())).unwrap();
        }
        if exhausted {
            assert!(link.is_fillable());
            link.fill_with(|_| Ok(0)).unwrap();
        }
        link
    }

    #[test]
    fn test_equal_checksums_pass() {
        assert_eq!(verify_checksums(&[500, 500, 500, 500]).unwrap(), 3);
    }

    #[test]
    fn test_single_link_has_no_pairs() {
        assert_eq!(verify_checksums(&[42]).unwrap(), 0);
        assert_eq!(verify_checksums(&[]).unwrap(), 0);
    }

    #[test]
    fn test_mismatch_names_first_bad_pair() {
        let err = verify_checksums(&[10, 10, 11, 12]).unwrap_err();
        match err {
            Error::IntegrityMismatch {
                upstream,
                downstream,
                upstream_checksum,
                downstream_checksum,
            } => {
                assert_eq!((upstream, downstream), (1, 2));
                assert_eq!((upstream_checksum, downstream_checksum), (10, 11));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_stalled_links_give_deterministic_result() {
        // Every link holds undelivered bytes; the verdict depends only on the sums.
        let stalled = [
            link_with(0, b"abc", false, false),
            link_with(1, b"abc", false, false),
            link_with(2, b"abd", false, false),
        ];
        let verifier = IntegrityVerifier::new(VerifyMode::Strict);
        for _ in 0..3 {
            let err = verifier.on_quiescence(&stalled).unwrap_err();
            assert!(err.is_integrity());
        }

        let agreeing = [
            link_with(0, b"abc", false, false),
            link_with(1, b"cab", false, false),
        ];
        assert_eq!(verifier.on_quiescence(&agreeing).unwrap(), 1);
    }

    #[test]
    fn test_settled_skips_hops_in_flight() {
        // Link 0 finished, but link 1 has not seen end-of-stream: stage 0 may
        // still hold bytes, so the pair is not compared.
        let links = [
            link_with(0, b"hello", true, true),
            link_with(1, b"hel", true, false),
        ];
        assert_eq!(IntegrityVerifier::verify_settled(&links).unwrap(), 0);
        assert!(IntegrityVerifier::verify_all(&links).is_err());
    }

    #[test]
    fn test_settled_compares_finished_hops() {
        let links = [
            link_with(0, b"hello", true, true),
            link_with(1, b"hello", true, true),
            link_with(2, b"hellox", true, true),
        ];
        let err = IntegrityVerifier::verify_settled(&links).unwrap_err();
        assert!(matches!(
            err,
            Error::IntegrityMismatch {
                upstream: 1,
                downstream: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_off_never_compares() {
        let links = [
            link_with(0, b"a", true, true),
            link_with(1, b"b", true, true),
        ];
        let verifier = IntegrityVerifier::new(VerifyMode::Off);
        assert_eq!(verifier.on_quiescence(&links).unwrap(), 0);
        assert_eq!(verifier.on_finish(&links).unwrap(), 0);
    }

    #[test]
    fn test_finish_compares_unsettled_hops() {
        // Link 0 still holds bytes the stage never took; link 1 is done.
        let links = [
            link_with(0, b"lost bytes", false, false),
            link_with(1, b"", true, true),
        ];
        let verifier = IntegrityVerifier::new(VerifyMode::Settled);
        assert_eq!(verifier.on_quiescence(&links).unwrap(), 0);

        let err = verifier.on_finish(&links).unwrap_err();
        assert!(matches!(
            err,
            Error::IntegrityMismatch {
                upstream: 0,
                downstream: 1,
                downstream_checksum: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_ensure_drained() {
        let done = [
            link_with(0, b"abc", true, true),
            link_with(1, b"abc", true, true),
        ];
        assert!(ensure_drained(&done).is_ok());

        let holding = [
            link_with(0, b"abc", false, false),
            link_with(1, b"", true, true),
        ];
        let err = ensure_drained(&holding).unwrap_err();
        assert!(matches!(err, Error::Undelivered { link: 0, pending: 3 }));

        // Empty but never closed: the input was not read to the end.
        let unread = [link_with(0, b"", false, false), link_with(1, b"", true, true)];
        let err = ensure_drained(&unread).unwrap_err();
        assert!(matches!(err, Error::Undelivered { link: 0, pending: 0 }));
    }

    #[test]
    fn test_hop_settled() {
        let finished = link_with(0, b"x", true, true);
        let open = link_with(1, b"x", true, false);
        let closed = link_with(1, b"x", true, true);
        assert!(!hop_settled(&finished, &open));
        assert!(hop_settled(&finished, &closed));
        assert!(!hop_settled(&open, &closed));
    }
}
