//! Candidate buffering for one PeerSession.
//!
//! Local candidates wait for the peer identifier, remote candidates wait for both
//! session descriptions. Each queue is released exactly once; after that every
//! candidate passes straight through.

use crate::peer::types::IceCandidate;
use std::collections::VecDeque;

#[derive(Debug, Default)]
struct Gate {
    pending: VecDeque<IceCandidate>,
    released: bool,
}

impl Gate {
    fn push(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.released {
            Some(candidate)
        } else {
            self.pending.push_back(candidate);
            None
        }
    }

    fn release(&mut self) -> Vec<IceCandidate> {
        if self.released {
            return Vec::new();
        }
        self.released = true;
        self.pending.drain(..).collect()
    }

    fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

#[derive(Debug, Default)]
pub struct CandidateBuffer {
    local: Gate,
    remote: Gate,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the candidate back if it may be sent to the peer right away.
    pub fn push_local(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        self.local.push(candidate)
    }

    /// Opens the local gate. The first call yields everything queued, in order.
    pub fn release_local(&mut self) -> Vec<IceCandidate> {
        self.local.release()
    }

    /// Returns the candidate back if it may be applied to the connection right away.
    pub fn push_remote(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        self.remote.push(candidate)
    }

    pub fn release_remote(&mut self) -> Vec<IceCandidate> {
        self.remote.release()
    }

    pub fn pending_local(&self) -> usize {
        self.local.pending.len()
    }

    pub fn pending_remote(&self) -> usize {
        self.remote.pending.len()
    }

    /// Drops everything still queued and returns how many candidates were lost.
    pub fn discard(&mut self) -> usize {
        self.local.discard() + self.remote.discard()
    }
}
