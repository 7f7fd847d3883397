// Licensed under the Apache-2.0 license

//! Software stand-ins for the enclave and the system timer.
//!
//! [`MockEnclave`] answers requests through a caller-supplied responder,
//! the way the enclave firmware would: it echoes the header, sets
//! [`FLAG_RESPONSE`] and lets the responder fill the response fields.
//! Completions are delivered oldest-request-first, so a request that
//! timed out gets its (late) answer before the one that replaced it.

use core::cell::Cell;

use drv_se_services_api::{
    GlobalAddr, ServiceHeader, ServiceId, ServicePacket, FLAG_RESPONSE, PACKET_BUFFER_SIZE,
};
use heapless::{Deque, Vec};
use zerocopy::FromBytes;

use crate::transport::{Clock, Doorbell, DoorbellError};

const MAX_OUTSTANDING: usize = 8;
const MAX_RECORDED: usize = 32;

/// When the mock answers a rung doorbell.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Behavior {
    /// On the first poll.
    Immediate,
    /// After this many unsuccessful polls.
    AfterPolls(u32),
    /// Never.
    Silent,
}

/// A request as it looked when the doorbell was rung.
#[derive(Clone, Debug)]
pub struct Request {
    pub service: ServiceId,
    pub packet: GlobalAddr,
    pub sequence: u32,
    pub bytes: [u8; PACKET_BUFFER_SIZE],
}

impl Request {
    /// Decodes the recorded bytes as `P`.
    pub fn packet<P: ServicePacket>(&self) -> Option<P> {
        P::read_from_prefix(&self.bytes[..]).ok().map(|(p, _)| p)
    }
}

#[derive(Copy, Clone, Debug)]
struct Outstanding {
    service: ServiceId,
    sequence: u32,
}

/// A scripted enclave.
///
/// The responder sees the packet bytes with the original request still
/// in place. It writes the response fields and returns `Err(code)` to
/// reject the packet with a header error.
pub struct MockEnclave<F> {
    responder: F,
    behavior: Behavior,
    polls: u32,
    fail_ring: Option<DoorbellError>,
    rung: u32,
    outstanding: Deque<Outstanding, MAX_OUTSTANDING>,
    requests: Vec<Request, MAX_RECORDED>,
}

impl<F> MockEnclave<F>
where
    F: FnMut(ServiceId, &mut [u8]) -> Result<(), u16>,
{
    pub fn new(responder: F) -> Self {
        Self {
            responder,
            behavior: Behavior::Immediate,
            polls: 0,
            fail_ring: None,
            rung: 0,
            outstanding: Deque::new(),
            requests: Vec::new(),
        }
    }

    pub fn set_behavior(&mut self, behavior: Behavior) {
        self.behavior = behavior;
        self.polls = 0;
    }

    /// Makes the next `ring` fail with `err`.
    pub fn fail_next_ring(&mut self, err: DoorbellError) {
        self.fail_ring = Some(err);
    }

    /// Number of successful rings so far.
    pub fn rung(&self) -> u32 {
        self.rung
    }

    /// The most recent requests, oldest first. Recording stops once the
    /// log is full.
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn last_request(&self) -> Option<&Request> {
        self.requests.last()
    }

    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }

    fn respond(&mut self, to: Outstanding, bytes: &mut [u8]) {
        let result = (self.responder)(to.service, bytes);
        if let Ok((header, _)) = ServiceHeader::mut_from_prefix(bytes) {
            header.service_id = to.service.raw();
            header.sequence = to.sequence;
            header.flags |= FLAG_RESPONSE;
            header.error = match result {
                Ok(()) => 0,
                Err(code) => code,
            };
        }
    }
}

impl<F> Doorbell for MockEnclave<F>
where
    F: FnMut(ServiceId, &mut [u8]) -> Result<(), u16>,
{
    fn ring(
        &mut self,
        service: ServiceId,
        packet: GlobalAddr,
        bytes: &[u8],
    ) -> Result<(), DoorbellError> {
        if let Some(err) = self.fail_ring.take() {
            return Err(err);
        }

        let sequence = ServiceHeader::read_from_prefix(bytes)
            .map(|(h, _)| h.sequence)
            .map_err(|_| DoorbellError::NotConnected)?;

        let mut recorded = [0; PACKET_BUFFER_SIZE];
        let n = bytes.len().min(PACKET_BUFFER_SIZE);
        recorded[..n].copy_from_slice(&bytes[..n]);
        let _ = self.requests.push(Request {
            service,
            packet,
            sequence,
            bytes: recorded,
        });

        if self.outstanding.is_full() {
            self.outstanding.pop_front();
        }
        let _ = self.outstanding.push_back(Outstanding { service, sequence });
        self.rung += 1;
        Ok(())
    }

    fn poll(&mut self, bytes: &mut [u8]) -> bool {
        let Some(&next) = self.outstanding.front() else {
            return false;
        };
        match self.behavior {
            Behavior::Silent => return false,
            Behavior::AfterPolls(n) => {
                if self.polls < n {
                    self.polls += 1;
                    return false;
                }
            }
            Behavior::Immediate => {}
        }
        self.polls = 0;
        self.outstanding.pop_front();
        self.respond(next, bytes);
        true
    }
}

/// A clock that only moves when told to, or by `step` ms per idle.
pub struct ManualClock {
    now: Cell<u64>,
    step: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::with_step(1)
    }

    pub fn with_step(step: u64) -> Self {
        Self {
            now: Cell::new(0),
            step,
        }
    }

    pub fn now(&self) -> u64 {
        self.now.get()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for &ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn idle(&mut self) {
        self.advance(self.step);
    }
}
