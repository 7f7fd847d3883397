// Licensed under the Apache-2.0 license

//! Request transport to the secure enclave.
//!
//! A request moves through a small state machine:
//!
//! ```text
//!            begin()            poll(): response, matching sequence
//!   Idle ─────────────▶ Sent ─────────────────────────────────────▶ Completed
//!    ▲                   │ │                                            │
//!    │                   │ ├── poll(): header error ──▶ Rejected        │
//!    │                   │ ├── poll(): ours, after a stale one ──▶ Discarded
//!    │                   │ └── poll(): stale response, keep waiting     │
//!    │                   │                                              │
//!    │                   └── poll(): deadline passed ──▶ TimedOut       │
//!    │                                                      │           │
//!    └──────────────────────── finish() ◀───────────────────┴───────────┘
//! ```
//!
//! Each request gets a fresh sequence number in the packet header. The
//! enclave echoes it back, so a response that turns up after its request
//! already timed out is recognised and never taken as the answer to the
//! current request. That late response was written over the current
//! request's packet, possibly before the enclave read it, so the current
//! request is waited out and then failed with `Stale`. Waiting for its
//! own completion drains the enclave's backlog; the next request starts
//! clean.

use core::task::Poll;

use drv_se_services_api::{GlobalAddr, ServiceHeader, ServiceId, ServicesError, Timeout};
use heapless::HistoryBuffer;
use log::{debug, trace, warn};
use zerocopy::FromBytes;

/// Number of recent transport events kept for post-mortem inspection.
pub const TRACE_DEPTH: usize = 16;

/// Reasons the doorbell could not be rung.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DoorbellError {
    /// The channel still holds an unacknowledged message.
    Busy,
    /// The channel to the enclave is not open.
    NotConnected,
}

/// The notification path to the enclave.
///
/// `bytes` is the shared packet memory itself. Hardware implementations
/// only need the global address; the slices are there so a software
/// enclave can sit behind the same interface.
pub trait Doorbell {
    /// Tells the enclave a packet for `service` is ready at `packet`.
    fn ring(
        &mut self,
        service: ServiceId,
        packet: GlobalAddr,
        bytes: &[u8],
    ) -> Result<(), DoorbellError>;

    /// Returns true if the enclave has signalled a completion since the
    /// last call.
    fn poll(&mut self, bytes: &mut [u8]) -> bool;
}

/// Monotonic time source for request deadlines.
pub trait Clock {
    fn now_ms(&self) -> u64;

    /// Called between unsuccessful polls.
    fn idle(&mut self) {
        core::hint::spin_loop();
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    Idle,
    Sent {
        service: ServiceId,
        sequence: u32,
        started: u64,
        timeout: Timeout,
        /// A stale completion has landed on this request's packet.
        overwritten: bool,
    },
    Completed {
        service: ServiceId,
        sequence: u32,
    },
    /// The enclave refused the packet.
    Rejected {
        service: ServiceId,
        sequence: u32,
    },
    /// The enclave answered, but the packet it worked on may not have
    /// been the one sent.
    Discarded {
        service: ServiceId,
        sequence: u32,
    },
    TimedOut {
        service: ServiceId,
        sequence: u32,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    Sent { service: ServiceId, sequence: u32 },
    Completed { sequence: u32 },
    Rejected { sequence: u32, error: u16 },
    Stale { expected: u32, got: u32 },
    Discarded { service: ServiceId, sequence: u32 },
    TimedOut { service: ServiceId, sequence: u32 },
    DoorbellFailed(DoorbellError),
}

/// Running totals since the transport was created.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TransportStats {
    pub sent: u32,
    pub completed: u32,
    pub rejected: u32,
    pub timed_out: u32,
    pub stale: u32,
    pub discarded: u32,
}

fn bump(counter: &mut u32) {
    *counter = counter.wrapping_add(1);
}

/// Orders packet memory accesses against the doorbell.
#[inline]
fn barrier() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    cortex_m::asm::dsb();
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

pub struct Transport<D, C> {
    doorbell: D,
    clock: C,
    state: State,
    sequence: u32,
    stats: TransportStats,
    trace: HistoryBuffer<Trace, TRACE_DEPTH>,
}

impl<D: Doorbell, C: Clock> Transport<D, C> {
    pub fn new(doorbell: D, clock: C) -> Self {
        Self {
            doorbell,
            clock,
            state: State::Idle,
            sequence: 0,
            stats: TransportStats::default(),
            trace: HistoryBuffer::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    pub fn trace(&self) -> &HistoryBuffer<Trace, TRACE_DEPTH> {
        &self.trace
    }

    pub fn doorbell(&self) -> &D {
        &self.doorbell
    }

    pub fn doorbell_mut(&mut self) -> &mut D {
        &mut self.doorbell
    }

    pub(crate) fn idle(&mut self) {
        self.clock.idle();
    }

    // Zero never goes on the wire, so a zeroed buffer can't look like a
    // response to anything.
    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        if self.sequence == 0 {
            self.sequence = 1;
        }
        self.sequence
    }

    /// Stamps the header and rings the doorbell. `Idle` → `Sent`.
    ///
    /// Returns the sequence number assigned to the request.
    pub fn begin(
        &mut self,
        service: ServiceId,
        packet: GlobalAddr,
        bytes: &mut [u8],
        timeout: Timeout,
    ) -> Result<u32, ServicesError> {
        if self.state != State::Idle {
            return Err(ServicesError::InvalidState);
        }

        let sequence = self.next_sequence();
        let (header, _) = ServiceHeader::mut_from_prefix(bytes)
            .map_err(|_| ServicesError::PacketTooLarge)?;
        *header = ServiceHeader {
            service_id: service.raw(),
            sequence,
            ..ServiceHeader::default()
        };

        barrier();
        let started = self.clock.now_ms();
        if let Err(e) = self.doorbell.ring(service, packet, bytes) {
            warn!("se: doorbell for {service:?} failed: {e:?}");
            self.trace.write(Trace::DoorbellFailed(e));
            return Err(ServicesError::DoorbellFailed);
        }

        debug!("se: -> {service:?} seq {sequence} at {:#010x}", packet.get());
        bump(&mut self.stats.sent);
        self.trace.write(Trace::Sent { service, sequence });
        self.state = State::Sent {
            service,
            sequence,
            started,
            timeout,
            overwritten: false,
        };
        Ok(sequence)
    }

    /// Checks once for completion. `Sent` → `Completed` / `Rejected` /
    /// `Discarded` / `TimedOut`.
    ///
    /// Once this returns `Ready`, the request is over; call [`finish`]
    /// before starting another. The packet may only be read after
    /// `Ready(Ok(()))`.
    ///
    /// [`finish`]: Transport::finish
    pub fn poll(&mut self, bytes: &mut [u8]) -> Poll<Result<(), ServicesError>> {
        let State::Sent {
            service,
            sequence,
            started,
            timeout,
            overwritten,
        } = self.state
        else {
            return Poll::Ready(Err(ServicesError::InvalidState));
        };

        if self.doorbell.poll(bytes) {
            barrier();
            let header = ServiceHeader::read_from_prefix(bytes)
                .map(|(h, _)| h)
                .map_err(|_| ServicesError::PacketTooLarge)?;

            if header.is_response() && header.sequence == sequence {
                if overwritten {
                    warn!("se: {service:?} seq {sequence} discarded after stale completion");
                    self.state = State::Discarded { service, sequence };
                    bump(&mut self.stats.discarded);
                    self.trace.write(Trace::Discarded { service, sequence });
                    return Poll::Ready(Err(ServicesError::Stale));
                }
                if header.error != 0 {
                    warn!(
                        "se: {service:?} seq {sequence} rejected: {:#x}",
                        header.error
                    );
                    self.state = State::Rejected { service, sequence };
                    bump(&mut self.stats.rejected);
                    self.trace.write(Trace::Rejected {
                        sequence,
                        error: header.error,
                    });
                    return Poll::Ready(Err(ServicesError::Rejected));
                }
                debug!("se: <- {service:?} seq {sequence}");
                self.state = State::Completed { service, sequence };
                bump(&mut self.stats.completed);
                self.trace.write(Trace::Completed { sequence });
                return Poll::Ready(Ok(()));
            }

            warn!(
                "se: stale completion seq {} while waiting for {sequence}",
                header.sequence
            );
            bump(&mut self.stats.stale);
            self.trace.write(Trace::Stale {
                expected: sequence,
                got: header.sequence,
            });
            self.state = State::Sent {
                service,
                sequence,
                started,
                timeout,
                overwritten: true,
            };
        }

        let elapsed = self.clock.now_ms().saturating_sub(started);
        if timeout.expired(elapsed) {
            warn!("se: {service:?} seq {sequence} timed out after {elapsed} ms");
            bump(&mut self.stats.timed_out);
            self.trace.write(Trace::TimedOut { service, sequence });
            self.state = State::TimedOut { service, sequence };
            return Poll::Ready(Err(ServicesError::Timeout));
        }

        trace!("se: {service:?} seq {sequence} pending, {elapsed} ms");
        Poll::Pending
    }

    /// Ends the current request, whatever its outcome. `*` → `Idle`.
    pub fn finish(&mut self) {
        self.state = State::Idle;
    }

    /// Sends a request and blocks until it completes or times out.
    pub fn send_request(
        &mut self,
        service: ServiceId,
        packet: GlobalAddr,
        bytes: &mut [u8],
        timeout: Timeout,
    ) -> Result<(), ServicesError> {
        self.begin(service, packet, bytes, timeout)?;
        let result = loop {
            match self.poll(bytes) {
                Poll::Ready(result) => break result,
                Poll::Pending => self.clock.idle(),
            }
        };
        self.finish();
        result
    }
}
