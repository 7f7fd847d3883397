// Licensed under the Apache-2.0 license

//! Host side of the secure enclave services channel.
//!
//! A [`Services`] instance owns the shared [`PacketBuffer`], the
//! [`Transport`] that rings the enclave's doorbell, and the memory map
//! used to turn caller pointers into addresses the enclave can use.
//! Because every call takes `&mut self`, at most one request is in
//! flight per instance. Tasks that share an instance do so through
//! [`SharedServices`], which serializes them.
//!
//! The per-service wrappers live in [`cryptocell`]; [`SeRng`] exposes
//! the enclave TRNG as a `rand_core` generator.

#![cfg_attr(not(test), no_std)]

use core::future::Future;
use core::marker::PhantomData;
use core::pin::Pin;
use core::task::{Context, Poll};

use drv_se_services_api::{
    GlobalAddr, LocalAddr, Reply, ServiceId, ServicePacket, ServicesError, PACKET_BUFFER_SIZE,
};
use lib_addr_xlate::MemoryMap;

mod buffer;
pub mod config;
pub mod cryptocell;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod rng;
pub mod transport;

pub use buffer::PacketBuffer;
pub use config::ServicesConfig;
pub use rng::SeRng;
pub use transport::{Clock, Doorbell, DoorbellError, State, Trace, Transport, TransportStats};

/// Identifies an open services channel in logs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ServicesHandle(pub u32);

/// A services instance behind a lock, for use from several tasks.
pub type SharedServices<D, C> = spin::Mutex<Services<D, C>>;

/// Translates an optional buffer; an absent one is sent as null.
///
/// Local address 0 is the start of ITCM on the application cores, so it
/// cannot stand for "no buffer" and is translated like any other.
pub(crate) fn optional_global(map: &MemoryMap, addr: Option<LocalAddr>) -> GlobalAddr {
    addr.map_or(GlobalAddr::NULL, |a| map.to_global(a))
}

pub struct Services<D, C, const N: usize = PACKET_BUFFER_SIZE> {
    handle: ServicesHandle,
    config: ServicesConfig,
    buffer: PacketBuffer<N>,
    transport: Transport<D, C>,
}

impl<D: Doorbell, C: Clock, const N: usize> Services<D, C, N> {
    pub fn new(handle: ServicesHandle, doorbell: D, clock: C, config: ServicesConfig) -> Self {
        log::debug!(
            "se: open {:?}, {} byte buffer, timeout {:?}",
            handle,
            N,
            config.default_timeout
        );
        Self {
            handle,
            config,
            buffer: PacketBuffer::new(),
            transport: Transport::new(doorbell, clock),
        }
    }

    pub fn handle(&self) -> ServicesHandle {
        self.handle
    }

    pub fn config(&self) -> &ServicesConfig {
        &self.config
    }

    pub fn memory_map(&self) -> &MemoryMap {
        &self.config.memory_map
    }

    pub fn state(&self) -> State {
        self.transport.state()
    }

    pub fn stats(&self) -> TransportStats {
        self.transport.stats()
    }

    pub fn transport(&self) -> &Transport<D, C> {
        &self.transport
    }

    pub fn doorbell(&self) -> &D {
        self.transport.doorbell()
    }

    pub fn doorbell_mut(&mut self) -> &mut D {
        self.transport.doorbell_mut()
    }

    /// Global address of the packet buffer, as handed to the doorbell.
    pub fn packet_addr(&self) -> GlobalAddr {
        self.config.memory_map.to_global(self.buffer.local_addr())
    }

    /// Runs one request to completion.
    ///
    /// `fill` writes the request fields; `read` pulls the result out of
    /// the response and only runs if the transport succeeded.
    pub(crate) fn call<P, R>(
        &mut self,
        service: ServiceId,
        fill: impl FnOnce(&mut P, &MemoryMap),
        read: impl FnOnce(&P) -> R,
    ) -> Result<Reply<R>, ServicesError>
    where
        P: ServicePacket,
    {
        let packet = self.packet_addr();
        let request = self.buffer.acquire::<P>(service)?;
        fill(request, &self.config.memory_map);

        self.transport.send_request(
            service,
            packet,
            self.buffer.bytes_mut(),
            self.config.default_timeout,
        )?;

        let response = self.buffer.view::<P>()?;
        Ok(Reply::new(response.error_code(), read(response)))
    }

    /// Starts a request without waiting for it.
    ///
    /// The instance stays borrowed until the returned [`Pending`] is
    /// dropped, which also ends the request.
    pub fn submit<P: ServicePacket>(
        &mut self,
        service: ServiceId,
        fill: impl FnOnce(&mut P, &MemoryMap),
    ) -> Result<Pending<'_, P, D, C, N>, ServicesError> {
        let packet = self.packet_addr();
        let request = self.buffer.acquire::<P>(service)?;
        fill(request, &self.config.memory_map);

        self.transport.begin(
            service,
            packet,
            self.buffer.bytes_mut(),
            self.config.default_timeout,
        )?;

        Ok(Pending {
            services: self,
            _packet: PhantomData,
        })
    }
}

/// A request that has been sent but not yet waited for.
#[must_use]
pub struct Pending<'a, P, D: Doorbell, C: Clock, const N: usize> {
    services: &'a mut Services<D, C, N>,
    _packet: PhantomData<fn() -> P>,
}

impl<P: ServicePacket, D: Doorbell, C: Clock, const N: usize> Pending<'_, P, D, C, N> {
    /// Checks once for completion.
    ///
    /// After this has returned `Ready`, further calls return
    /// `Ready(Err(InvalidState))`.
    pub fn poll_once(&mut self) -> Poll<Result<Reply<P>, ServicesError>> {
        let services = &mut *self.services;
        match services.transport.poll(services.buffer.bytes_mut()) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => Poll::Ready(
                services
                    .buffer
                    .read::<P>()
                    .map(|p| Reply::new(p.error_code(), p)),
            ),
        }
    }

    /// Blocks until completion or timeout.
    pub fn wait(mut self) -> Result<Reply<P>, ServicesError> {
        loop {
            match self.poll_once() {
                Poll::Ready(result) => return result,
                Poll::Pending => self.services.transport.idle(),
            }
        }
    }
}

impl<P: ServicePacket, D: Doorbell, C: Clock, const N: usize> Future for Pending<'_, P, D, C, N> {
    type Output = Result<Reply<P>, ServicesError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let result = this.poll_once();
        if result.is_pending() {
            // The doorbell has no interrupt hookup here; ask to be polled
            // again.
            cx.waker().wake_by_ref();
        }
        result
    }
}

impl<P, D: Doorbell, C: Clock, const N: usize> Drop for Pending<'_, P, D, C, N> {
    fn drop(&mut self) {
        self.services.transport.finish();
    }
}
