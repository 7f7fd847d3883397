// Licensed under the Apache-2.0 license

use core::num::NonZeroU32;

use drv_se_services_api::{ServicesError, MAX_RND_LENGTH, PACKET_BUFFER_SIZE};
use rand_core::{CryptoRng, RngCore};

use crate::transport::{Clock, Doorbell};
use crate::Services;

const CUSTOM: NonZeroU32 = match NonZeroU32::new(rand_core::Error::CUSTOM_START) {
    Some(code) => code,
    None => panic!("CUSTOM_START is zero"),
};

/// `rand_core` error code for a failure reported by the enclave rather
/// than the transport.
pub const ENCLAVE_ERROR: u32 = 0x100;

fn transport_error(e: ServicesError) -> rand_core::Error {
    (CUSTOM | e.code()).into()
}

/// The enclave TRNG as a [`RngCore`].
///
/// Requests are split into `GetRnd` calls of at most [`MAX_RND_LENGTH`]
/// bytes. Custom error codes are `CUSTOM_START` plus the
/// [`ServicesError`] code, or plus [`ENCLAVE_ERROR`] if the enclave
/// reported a failure.
pub struct SeRng<'a, D, C, const N: usize = PACKET_BUFFER_SIZE> {
    services: &'a mut Services<D, C, N>,
}

impl<'a, D: Doorbell, C: Clock, const N: usize> SeRng<'a, D, C, N> {
    pub fn new(services: &'a mut Services<D, C, N>) -> Self {
        Self { services }
    }
}

impl<D: Doorbell, C: Clock, const N: usize> Services<D, C, N> {
    pub fn rng(&mut self) -> SeRng<'_, D, C, N> {
        SeRng::new(self)
    }
}

impl<D: Doorbell, C: Clock, const N: usize> RngCore for SeRng<'_, D, C, N> {
    fn next_u32(&mut self) -> u32 {
        rand_core::impls::next_u32_via_fill(self)
    }

    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_fill(self)
    }

    /// # Panics
    ///
    /// If the enclave cannot supply entropy. Use `try_fill_bytes` to
    /// handle that case.
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if let Err(e) = self.try_fill_bytes(dest) {
            panic!("enclave TRNG failed: {e}");
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        for chunk in dest.chunks_mut(MAX_RND_LENGTH) {
            let reply = self.services.get_rnd(chunk).map_err(transport_error)?;
            if !reply.error_code.is_ok() {
                log::warn!("se: GetRnd failed: {}", reply.error_code);
                return Err((CUSTOM | ENCLAVE_ERROR).into());
            }
        }
        Ok(())
    }
}

impl<D: Doorbell, C: Clock, const N: usize> CryptoRng for SeRng<'_, D, C, N> {}
