// Licensed under the Apache-2.0 license

use drv_se_services_api::{LocalAddr, ServiceId, ServicePacket, ServicesError, PACKET_BUFFER_SIZE};

/// Memory shared with the enclave for one request at a time.
///
/// The integrator is responsible for placing this where the enclave can
/// reach it coherently (non-cacheable or write-through SRAM), and for
/// not moving it while a request is outstanding.
#[repr(C, align(8))]
pub struct PacketBuffer<const N: usize = PACKET_BUFFER_SIZE> {
    bytes: [u8; N],
}

impl<const N: usize> PacketBuffer<N> {
    pub const fn new() -> Self {
        Self { bytes: [0; N] }
    }

    /// Fails with `PacketTooLarge` if `size` bytes do not fit.
    pub fn check(size: usize) -> Result<(), ServicesError> {
        if size > N {
            Err(ServicesError::PacketTooLarge)
        } else {
            Ok(())
        }
    }

    /// Clears the buffer and hands out a typed view of its start.
    ///
    /// On error the buffer is left untouched.
    pub fn acquire<P: ServicePacket>(
        &mut self,
        service: ServiceId,
    ) -> Result<&mut P, ServicesError> {
        if service.layout() != P::SHAPE {
            return Err(ServicesError::LayoutMismatch);
        }
        Self::check(core::mem::size_of::<P>())?;

        self.bytes.fill(0);
        let (packet, _) =
            P::mut_from_prefix(&mut self.bytes[..]).map_err(|_| ServicesError::PacketTooLarge)?;
        packet.header_mut().service_id = service.raw();
        Ok(packet)
    }

    /// Borrows the packet in place.
    pub fn view<P: ServicePacket>(&self) -> Result<&P, ServicesError> {
        P::ref_from_prefix(&self.bytes[..])
            .map(|(p, _)| p)
            .map_err(|_| ServicesError::PacketTooLarge)
    }

    /// Copies the packet out.
    pub fn read<P: ServicePacket>(&self) -> Result<P, ServicesError> {
        P::read_from_prefix(&self.bytes[..])
            .map(|(p, _)| p)
            .map_err(|_| ServicesError::PacketTooLarge)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Where the buffer currently lives, as seen by this core.
    pub fn local_addr(&self) -> LocalAddr {
        // Only 32-bit cores share the buffer with the enclave; on a wider
        // host the truncated value is just a tag for software doorbells.
        LocalAddr::new(self.bytes.as_ptr() as usize as u32)
    }
}

impl<const N: usize> Default for PacketBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
