// Licensed under the Apache-2.0 license

//! Cryptocell service ids and packet layouts.
//!
//! Each service id selects exactly one packet layout ([`ServiceId::layout`]).
//! Several ids may share a layout: the four SHA services all use
//! [`ShaSvc`]. Every layout starts with a [`ServiceHeader`] and ends with
//! the enclave's `resp_error_code`.

use core::mem::size_of;

use num_derive::FromPrimitive;
use static_assertions::const_assert;

use crate::{ErrorCode, GlobalAddr, ServiceHeader, MAX_RND_LENGTH, PACKET_BUFFER_SIZE};

/// First id of the cryptocell service group.
pub const CRYPTOCELL_SERVICE_BASE: u16 = 300;

/// Cryptocell service identifiers.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum ServiceId {
    GetRnd = CRYPTOCELL_SERVICE_BASE,
    GetLcs = CRYPTOCELL_SERVICE_BASE + 1,
    TrngHardwarePoll = CRYPTOCELL_SERVICE_BASE + 2,
    AesInit = CRYPTOCELL_SERVICE_BASE + 3,
    AesSetKey = CRYPTOCELL_SERVICE_BASE + 4,
    AesCrypt = CRYPTOCELL_SERVICE_BASE + 5,
    ShaStarts = CRYPTOCELL_SERVICE_BASE + 6,
    ShaProcess = CRYPTOCELL_SERVICE_BASE + 7,
    ShaUpdate = CRYPTOCELL_SERVICE_BASE + 8,
    ShaFinish = CRYPTOCELL_SERVICE_BASE + 9,
    CcmGcmSetKey = CRYPTOCELL_SERVICE_BASE + 10,
    CcmGcmCrypt = CRYPTOCELL_SERVICE_BASE + 11,
    Chacha20Crypt = CRYPTOCELL_SERVICE_BASE + 12,
    ChachapolyCrypt = CRYPTOCELL_SERVICE_BASE + 13,
    Poly1305Crypt = CRYPTOCELL_SERVICE_BASE + 14,
    CmacInitSetkey = CRYPTOCELL_SERVICE_BASE + 15,
    CmacUpdate = CRYPTOCELL_SERVICE_BASE + 16,
    CmacFinish = CRYPTOCELL_SERVICE_BASE + 17,
    CmacReset = CRYPTOCELL_SERVICE_BASE + 18,
}

impl ServiceId {
    pub const ALL: [ServiceId; 19] = [
        ServiceId::GetRnd,
        ServiceId::GetLcs,
        ServiceId::TrngHardwarePoll,
        ServiceId::AesInit,
        ServiceId::AesSetKey,
        ServiceId::AesCrypt,
        ServiceId::ShaStarts,
        ServiceId::ShaProcess,
        ServiceId::ShaUpdate,
        ServiceId::ShaFinish,
        ServiceId::CcmGcmSetKey,
        ServiceId::CcmGcmCrypt,
        ServiceId::Chacha20Crypt,
        ServiceId::ChachapolyCrypt,
        ServiceId::Poly1305Crypt,
        ServiceId::CmacInitSetkey,
        ServiceId::CmacUpdate,
        ServiceId::CmacFinish,
        ServiceId::CmacReset,
    ];

    pub const fn raw(self) -> u16 {
        self as u16
    }

    /// The packet shape the enclave expects for this service.
    pub const fn layout(self) -> Layout {
        match self {
            ServiceId::GetRnd => Layout::GetRnd,
            ServiceId::GetLcs => Layout::GetLcs,
            ServiceId::TrngHardwarePoll => Layout::TrngHardwarePoll,
            ServiceId::AesInit => Layout::AesInit,
            ServiceId::AesSetKey => Layout::AesSetKey,
            ServiceId::AesCrypt => Layout::AesCrypt,
            ServiceId::ShaStarts
            | ServiceId::ShaProcess
            | ServiceId::ShaUpdate
            | ServiceId::ShaFinish => Layout::Sha,
            ServiceId::CcmGcmSetKey => Layout::CcmGcmSetKey,
            ServiceId::CcmGcmCrypt => Layout::CcmGcmCrypt,
            ServiceId::Chacha20Crypt => Layout::Chacha20Crypt,
            ServiceId::ChachapolyCrypt => Layout::ChachapolyCrypt,
            ServiceId::Poly1305Crypt => Layout::Poly1305Crypt,
            ServiceId::CmacInitSetkey => Layout::CmacInitSetkey,
            ServiceId::CmacUpdate => Layout::CmacUpdate,
            ServiceId::CmacFinish => Layout::CmacFinish,
            ServiceId::CmacReset => Layout::CmacReset,
        }
    }
}

/// Packet shapes, one per struct below.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Layout {
    GetRnd,
    GetLcs,
    TrngHardwarePoll,
    AesInit,
    AesSetKey,
    AesCrypt,
    Sha,
    CcmGcmSetKey,
    CcmGcmCrypt,
    Chacha20Crypt,
    ChachapolyCrypt,
    Poly1305Crypt,
    CmacInitSetkey,
    CmacUpdate,
    CmacFinish,
    CmacReset,
}

impl Layout {
    pub const ALL: [Layout; 16] = [
        Layout::GetRnd,
        Layout::GetLcs,
        Layout::TrngHardwarePoll,
        Layout::AesInit,
        Layout::AesSetKey,
        Layout::AesCrypt,
        Layout::Sha,
        Layout::CcmGcmSetKey,
        Layout::CcmGcmCrypt,
        Layout::Chacha20Crypt,
        Layout::ChachapolyCrypt,
        Layout::Poly1305Crypt,
        Layout::CmacInitSetkey,
        Layout::CmacUpdate,
        Layout::CmacFinish,
        Layout::CmacReset,
    ];

    /// Size in bytes of the packet struct for this layout.
    pub const fn size(self) -> usize {
        match self {
            Layout::GetRnd => size_of::<GetRndSvc>(),
            Layout::GetLcs => size_of::<GetLcsSvc>(),
            Layout::TrngHardwarePoll => size_of::<TrngHardwarePollSvc>(),
            Layout::AesInit => size_of::<AesInitSvc>(),
            Layout::AesSetKey => size_of::<AesSetKeySvc>(),
            Layout::AesCrypt => size_of::<AesCryptSvc>(),
            Layout::Sha => size_of::<ShaSvc>(),
            Layout::CcmGcmSetKey => size_of::<CcmGcmSetKeySvc>(),
            Layout::CcmGcmCrypt => size_of::<CcmGcmCryptSvc>(),
            Layout::Chacha20Crypt => size_of::<Chacha20CryptSvc>(),
            Layout::ChachapolyCrypt => size_of::<ChachapolyCryptSvc>(),
            Layout::Poly1305Crypt => size_of::<Poly1305CryptSvc>(),
            Layout::CmacInitSetkey => size_of::<CmacInitSetkeySvc>(),
            Layout::CmacUpdate => size_of::<CmacUpdateSvc>(),
            Layout::CmacFinish => size_of::<CmacFinishSvc>(),
            Layout::CmacReset => size_of::<CmacResetSvc>(),
        }
    }
}

/// Largest packet of any cryptocell service.
pub const MAX_PACKET_SIZE: usize = {
    let mut max = 0;
    let mut i = 0;
    while i < Layout::ALL.len() {
        let size = Layout::ALL[i].size();
        if size > max {
            max = size;
        }
        i += 1;
    }
    max
};

const_assert!(MAX_PACKET_SIZE <= PACKET_BUFFER_SIZE);
const_assert!(MAX_RND_LENGTH <= u16::MAX as usize);

/// A packet struct that can be staged in the shared buffer.
pub trait ServicePacket:
    zerocopy::FromBytes
    + zerocopy::IntoBytes
    + zerocopy::KnownLayout
    + zerocopy::Immutable
{
    const SHAPE: Layout;

    fn header(&self) -> &ServiceHeader;
    fn header_mut(&mut self) -> &mut ServiceHeader;
    fn error_code(&self) -> ErrorCode;
    fn set_error_code(&mut self, code: ErrorCode);
}

macro_rules! service_packets {
    ($($ty:ident => $layout:ident),* $(,)?) => {
        $(
            impl ServicePacket for $ty {
                const SHAPE: Layout = Layout::$layout;

                fn header(&self) -> &ServiceHeader {
                    &self.header
                }

                fn header_mut(&mut self) -> &mut ServiceHeader {
                    &mut self.header
                }

                fn error_code(&self) -> ErrorCode {
                    ErrorCode(self.resp_error_code)
                }

                fn set_error_code(&mut self, code: ErrorCode) {
                    self.resp_error_code = code.0;
                }
            }
        )*
    };
}

service_packets! {
    GetRndSvc => GetRnd,
    GetLcsSvc => GetLcs,
    TrngHardwarePollSvc => TrngHardwarePoll,
    AesInitSvc => AesInit,
    AesSetKeySvc => AesSetKey,
    AesCryptSvc => AesCrypt,
    ShaSvc => Sha,
    CcmGcmSetKeySvc => CcmGcmSetKey,
    CcmGcmCryptSvc => CcmGcmCrypt,
    Chacha20CryptSvc => Chacha20Crypt,
    ChachapolyCryptSvc => ChachapolyCrypt,
    Poly1305CryptSvc => Poly1305Crypt,
    CmacInitSetkeySvc => CmacInitSetkey,
    CmacUpdateSvc => CmacUpdate,
    CmacFinishSvc => CmacFinish,
    CmacResetSvc => CmacReset,
}

/// Chip lifecycle state as reported by `GetLcs`.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum LifecycleState {
    ChipManufacture = 0,
    DeviceManufacture = 1,
    Secure = 5,
    Rma = 7,
}

impl LifecycleState {
    pub fn from_raw(raw: u32) -> Option<Self> {
        num_traits::FromPrimitive::from_u32(raw)
    }
}

macro_rules! packet {
    ($(#[$m:meta])* pub struct $name:ident { $($body:tt)* }) => {
        $(#[$m])*
        #[derive(
            Copy,
            Clone,
            Debug,
            PartialEq,
            Eq,
            zerocopy::FromBytes,
            zerocopy::IntoBytes,
            zerocopy::KnownLayout,
            zerocopy::Immutable,
        )]
        #[repr(C)]
        pub struct $name { $($body)* }
    };
}

packet! {
    /// Fetch random bytes from the enclave TRNG.
    pub struct GetRndSvc {
        pub header: ServiceHeader,
        pub send_rnd_length: u16,
        pub reserved: u16,
        pub resp_rnd: [u8; MAX_RND_LENGTH],
        pub resp_error_code: i32,
    }
}

packet! {
    pub struct GetLcsSvc {
        pub header: ServiceHeader,
        pub resp_lcs: u32,
        pub resp_error_code: i32,
    }
}

packet! {
    /// Entropy source poll on behalf of the TLS library.
    pub struct TrngHardwarePollSvc {
        pub header: ServiceHeader,
        pub send_data_addr: GlobalAddr,
        pub send_output_addr: GlobalAddr,
        pub send_len: u32,
        pub send_olen_addr: GlobalAddr,
        pub resp_error_code: i32,
    }
}

packet! {
    pub struct AesInitSvc {
        pub header: ServiceHeader,
        pub send_context_addr: GlobalAddr,
        pub resp_error_code: i32,
    }
}

packet! {
    pub struct AesSetKeySvc {
        pub header: ServiceHeader,
        pub send_context_addr: GlobalAddr,
        pub send_key_addr: GlobalAddr,
        pub send_key_bits: u32,
        pub send_direction: u32,
        pub resp_error_code: i32,
    }
}

packet! {
    pub struct AesCryptSvc {
        pub header: ServiceHeader,
        pub send_context_addr: GlobalAddr,
        pub send_crypt_type: u32,
        pub send_mode: u32,
        pub send_length: u32,
        pub send_iv_addr: GlobalAddr,
        pub send_input_addr: GlobalAddr,
        pub send_output_addr: GlobalAddr,
        pub resp_error_code: i32,
    }
}

packet! {
    /// Shared by the starts/process/update/finish SHA services. Fields a
    /// service does not use are left zero.
    pub struct ShaSvc {
        pub header: ServiceHeader,
        pub send_context_addr: GlobalAddr,
        pub send_sha_type: u32,
        pub send_data_addr: GlobalAddr,
        pub send_data_length: u32,
        pub resp_error_code: i32,
    }
}

packet! {
    pub struct CcmGcmSetKeySvc {
        pub header: ServiceHeader,
        pub send_context_addr: GlobalAddr,
        pub send_key_type: u32,
        pub send_cipher: u32,
        pub send_key_addr: GlobalAddr,
        pub send_key_bits: u32,
        pub resp_error_code: i32,
    }
}

packet! {
    pub struct CcmGcmCryptSvc {
        pub header: ServiceHeader,
        pub send_context_addr: GlobalAddr,
        pub send_crypt_type: u32,
        pub send_length: u32,
        pub send_iv_addr: GlobalAddr,
        pub send_iv_length: u32,
        pub send_add_addr: GlobalAddr,
        pub send_add_length: u32,
        pub send_input_addr: GlobalAddr,
        pub send_output_addr: GlobalAddr,
        pub send_tag_addr: GlobalAddr,
        pub send_tag_length: u32,
        pub resp_error_code: i32,
    }
}

packet! {
    pub struct Chacha20CryptSvc {
        pub header: ServiceHeader,
        pub send_key_addr: GlobalAddr,
        pub send_nonce_addr: GlobalAddr,
        pub send_counter: u32,
        pub send_data_len: u32,
        pub send_input_addr: GlobalAddr,
        pub send_output_addr: GlobalAddr,
        pub resp_error_code: i32,
    }
}

packet! {
    pub struct ChachapolyCryptSvc {
        pub header: ServiceHeader,
        pub send_context_addr: GlobalAddr,
        pub send_crypt_type: u32,
        pub send_length: u32,
        pub send_nonce_addr: GlobalAddr,
        pub send_aad_addr: GlobalAddr,
        pub send_aad_len: u32,
        pub send_tag_addr: GlobalAddr,
        pub send_input_addr: GlobalAddr,
        pub send_output_addr: GlobalAddr,
        pub resp_error_code: i32,
    }
}

packet! {
    pub struct Poly1305CryptSvc {
        pub header: ServiceHeader,
        pub send_key_addr: GlobalAddr,
        pub send_input_addr: GlobalAddr,
        pub send_ilen: u32,
        pub send_mac_addr: GlobalAddr,
        pub resp_error_code: i32,
    }
}

packet! {
    pub struct CmacInitSetkeySvc {
        pub header: ServiceHeader,
        pub send_context_addr: GlobalAddr,
        pub send_key_addr: GlobalAddr,
        pub send_key_bits: u32,
        pub resp_error_code: i32,
    }
}

packet! {
    pub struct CmacUpdateSvc {
        pub header: ServiceHeader,
        pub send_context_addr: GlobalAddr,
        pub send_input_addr: GlobalAddr,
        pub send_input_length: u32,
        pub resp_error_code: i32,
    }
}

packet! {
    pub struct CmacFinishSvc {
        pub header: ServiceHeader,
        pub send_context_addr: GlobalAddr,
        pub send_output_addr: GlobalAddr,
        pub resp_error_code: i32,
    }
}

packet! {
    pub struct CmacResetSvc {
        pub header: ServiceHeader,
        pub send_context_addr: GlobalAddr,
        pub resp_error_code: i32,
    }
}
