// Licensed under the Apache-2.0 license

//! Cryptocell service calls.
//!
//! Each wrapper stages one packet, translates every pointer argument to
//! its global form, sends the request with the configured timeout and
//! hands back the enclave's `resp_error_code` in a [`Reply`]. Scalars
//! (key sizes, modes, directions, lengths) are passed through as the
//! enclave's crypto library defines them.
//!
//! Optional buffers (an IV in ECB mode, absent AAD, ...) are `Option`s;
//! `None` goes out as [`GlobalAddr::NULL`]. Every address that is given,
//! including 0, is translated.
//!
//! [`GlobalAddr::NULL`]: drv_se_services_api::GlobalAddr::NULL
//!
//! Pointer arguments are not checked here. The memory behind them must
//! stay valid and unaliased until the call returns, and contexts must
//! stay at the same address across the calls that use them.

use drv_se_services_api::cryptocell::*;
use drv_se_services_api::{LocalAddr, Reply, ServiceId, ServicesError, MAX_RND_LENGTH};

use crate::transport::{Clock, Doorbell};
use crate::{optional_global, Services};

impl<D: Doorbell, C: Clock, const N: usize> Services<D, C, N> {
    /// Fills `out` with random bytes from the enclave TRNG.
    ///
    /// `out` may be at most [`MAX_RND_LENGTH`] bytes; longer requests
    /// fail with `InvalidLength` before anything is sent.
    pub fn get_rnd(&mut self, out: &mut [u8]) -> Result<Reply, ServicesError> {
        if out.len() > MAX_RND_LENGTH {
            return Err(ServicesError::InvalidLength);
        }
        let len = out.len();
        self.call(
            ServiceId::GetRnd,
            |p: &mut GetRndSvc, _| p.send_rnd_length = len as u16,
            |p| out.copy_from_slice(&p.resp_rnd[..len]),
        )
    }

    /// Reads the raw lifecycle state; see `LifecycleState::from_raw`.
    pub fn get_lcs(&mut self) -> Result<Reply<u32>, ServicesError> {
        self.call(ServiceId::GetLcs, |_: &mut GetLcsSvc, _| (), |p| p.resp_lcs)
    }

    /// Entropy poll for the TLS library. The enclave writes up to `len`
    /// bytes at `output` and the count at `olen`.
    pub fn trng_hardware_poll(
        &mut self,
        data: Option<LocalAddr>,
        output: LocalAddr,
        len: u32,
        olen: LocalAddr,
    ) -> Result<Reply, ServicesError> {
        self.call(
            ServiceId::TrngHardwarePoll,
            |p: &mut TrngHardwarePollSvc, map| {
                p.send_data_addr = optional_global(map, data);
                p.send_output_addr = map.to_global(output);
                p.send_len = len;
                p.send_olen_addr = map.to_global(olen);
            },
            |_| (),
        )
    }

    pub fn aes_init(&mut self, ctx: LocalAddr) -> Result<Reply, ServicesError> {
        self.call(
            ServiceId::AesInit,
            |p: &mut AesInitSvc, map| p.send_context_addr = map.to_global(ctx),
            |_| (),
        )
    }

    pub fn aes_set_key(
        &mut self,
        ctx: LocalAddr,
        key: LocalAddr,
        key_bits: u32,
        direction: u32,
    ) -> Result<Reply, ServicesError> {
        self.call(
            ServiceId::AesSetKey,
            |p: &mut AesSetKeySvc, map| {
                p.send_context_addr = map.to_global(ctx);
                p.send_key_addr = map.to_global(key);
                p.send_key_bits = key_bits;
                p.send_direction = direction;
            },
            |_| (),
        )
    }

    pub fn aes_crypt(
        &mut self,
        ctx: LocalAddr,
        crypt_type: u32,
        mode: u32,
        length: u32,
        iv: Option<LocalAddr>,
        input: LocalAddr,
        output: LocalAddr,
    ) -> Result<Reply, ServicesError> {
        self.call(
            ServiceId::AesCrypt,
            |p: &mut AesCryptSvc, map| {
                p.send_context_addr = map.to_global(ctx);
                p.send_crypt_type = crypt_type;
                p.send_mode = mode;
                p.send_length = length;
                p.send_iv_addr = optional_global(map, iv);
                p.send_input_addr = map.to_global(input);
                p.send_output_addr = map.to_global(output);
            },
            |_| (),
        )
    }

    fn sha(
        &mut self,
        service: ServiceId,
        ctx: LocalAddr,
        sha_type: u32,
        data: Option<LocalAddr>,
        data_length: u32,
    ) -> Result<Reply, ServicesError> {
        self.call(
            service,
            |p: &mut ShaSvc, map| {
                p.send_context_addr = map.to_global(ctx);
                p.send_sha_type = sha_type;
                p.send_data_addr = optional_global(map, data);
                p.send_data_length = data_length;
            },
            |_| (),
        )
    }

    pub fn sha_starts(&mut self, ctx: LocalAddr, sha_type: u32) -> Result<Reply, ServicesError> {
        self.sha(ServiceId::ShaStarts, ctx, sha_type, None, 0)
    }

    /// Processes one raw block at `data`.
    pub fn sha_process(
        &mut self,
        ctx: LocalAddr,
        sha_type: u32,
        data: LocalAddr,
    ) -> Result<Reply, ServicesError> {
        self.sha(ServiceId::ShaProcess, ctx, sha_type, Some(data), 0)
    }

    pub fn sha_update(
        &mut self,
        ctx: LocalAddr,
        sha_type: u32,
        data: LocalAddr,
        data_length: u32,
    ) -> Result<Reply, ServicesError> {
        self.sha(ServiceId::ShaUpdate, ctx, sha_type, Some(data), data_length)
    }

    /// Writes the digest to `output`.
    pub fn sha_finish(
        &mut self,
        ctx: LocalAddr,
        sha_type: u32,
        output: LocalAddr,
    ) -> Result<Reply, ServicesError> {
        self.sha(ServiceId::ShaFinish, ctx, sha_type, Some(output), 0)
    }

    pub fn ccm_gcm_set_key(
        &mut self,
        ctx: LocalAddr,
        key_type: u32,
        cipher: u32,
        key: LocalAddr,
        key_bits: u32,
    ) -> Result<Reply, ServicesError> {
        self.call(
            ServiceId::CcmGcmSetKey,
            |p: &mut CcmGcmSetKeySvc, map| {
                p.send_context_addr = map.to_global(ctx);
                p.send_key_type = key_type;
                p.send_cipher = cipher;
                p.send_key_addr = map.to_global(key);
                p.send_key_bits = key_bits;
            },
            |_| (),
        )
    }

    pub fn ccm_gcm_crypt(
        &mut self,
        ctx: LocalAddr,
        crypt_type: u32,
        length: u32,
        iv: LocalAddr,
        iv_length: u32,
        add: Option<LocalAddr>,
        add_length: u32,
        input: LocalAddr,
        output: LocalAddr,
        tag: LocalAddr,
        tag_length: u32,
    ) -> Result<Reply, ServicesError> {
        self.call(
            ServiceId::CcmGcmCrypt,
            |p: &mut CcmGcmCryptSvc, map| {
                p.send_context_addr = map.to_global(ctx);
                p.send_crypt_type = crypt_type;
                p.send_length = length;
                p.send_iv_addr = map.to_global(iv);
                p.send_iv_length = iv_length;
                p.send_add_addr = optional_global(map, add);
                p.send_add_length = add_length;
                p.send_input_addr = map.to_global(input);
                p.send_output_addr = map.to_global(output);
                p.send_tag_addr = map.to_global(tag);
                p.send_tag_length = tag_length;
            },
            |_| (),
        )
    }

    pub fn chacha20_crypt(
        &mut self,
        key: LocalAddr,
        nonce: LocalAddr,
        counter: u32,
        data_len: u32,
        input: LocalAddr,
        output: LocalAddr,
    ) -> Result<Reply, ServicesError> {
        self.call(
            ServiceId::Chacha20Crypt,
            |p: &mut Chacha20CryptSvc, map| {
                p.send_key_addr = map.to_global(key);
                p.send_nonce_addr = map.to_global(nonce);
                p.send_counter = counter;
                p.send_data_len = data_len;
                p.send_input_addr = map.to_global(input);
                p.send_output_addr = map.to_global(output);
            },
            |_| (),
        )
    }

    pub fn chachapoly_crypt(
        &mut self,
        ctx: LocalAddr,
        crypt_type: u32,
        length: u32,
        nonce: LocalAddr,
        aad: Option<LocalAddr>,
        aad_len: u32,
        tag: LocalAddr,
        input: LocalAddr,
        output: LocalAddr,
    ) -> Result<Reply, ServicesError> {
        self.call(
            ServiceId::ChachapolyCrypt,
            |p: &mut ChachapolyCryptSvc, map| {
                p.send_context_addr = map.to_global(ctx);
                p.send_crypt_type = crypt_type;
                p.send_length = length;
                p.send_nonce_addr = map.to_global(nonce);
                p.send_aad_addr = optional_global(map, aad);
                p.send_aad_len = aad_len;
                p.send_tag_addr = map.to_global(tag);
                p.send_input_addr = map.to_global(input);
                p.send_output_addr = map.to_global(output);
            },
            |_| (),
        )
    }

    pub fn poly1305_crypt(
        &mut self,
        key: LocalAddr,
        input: LocalAddr,
        ilen: u32,
        mac: LocalAddr,
    ) -> Result<Reply, ServicesError> {
        self.call(
            ServiceId::Poly1305Crypt,
            |p: &mut Poly1305CryptSvc, map| {
                p.send_key_addr = map.to_global(key);
                p.send_input_addr = map.to_global(input);
                p.send_ilen = ilen;
                p.send_mac_addr = map.to_global(mac);
            },
            |_| (),
        )
    }

    pub fn cmac_init_setkey(
        &mut self,
        ctx: LocalAddr,
        key: LocalAddr,
        key_bits: u32,
    ) -> Result<Reply, ServicesError> {
        self.call(
            ServiceId::CmacInitSetkey,
            |p: &mut CmacInitSetkeySvc, map| {
                p.send_context_addr = map.to_global(ctx);
                p.send_key_addr = map.to_global(key);
                p.send_key_bits = key_bits;
            },
            |_| (),
        )
    }

    pub fn cmac_update(
        &mut self,
        ctx: LocalAddr,
        input: LocalAddr,
        input_length: u32,
    ) -> Result<Reply, ServicesError> {
        self.call(
            ServiceId::CmacUpdate,
            |p: &mut CmacUpdateSvc, map| {
                p.send_context_addr = map.to_global(ctx);
                p.send_input_addr = map.to_global(input);
                p.send_input_length = input_length;
            },
            |_| (),
        )
    }

    pub fn cmac_finish(&mut self, ctx: LocalAddr, output: LocalAddr) -> Result<Reply, ServicesError> {
        self.call(
            ServiceId::CmacFinish,
            |p: &mut CmacFinishSvc, map| {
                p.send_context_addr = map.to_global(ctx);
                p.send_output_addr = map.to_global(output);
            },
            |_| (),
        )
    }

    pub fn cmac_reset(&mut self, ctx: LocalAddr) -> Result<Reply, ServicesError> {
        self.call(
            ServiceId::CmacReset,
            |p: &mut CmacResetSvc, map| p.send_context_addr = map.to_global(ctx),
            |_| (),
        )
    }
}
