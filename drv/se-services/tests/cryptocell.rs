// Licensed under the Apache-2.0 license

use core::cell::Cell;
use core::pin::pin;
use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
use std::future::Future;
use std::rc::Rc;

use drv_se_services::mock::{Behavior, ManualClock, MockEnclave};
use drv_se_services::{DoorbellError, Services, ServicesConfig, ServicesHandle, State, Trace};
use drv_se_services_api::cryptocell::*;
use drv_se_services_api::{
    ErrorCode, GlobalAddr, LocalAddr, ServiceId, ServicesError, Timeout, MAX_RND_LENGTH,
};
use lib_addr_xlate::MemoryMap;
use rand_core::RngCore;
use zerocopy::FromBytes;

type Mock = MockEnclave<Box<dyn FnMut(ServiceId, &mut [u8]) -> Result<(), u16>>>;

fn open<'c>(
    responder: impl FnMut(ServiceId, &mut [u8]) -> Result<(), u16> + 'static,
    clock: &'c ManualClock,
    config: ServicesConfig,
) -> Services<Mock, &'c ManualClock> {
    let mock: Mock = MockEnclave::new(Box::new(responder));
    Services::new(ServicesHandle(7), mock, clock, config)
}

fn he() -> ServicesConfig {
    ServicesConfig::new(MemoryMap::m55_he())
}

fn silent(_: ServiceId, _: &mut [u8]) -> Result<(), u16> {
    Ok(())
}

/// Writes a per-service code into `resp_error_code`, the last field of
/// every layout.
fn echo_error_code(id: ServiceId, bytes: &mut [u8]) -> Result<(), u16> {
    let at = id.layout().size() - 4;
    bytes[at..at + 4].copy_from_slice(&expected_code(id).to_ne_bytes());
    Ok(())
}

fn expected_code(id: ServiceId) -> i32 {
    -(i32::from(id.raw()))
}

const CTX: LocalAddr = LocalAddr::new(0x2000_0400);
const KEY: LocalAddr = LocalAddr::new(0x2000_0800);
const IN: LocalAddr = LocalAddr::new(0x2000_1000);
const OUT: LocalAddr = LocalAddr::new(0x2000_2000);
const AUX: LocalAddr = LocalAddr::new(0x0000_0100);

/// Invokes the wrapper for `id` with fixed arguments.
fn invoke<D, C>(se: &mut Services<D, C>, id: ServiceId) -> Result<ErrorCode, ServicesError>
where
    D: drv_se_services::Doorbell,
    C: drv_se_services::Clock,
{
    let mut rnd = [0u8; 8];
    let code = match id {
        ServiceId::GetRnd => se.get_rnd(&mut rnd)?.error_code,
        ServiceId::GetLcs => se.get_lcs()?.error_code,
        ServiceId::TrngHardwarePoll => se.trng_hardware_poll(Some(IN), OUT, 16, AUX)?.error_code,
        ServiceId::AesInit => se.aes_init(CTX)?.error_code,
        ServiceId::AesSetKey => se.aes_set_key(CTX, KEY, 256, 1)?.error_code,
        ServiceId::AesCrypt => se.aes_crypt(CTX, 1, 2, 64, Some(AUX), IN, OUT)?.error_code,
        ServiceId::ShaStarts => se.sha_starts(CTX, 0)?.error_code,
        ServiceId::ShaProcess => se.sha_process(CTX, 0, IN)?.error_code,
        ServiceId::ShaUpdate => se.sha_update(CTX, 0, IN, 64)?.error_code,
        ServiceId::ShaFinish => se.sha_finish(CTX, 0, OUT)?.error_code,
        ServiceId::CcmGcmSetKey => se.ccm_gcm_set_key(CTX, 1, 2, KEY, 128)?.error_code,
        ServiceId::CcmGcmCrypt => {
            se.ccm_gcm_crypt(CTX, 1, 64, AUX, 12, Some(AUX), 20, IN, OUT, KEY, 16)?
                .error_code
        }
        ServiceId::Chacha20Crypt => se.chacha20_crypt(KEY, AUX, 1, 64, IN, OUT)?.error_code,
        ServiceId::ChachapolyCrypt => {
            se.chachapoly_crypt(CTX, 0, 64, AUX, Some(AUX), 8, KEY, IN, OUT)?
                .error_code
        }
        ServiceId::Poly1305Crypt => se.poly1305_crypt(KEY, IN, 64, OUT)?.error_code,
        ServiceId::CmacInitSetkey => se.cmac_init_setkey(CTX, KEY, 128)?.error_code,
        ServiceId::CmacUpdate => se.cmac_update(CTX, IN, 64)?.error_code,
        ServiceId::CmacFinish => se.cmac_finish(CTX, OUT)?.error_code,
        ServiceId::CmacReset => se.cmac_reset(CTX)?.error_code,
    };
    Ok(code)
}

#[test]
fn get_rnd_returns_enclave_bytes() {
    let clock = ManualClock::new();
    let mut se = open(
        |id, bytes| {
            assert_eq!(id, ServiceId::GetRnd);
            let (p, _) = GetRndSvc::mut_from_prefix(bytes).unwrap();
            let n = usize::from(p.send_rnd_length);
            for (i, b) in p.resp_rnd[..n].iter_mut().enumerate() {
                *b = i as u8 + 1;
            }
            p.resp_error_code = 0;
            Ok(())
        },
        &clock,
        he(),
    );

    let mut out = [0u8; 16];
    let reply = se.get_rnd(&mut out).unwrap();
    assert_eq!(reply.error_code, ErrorCode::OK);
    assert_eq!(out, core::array::from_fn::<u8, 16, _>(|i| i as u8 + 1));

    let sent = se.doorbell().last_request().unwrap();
    assert_eq!(sent.service, ServiceId::GetRnd);
    assert_eq!(sent.packet::<GetRndSvc>().unwrap().send_rnd_length, 16);
    assert_eq!(se.state(), State::Idle);
}

#[test]
fn get_rnd_longer_than_a_packet_is_refused_before_sending() {
    let clock = ManualClock::new();
    let mut se = open(silent, &clock, he());

    let mut out = [0xEEu8; MAX_RND_LENGTH + 1];
    assert_eq!(se.get_rnd(&mut out).err(), Some(ServicesError::InvalidLength));
    assert_eq!(se.doorbell().rung(), 0);
    assert!(out.iter().all(|&b| b == 0xEE));

    let mut max = [0u8; MAX_RND_LENGTH];
    assert!(se.get_rnd(&mut max).is_ok());
}

#[test]
fn every_operation_reports_the_enclave_error_code() {
    let clock = ManualClock::new();
    let mut se = open(echo_error_code, &clock, he());

    for id in ServiceId::ALL {
        assert_eq!(invoke(&mut se, id), Ok(ErrorCode(expected_code(id))), "{id:?}");
        assert_eq!(se.doorbell().last_request().unwrap().service, id);
    }
    assert_eq!(se.stats().completed, ServiceId::ALL.len() as u32);
}

#[test]
fn every_operation_times_out_after_the_configured_limit() {
    let clock = ManualClock::new();
    let mut se = open(silent, &clock, he());
    se.doorbell_mut().set_behavior(Behavior::Silent);

    for id in ServiceId::ALL {
        let before = clock.now();
        assert_eq!(invoke(&mut se, id), Err(ServicesError::Timeout), "{id:?}");
        assert_eq!(clock.now() - before, 1000, "{id:?}");
        assert_eq!(se.state(), State::Idle);
    }
    assert_eq!(se.stats().timed_out, ServiceId::ALL.len() as u32);
}

#[test]
fn timed_out_get_rnd_leaves_output_alone() {
    let clock = ManualClock::new();
    let mut se = open(
        |_, bytes| {
            let (p, _) = GetRndSvc::mut_from_prefix(bytes).unwrap();
            p.resp_rnd = [0x11; MAX_RND_LENGTH];
            Ok(())
        },
        &clock,
        he().with_timeout(Timeout::Millis(5)),
    );
    se.doorbell_mut().set_behavior(Behavior::Silent);

    let mut out = [0xAAu8; 8];
    assert_eq!(se.get_rnd(&mut out).err(), Some(ServicesError::Timeout));
    assert_eq!(out, [0xAA; 8]);
    assert_eq!(clock.now(), 5);
}

#[test]
fn late_response_is_not_taken_for_the_next_request() {
    let clock = ManualClock::new();
    let mut se = open(
        |_, bytes| {
            let (p, _) = GetLcsSvc::mut_from_prefix(bytes).unwrap();
            p.resp_lcs = 5;
            Ok(())
        },
        &clock,
        he(),
    );

    se.doorbell_mut().set_behavior(Behavior::Silent);
    assert_eq!(se.get_lcs().err(), Some(ServicesError::Timeout));

    // The enclave wakes up and answers the stale request first, over the
    // packet of the next one.
    se.doorbell_mut().set_behavior(Behavior::Immediate);
    assert_eq!(se.get_lcs().err(), Some(ServicesError::Stale));
    assert_eq!(
        se.transport().trace().recent(),
        Some(&Trace::Discarded {
            service: ServiceId::GetLcs,
            sequence: 2
        })
    );

    let reply = se.get_lcs().unwrap();
    assert_eq!(reply.value, 5);
    assert_eq!(
        LifecycleState::from_raw(reply.value),
        Some(LifecycleState::Secure)
    );

    let stats = se.stats();
    assert_eq!(stats.stale, 1);
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(
        se.transport().trace().recent(),
        Some(&Trace::Completed { sequence: 3 })
    );
}

#[test]
fn late_response_of_another_layout_fails_the_request_it_overwrote() {
    let clock = ManualClock::new();
    let seen_length = Rc::new(Cell::new(0u32));
    let seen = seen_length.clone();
    let mut se = open(
        move |id, bytes| {
            match id {
                ServiceId::GetRnd => {
                    let (p, _) = GetRndSvc::mut_from_prefix(bytes).unwrap();
                    p.resp_rnd = [0x11; MAX_RND_LENGTH];
                }
                ServiceId::ShaUpdate => {
                    let (p, _) = ShaSvc::mut_from_prefix(bytes).unwrap();
                    seen.set(p.send_data_length);
                }
                _ => {}
            }
            Ok(())
        },
        &clock,
        he(),
    );

    se.doorbell_mut().set_behavior(Behavior::Silent);
    let mut out = [0u8; MAX_RND_LENGTH];
    assert_eq!(se.get_rnd(&mut out).err(), Some(ServicesError::Timeout));

    // The random bytes land on the SHA request before the enclave reads it.
    se.doorbell_mut().set_behavior(Behavior::Immediate);
    assert_eq!(
        se.sha_update(CTX, 0, IN, 64).err(),
        Some(ServicesError::Stale)
    );
    assert_eq!(seen_length.get(), 0x1111_1111);

    se.sha_update(CTX, 0, IN, 64).unwrap();
    assert_eq!(seen_length.get(), 64);

    let stats = se.stats();
    assert_eq!(stats.stale, 1);
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(se.state(), State::Idle);
}

#[test]
fn address_zero_is_translated() {
    let clock = ManualClock::new();
    let mut se = open(silent, &clock, he());

    se.aes_init(LocalAddr::new(0)).unwrap();
    let p = se
        .doorbell()
        .last_request()
        .unwrap()
        .packet::<AesInitSvc>()
        .unwrap();
    assert_eq!(p.send_context_addr.get(), 0x5800_0000);

    se.aes_crypt(CTX, 0, 0, 16, None, LocalAddr::new(0), OUT)
        .unwrap();
    let p = se
        .doorbell()
        .last_request()
        .unwrap()
        .packet::<AesCryptSvc>()
        .unwrap();
    assert_eq!(p.send_iv_addr, GlobalAddr::NULL);
    assert_eq!(p.send_input_addr.get(), 0x5800_0000);
}

#[test]
fn sha_calls_on_one_context_use_the_same_global_address() {
    let clock = ManualClock::new();
    let mut se = open(silent, &clock, he());
    let map = MemoryMap::m55_he();

    se.sha_update(CTX, 0, IN, 64).unwrap();
    se.sha_finish(CTX, 0, OUT).unwrap();

    let reqs = se.doorbell().requests();
    assert_eq!(reqs.len(), 2);
    let update = reqs[0].packet::<ShaSvc>().unwrap();
    let finish = reqs[1].packet::<ShaSvc>().unwrap();

    assert_eq!(update.send_context_addr, finish.send_context_addr);
    assert_eq!(update.send_context_addr, map.to_global(CTX));
    assert_eq!(update.send_context_addr.get(), 0x5880_0400);
    assert_eq!(update.send_data_addr.get(), 0x5880_1000);
    assert_eq!(update.send_data_length, 64);
    assert_eq!(finish.send_data_addr.get(), 0x5880_2000);
}

#[test]
fn pointers_are_translated_and_scalars_carried() {
    let clock = ManualClock::new();
    let mut se = open(silent, &clock, he());

    let outside = LocalAddr::new(0x6000_0000);
    se.ccm_gcm_crypt(CTX, 1, 48, AUX, 12, None, 0, IN, outside, KEY, 16)
        .unwrap();

    let p = se
        .doorbell()
        .last_request()
        .unwrap()
        .packet::<CcmGcmCryptSvc>()
        .unwrap();
    assert_eq!(p.header.service_id, ServiceId::CcmGcmCrypt.raw());
    assert_eq!(p.send_context_addr.get(), 0x5880_0400);
    assert_eq!(p.send_crypt_type, 1);
    assert_eq!(p.send_length, 48);
    assert_eq!(p.send_iv_addr.get(), 0x5800_0100);
    assert_eq!(p.send_iv_length, 12);
    assert_eq!(p.send_add_addr, GlobalAddr::NULL);
    assert_eq!(p.send_add_length, 0);
    assert_eq!(p.send_input_addr.get(), 0x5880_1000);
    assert_eq!(p.send_output_addr.get(), 0x6000_0000);
    assert_eq!(p.send_tag_addr.get(), 0x5880_0800);
    assert_eq!(p.send_tag_length, 16);
}

#[test]
fn hp_core_uses_its_own_aliases() {
    let clock = ManualClock::new();
    let mut se = open(silent, &clock, ServicesConfig::new(MemoryMap::m55_hp()));

    se.trng_hardware_poll(Some(IN), LocalAddr::new(0x200F_FF00), 32, AUX)
        .unwrap();
    let p = se
        .doorbell()
        .last_request()
        .unwrap()
        .packet::<TrngHardwarePollSvc>()
        .unwrap();
    assert_eq!(p.send_data_addr.get(), 0x5080_1000);
    assert_eq!(p.send_output_addr.get(), 0x508F_FF00);
    assert_eq!(p.send_len, 32);
    assert_eq!(p.send_olen_addr.get(), 0x5000_0100);
}

#[test]
fn rejected_packet_is_a_transport_error() {
    let clock = ManualClock::new();
    let mut se = open(
        |id, _| {
            if id == ServiceId::CmacReset {
                Err(0x22)
            } else {
                Ok(())
            }
        },
        &clock,
        he(),
    );

    assert_eq!(se.cmac_reset(CTX).err(), Some(ServicesError::Rejected));
    assert_eq!(se.stats().rejected, 1);
    assert_eq!(
        se.transport().trace().recent(),
        Some(&Trace::Rejected {
            sequence: 1,
            error: 0x22
        })
    );
    assert!(se.cmac_update(CTX, IN, 16).is_ok());
}

#[test]
fn doorbell_failure_does_not_wedge_the_channel() {
    let clock = ManualClock::new();
    let mut se = open(silent, &clock, he());

    se.doorbell_mut().fail_next_ring(DoorbellError::Busy);
    assert_eq!(se.aes_init(CTX).err(), Some(ServicesError::DoorbellFailed));
    assert_eq!(se.state(), State::Idle);
    assert_eq!(se.aes_init(CTX).map(|r| r.error_code), Ok(ErrorCode::OK));
}

#[test]
fn rng_adapter_splits_into_packets() {
    let clock = ManualClock::new();
    let mut se = open(
        |_, bytes| {
            let (p, _) = GetRndSvc::mut_from_prefix(bytes).unwrap();
            p.resp_rnd = [0x3C; MAX_RND_LENGTH];
            Ok(())
        },
        &clock,
        he(),
    );

    let mut buf = [0u8; 70];
    se.rng().fill_bytes(&mut buf);
    assert!(buf.iter().all(|&b| b == 0x3C));

    let lengths: Vec<u16> = se
        .doorbell()
        .requests()
        .iter()
        .map(|r| r.packet::<GetRndSvc>().unwrap().send_rnd_length)
        .collect();
    assert_eq!(lengths, [32, 32, 6]);

    assert_eq!(se.rng().next_u32(), 0x3C3C_3C3C);
}

#[test]
fn rng_adapter_reports_failures() {
    let clock = ManualClock::new();
    let mut se = open(
        |_, bytes| {
            let (p, _) = GetRndSvc::mut_from_prefix(bytes).unwrap();
            p.resp_error_code = -1;
            Ok(())
        },
        &clock,
        he().with_timeout(Timeout::Millis(2)),
    );

    let custom = rand_core::Error::CUSTOM_START;
    let mut buf = [0u8; 4];
    let err = se.rng().try_fill_bytes(&mut buf).unwrap_err();
    assert_eq!(err.code().map(|c| c.get()), Some(custom | 0x100));

    se.doorbell_mut().set_behavior(Behavior::Silent);
    let err = se.rng().try_fill_bytes(&mut buf).unwrap_err();
    assert_eq!(
        err.code().map(|c| c.get()),
        Some(custom | ServicesError::Timeout.code())
    );
}

#[test]
fn submitted_request_can_be_polled() {
    let clock = ManualClock::new();
    let mut se = open(
        |_, bytes| {
            let (p, _) = GetLcsSvc::mut_from_prefix(bytes).unwrap();
            p.resp_lcs = 7;
            Ok(())
        },
        &clock,
        he(),
    );
    se.doorbell_mut().set_behavior(Behavior::AfterPolls(2));

    {
        let mut pending = se.submit::<GetLcsSvc>(ServiceId::GetLcs, |_, _| ()).unwrap();
        assert!(pending.poll_once().is_pending());
        assert!(pending.poll_once().is_pending());
        let reply = match pending.poll_once() {
            Poll::Ready(r) => r.unwrap(),
            Poll::Pending => panic!("still pending"),
        };
        assert_eq!(reply.value.resp_lcs, 7);
        assert_eq!(reply.error_code, ErrorCode::OK);
        assert_eq!(
            pending.poll_once(),
            Poll::Ready(Err(ServicesError::InvalidState))
        );
    }
    assert_eq!(se.state(), State::Idle);
}

#[test]
fn submit_checks_layout() {
    let clock = ManualClock::new();
    let mut se = open(silent, &clock, he());
    assert_eq!(
        se.submit::<ShaSvc>(ServiceId::CmacReset, |_, _| ()).err(),
        Some(ServicesError::LayoutMismatch)
    );
    assert_eq!(se.doorbell().rung(), 0);
    assert_eq!(se.state(), State::Idle);
}

#[test]
fn dropping_a_pending_request_frees_the_channel() {
    let clock = ManualClock::new();
    let mut se = open(silent, &clock, he());
    se.doorbell_mut().set_behavior(Behavior::Silent);

    let pending = se
        .submit::<AesInitSvc>(ServiceId::AesInit, |p, map| {
            p.send_context_addr = map.to_global(CTX)
        })
        .unwrap();
    drop(pending);
    assert_eq!(se.state(), State::Idle);

    se.doorbell_mut().set_behavior(Behavior::Immediate);
    // The abandoned request's answer arrives first, over the CMAC packet,
    // of a different layout.
    assert_eq!(se.cmac_reset(CTX).err(), Some(ServicesError::Stale));
    assert_eq!(se.stats().stale, 1);
    assert_eq!(se.state(), State::Idle);

    assert!(se.cmac_reset(CTX).is_ok());
    assert_eq!(se.stats().completed, 1);
}

fn noop_raw_waker() -> RawWaker {
    RawWaker::new(core::ptr::null(), &NOOP_VTABLE)
}

static NOOP_VTABLE: RawWakerVTable =
    RawWakerVTable::new(|_| noop_raw_waker(), |_| {}, |_| {}, |_| {});

fn block_on<F: Future>(fut: F) -> F::Output {
    let mut fut = pin!(fut);
    // SAFETY: every vtable entry ignores the data pointer.
    let waker = unsafe { Waker::from_raw(noop_raw_waker()) };
    let mut cx = Context::from_waker(&waker);
    loop {
        if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
            return out;
        }
    }
}

#[test]
fn pending_request_is_a_future() {
    let clock = ManualClock::new();
    let mut se = open(echo_error_code, &clock, he());
    se.doorbell_mut().set_behavior(Behavior::AfterPolls(3));

    let pending = se
        .submit::<CmacFinishSvc>(ServiceId::CmacFinish, |p, map| {
            p.send_context_addr = map.to_global(CTX);
            p.send_output_addr = map.to_global(OUT);
        })
        .unwrap();
    let reply = block_on(pending).unwrap();
    assert_eq!(reply.error_code, ErrorCode(expected_code(ServiceId::CmacFinish)));
    assert_eq!(reply.value.send_output_addr.get(), 0x5880_2000);
    assert_eq!(se.state(), State::Idle);
}

#[test]
fn waiting_on_a_submitted_request_honours_the_timeout() {
    let clock = ManualClock::new();
    let mut se = open(silent, &clock, he().with_timeout(Timeout::Millis(40)));
    se.doorbell_mut().set_behavior(Behavior::AfterPolls(10));

    let reply = se
        .submit::<GetLcsSvc>(ServiceId::GetLcs, |_, _| ())
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(reply.value.header.service_id, ServiceId::GetLcs.raw());
    assert_eq!(clock.now(), 10);
    assert_eq!(se.doorbell().last_request().unwrap().packet, se.packet_addr());

    se.doorbell_mut().set_behavior(Behavior::Silent);
    let pending = se.submit::<GetLcsSvc>(ServiceId::GetLcs, |_, _| ()).unwrap();
    assert_eq!(pending.wait().err(), Some(ServicesError::Timeout));
    assert_eq!(clock.now(), 50);
    assert_eq!(se.state(), State::Idle);
}
