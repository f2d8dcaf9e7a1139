//! Client protocol against the in-process accelerator
//!
//! Covers the end-to-end scenarios that run without hardware: fills,
//! moves, page-fault resumption, transfer-limit splitting, queue
//! saturation, poll timeouts and the timing-slot sender.

use dsa_driver::channel::{alternating_bits, Sender, SlotTable};
use dsa_driver::verify::{verify_fill, verify_move};
use dsa_driver::{
    ClientConfig, CompletionOutcome, CycleCounter, Descriptor, DsaError, SoftwarePortal,
    WorkQueueClient,
};
use dsa_hw::status::code;
use std::cell::Cell;
use std::time::Duration;

const PAGE: usize = 4096;

#[test]
fn fill_ff_over_whole_buffer() {
    let mut buf = vec![0u8; 256 * PAGE];
    buf[0] = 0x00;

    let mut client = WorkQueueClient::new(SoftwarePortal::new());
    let report = client.memfill(&mut buf, u64::MAX).expect("fill");

    assert_eq!(report.requested as usize, buf.len());
    assert_eq!(report.submissions, 1);
    verify_fill(&buf, u64::MAX).expect("every byte is 0xff");
}

#[test]
fn move_aa_copies_source() {
    let src = vec![0xaau8; 64 * PAGE];
    let mut dst = vec![0u8; 64 * PAGE];

    let mut client = WorkQueueClient::new(SoftwarePortal::new());
    client.memmove(&src, &mut dst).expect("move");

    verify_move(&src, &dst).expect("destination equals source");
}

#[test]
fn fault_after_k_bytes_is_resumed() {
    let k = 3 * PAGE as u32;
    let len = 16 * PAGE;
    let mut buf = vec![0u8; len];

    let mut client = WorkQueueClient::new(SoftwarePortal::new().fault_after(k));
    let report = client.memfill(&mut buf, u64::MAX).expect("fill");

    assert_eq!(report.submissions, 2);
    assert_eq!(report.faults.len(), 1);
    assert_eq!(report.faults[0].bytes_completed, k);
    assert!(report.faults[0].write);
    assert_eq!(report.final_size as usize, len - k as usize);
    verify_fill(&buf, u64::MAX).expect("filled");

    // The second submission starts exactly where the first stopped
    let history = client.portal().history();
    assert_eq!(history[1].dst_addr, history[0].dst_addr + u64::from(k));
    assert_eq!(history[1].xfer_size, history[0].xfer_size - k);
}

#[test]
fn resumption_conserves_length() {
    let src: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
    let mut dst = vec![0u8; src.len()];

    let portal = SoftwarePortal::new().fault_after(1).fault_after(4095).fault_every(5000);
    let mut client = WorkQueueClient::new(portal);
    let report = client.memmove(&src, &mut dst).expect("move");

    assert_eq!(report.accounted_bytes(), src.len() as u64);
    assert_eq!(report.submissions as usize, report.faults.len() + 1);
    verify_move(&src, &dst).expect("copied");
}

#[test]
fn unaligned_fill_resumption_keeps_pattern_phase() {
    let pattern = u64::from_ne_bytes([0x10, 0x21, 0x32, 0x43, 0x54, 0x65, 0x76, 0x87]);
    let mut buf = vec![0u8; 1000];

    let mut client = WorkQueueClient::new(SoftwarePortal::new().fault_every(13));
    let report = client.memfill(&mut buf, pattern).expect("fill");

    assert!(report.resumptions() > 1);
    verify_fill(&buf, pattern).expect("pattern continues across resumptions");
}

#[test]
fn rejection_on_every_attempt_saturates() {
    let mut buf = vec![0u8; PAGE];
    let mut client = WorkQueueClient::new(SoftwarePortal::new().reject_always());

    let err = client.memfill(&mut buf, u64::MAX).unwrap_err();
    assert!(matches!(err, DsaError::QueueSaturated { attempts: 1000 }));
    assert_eq!(client.portal().stats().attempts, 1000);
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn retry_limit_bounds_enqueue_attempts() {
    let mut buf = vec![0u8; PAGE];
    let config = ClientConfig::default().with_enqueue_retry_limit(10);

    // Exactly at the limit: accepted on the last allowed attempt
    let mut client = WorkQueueClient::with_config(SoftwarePortal::new().reject_first(9), config);
    let report = client.memfill(&mut buf, 0).expect("fill");
    assert_eq!(report.enqueue_attempts, 10);

    // One more rejection than that fails without an 11th attempt
    let mut client = WorkQueueClient::with_config(SoftwarePortal::new().reject_first(10), config);
    assert!(matches!(
        client.memfill(&mut buf, 0),
        Err(DsaError::QueueSaturated { attempts: 10 })
    ));
    assert_eq!(client.portal().stats().attempts, 10);
}

/// Buffer that outlives a timed-out descriptor.
fn leaked(len: usize) -> &'static mut [u8] {
    vec![0u8; len].leak()
}

#[test]
fn stalled_device_times_out() {
    let buf = leaked(PAGE);
    let config = ClientConfig::default().with_poll_limit(Some(500));
    let mut client = WorkQueueClient::with_config(SoftwarePortal::new().stall(), config);

    let desc = Descriptor::memfill(buf, 0).expect("descriptor");
    // SAFETY: the buffer is leaked, so the stalled descriptor can never
    // write freed memory.
    let result = unsafe { client.submit_and_resume_bounded(desc) };
    assert!(matches!(result, Err(DsaError::CompletionTimeout { polls: 500 })));
}

#[test]
fn safe_path_waits_past_the_poll_limit() {
    let mut buf = vec![0u8; 16 * PAGE];
    let portal = SoftwarePortal::new().complete_after(Duration::from_millis(50));
    let config = ClientConfig::default().with_poll_limit(Some(10));
    let mut client = WorkQueueClient::with_config(portal, config);

    let report = client.memfill(&mut buf, u64::MAX).expect("fill");
    assert!(report.polls > 10);
    verify_fill(&buf, u64::MAX).expect("filled");
}

#[test]
fn failure_status_is_reported() {
    let mut buf = vec![0u8; PAGE];
    let mut client = WorkQueueClient::new(SoftwarePortal::new().fail_with(code::ADDR_ALIGN));

    match client.memfill(&mut buf, 0) {
        Err(DsaError::OperationFailed { status, .. }) => assert_eq!(status.code(), code::ADDR_ALIGN),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn resume_limit_stops_a_non_converging_transfer() {
    let mut buf = vec![0u8; PAGE];
    let config = ClientConfig::default().with_resume_limit(8);
    let mut client = WorkQueueClient::with_config(SoftwarePortal::new().fault_every(0), config);

    // One resumption for the single page plus eight of slack
    assert!(matches!(
        client.memfill(&mut buf, 0),
        Err(DsaError::ResumeLimitExceeded {
            resumptions: 9,
            remaining: 4096
        })
    ));
    assert_eq!(client.portal().stats().accepted, 10);
}

#[test]
fn fault_per_page_on_large_fill_completes_with_defaults() {
    let len = 32 << 20;
    let mut buf = vec![0u8; len];
    let mut client = WorkQueueClient::new(SoftwarePortal::new().fault_every(PAGE as u32));

    let report = client.memfill(&mut buf, u64::MAX).expect("fill");
    assert_eq!(report.resumptions(), len / PAGE - 1);
    assert_eq!(report.accounted_bytes(), len as u64);
    assert!(buf.iter().all(|&b| b == 0xff));
}

#[test]
fn transfer_limit_splits_a_faulting_move() {
    let src: Vec<u8> = (0..9 * PAGE as u32).map(|i| (i % 253) as u8).collect();
    let mut dst = vec![0u8; src.len()];
    let portal = SoftwarePortal::new()
        .with_max_transfer_size(2 * PAGE as u64)
        .fault_after(100);
    let mut client = WorkQueueClient::new(portal);

    let report = client.memmove(&src, &mut dst).expect("move");
    assert_eq!(report.resumptions(), 1);
    assert_eq!(report.accounted_bytes(), src.len() as u64);
    assert!(client
        .portal()
        .history()
        .iter()
        .all(|d| d.xfer_size as usize <= 2 * PAGE));
    verify_move(&src, &dst).expect("copied");
}

#[test]
fn reset_prevents_stale_success() {
    let buf = leaked(PAGE);
    let config = ClientConfig::default().with_poll_limit(Some(50));
    let mut client = WorkQueueClient::with_config(SoftwarePortal::new(), config);

    // A successful submission leaves status = SUCCESS in the record
    client.memfill(buf, 0).expect("first fill");
    assert_eq!(client.record().status().code(), code::SUCCESS);

    // A stalled resubmission must not observe that old status
    *client.portal_mut() = SoftwarePortal::new().stall();
    let desc = Descriptor::memfill(buf, 0).expect("descriptor");
    // SAFETY: the buffer is leaked and not used after the call.
    let result = unsafe { client.submit_and_resume_bounded(desc) };
    assert!(matches!(result, Err(DsaError::CompletionTimeout { .. })));
}

#[test]
fn single_shot_reports_partial_completion() {
    let mut buf = vec![0u8; 8 * PAGE];
    let mut client = WorkQueueClient::new(SoftwarePortal::new().fault_after(5 * PAGE as u32));

    let outcome = client
        .submit_once(Descriptor::memfill(&mut buf, u64::MAX).expect("descriptor"))
        .expect("submission");
    match outcome {
        CompletionOutcome::PageFault {
            bytes_completed, ..
        } => assert_eq!(bytes_completed as usize, 5 * PAGE),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        verify_fill(&buf, u64::MAX),
        Err(DsaError::ContentMismatch { offset, .. }) if offset == 5 * PAGE
    ));
}

/// Counter that advances one cycle per read; operations add their own cost.
struct FakeClock(Cell<u64>);

impl CycleCounter for FakeClock {
    fn now(&self) -> u64 {
        let v = self.0.get();
        self.0.set(v + 1);
        v
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[test]
fn sender_runs_one_operation_per_one_bit() {
    let clock = FakeClock(Cell::new(0));
    let mut buf = vec![0u8; PAGE];
    let mut client = WorkQueueClient::new(SoftwarePortal::new());

    let sender = Sender::new(&clock, SlotTable::new(1_000, 100).expect("slots"));
    let bits = alternating_bits(100);
    let report = sender
        .transmit(&bits, || client.memfill(&mut buf, u64::MAX).map(|_| ()))
        .expect("transmit");

    let ones = bits.iter().filter(|&&b| b).count();
    assert_eq!(report.operations(), ones);
    assert_eq!(client.portal().stats().accepted as usize, ones);
}
