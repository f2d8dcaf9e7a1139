//! Hardware validation tests
//!
//! Need an enabled user-mode shared work queue (`accel-config`), so they are
//! ignored by default: `cargo test -- --ignored`.

use dsa_driver::channel::{alternating_bits, calibrate, Sender, SlotTable};
use dsa_driver::verify::{verify_fill, verify_move};
use dsa_driver::{HardwarePortal, HugePageBuffer, PageSize, Tsc, WorkQueueClient, WqManager};

#[test]
#[ignore] // Requires hardware
fn test_discovery_finds_usable_queue() {
    let mgr = WqManager::discover().expect("DSA work queues");
    let wq = mgr.first_usable().expect("user/shared queue");
    println!("{} on {}: size={} max_xfer={}", wq.name, wq.device, wq.size, wq.max_transfer_size);
}

#[test]
#[ignore] // Requires hardware
fn test_memmove_on_device() {
    let mut client = WorkQueueClient::new(HardwarePortal::open_first().expect("portal"));
    let src = vec![0xaau8; 1 << 20];
    let mut dst = vec![0u8; 1 << 20];

    let report = client.memmove(&src, &mut dst).expect("memmove");
    println!("memmove: {} resumptions, {} enqueue attempts", report.resumptions(), report.enqueue_attempts);
    verify_move(&src, &dst).expect("memmove result");
}

#[test]
#[ignore] // Requires hardware
fn test_memfill_untouched_pages_resumes() {
    // Fresh heap pages fault on first device access
    let mut client = WorkQueueClient::new(HardwarePortal::open_first().expect("portal"));
    let mut dst = vec![0u8; 16 << 20];

    let report = client.memfill(&mut dst, u64::MAX).expect("memfill");
    assert_eq!(report.accounted_bytes(), dst.len() as u64);
    verify_fill(&dst, u64::MAX).expect("memfill result");
}

#[test]
#[ignore] // Requires hardware and 2 MiB huge pages
fn test_sender_on_huge_pages() {
    let mut client = WorkQueueClient::new(HardwarePortal::open_first().expect("portal"));
    let mut buf = HugePageBuffer::with_fallback(64 << 20, PageSize::Huge2M).expect("buffer");
    let tsc = Tsc::new();

    let cal = calibrate(&tsc, 50, 16, || {
        client.memfill(buf.as_mut_slice(), u64::MAX).map(|_| ())
    })
    .expect("calibration");
    println!("unit = {} cycles, sampling interval = {}", cal.unit, cal.sampling_interval());

    let sender = Sender::new(&tsc, SlotTable::new(cal.unit, 100).expect("slots"));
    let report = sender
        .transmit(&alternating_bits(100), || {
            client.memfill(buf.as_mut_slice(), u64::MAX).map(|_| ())
        })
        .expect("transmit");
    println!("{} ops, {} missed, {} failed", report.operations(), report.missed(), report.failed());
}
