//! Work-queue client
//!
//! Owns a portal and one completion record and runs the submission
//! protocol:
//!
//! 1. point the descriptor at the record and reset its status
//! 2. store-fence, then enqueue, retrying while the shared queue is full
//! 3. spin on the status byte until it becomes nonzero
//! 4. on a recoverable page fault, touch the faulting address, skip the
//!    completed prefix and go back to 1
//!
//! Requests larger than the queue's `max_transfer_size` go out in chunks
//! through the same loop. The safe entry points wait without a poll limit;
//! bounded waits are `unsafe` because a timed-out descriptor still owns its
//! buffers.
//!
//! Recoverable faults never surface as errors; they are listed in the
//! returned [`TransferReport`].

use crate::arch;
use crate::completion::{CompletionOutcome, CompletionRecord};
use crate::config::ClientConfig;
use crate::descriptor::Descriptor;
use crate::error::{DsaError, Result};
use crate::portal::{Enqueue, SubmissionPortal};
use dsa_hw::opcode::Operation;
use tracing::{debug, trace, warn};

/// One recoverable page fault and the resumption it caused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFaultStep {
    /// Bytes completed by the faulting submission
    pub bytes_completed: u32,
    /// Faulting virtual address
    pub fault_addr: u64,
    /// Fault hit the write side
    pub write: bool,
}

/// Accounting for one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Operation performed
    pub operation: Option<Operation>,
    /// Bytes requested by the caller
    pub requested: u32,
    /// Partial completions, in order
    pub faults: Vec<PageFaultStep>,
    /// Sizes of the chunks completed before the last one, when the request
    /// exceeded the queue's transfer limit
    pub chunks: Vec<u32>,
    /// Size of the submission that finally succeeded
    pub final_size: u32,
    /// Descriptors accepted by the queue
    pub submissions: u32,
    /// Enqueue attempts, including rejected ones
    pub enqueue_attempts: u32,
    /// Status reads across all submissions
    pub polls: u64,
}

impl TransferReport {
    fn new(operation: Option<Operation>, requested: u32) -> Self {
        Self {
            operation,
            requested,
            faults: Vec::new(),
            chunks: Vec::new(),
            final_size: 0,
            submissions: 0,
            enqueue_attempts: 0,
            polls: 0,
        }
    }

    /// Bytes completed by submissions that ended in a page fault.
    #[must_use]
    pub fn resumed_bytes(&self) -> u64 {
        self.faults.iter().map(|f| u64::from(f.bytes_completed)).sum()
    }

    /// Number of resumptions.
    #[must_use]
    pub fn resumptions(&self) -> usize {
        self.faults.len()
    }

    /// Bytes completed by earlier chunks of a split request.
    #[must_use]
    pub fn chunked_bytes(&self) -> u64 {
        self.chunks.iter().copied().map(u64::from).sum()
    }

    /// Bytes accounted for; equals `requested` for a completed request.
    #[must_use]
    pub fn accounted_bytes(&self) -> u64 {
        self.chunked_bytes() + self.resumed_bytes() + u64::from(self.final_size)
    }
}

/// Client bound to one submission portal.
#[derive(Debug)]
pub struct WorkQueueClient<P: SubmissionPortal> {
    portal: P,
    config: ClientConfig,
    record: Box<CompletionRecord>,
}

impl<P: SubmissionPortal> WorkQueueClient<P> {
    /// Client with default limits.
    pub fn new(portal: P) -> Self {
        Self::with_config(portal, ClientConfig::default())
    }

    /// Client with explicit limits.
    pub fn with_config(portal: P, config: ClientConfig) -> Self {
        Self {
            portal,
            config,
            record: Box::default(),
        }
    }

    /// Underlying portal.
    pub const fn portal(&self) -> &P {
        &self.portal
    }

    /// Underlying portal, mutably (for scripted software portals).
    pub fn portal_mut(&mut self) -> &mut P {
        &mut self.portal
    }

    /// Active limits.
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Completion record used for every submission.
    pub fn record(&self) -> &CompletionRecord {
        &self.record
    }

    /// Place `desc` in the queue.
    ///
    /// Resets the completion record, fences, then retries the enqueue until
    /// it is accepted. Returns the number of attempts made (at least 1 and
    /// never more than the configured limit).
    ///
    /// # Errors
    ///
    /// Returns `QueueSaturated` when every attempt was rejected.
    ///
    /// # Safety
    ///
    /// The buffers `desc` borrows must not be dropped or accessed until
    /// [`await_completion`](Self::await_completion) reports a terminal
    /// outcome: the device writes them asynchronously.
    pub unsafe fn submit(&mut self, desc: &mut Descriptor<'_>) -> Result<u32> {
        desc.attach(&self.record);
        self.record.reset();
        arch::store_fence();

        let limit = self.config.enqueue_retry_limit.max(1);
        for attempt in 1..=limit {
            // SAFETY: descriptor addresses are kept alive by the caller
            // contract; the record is owned by self.
            match unsafe { self.portal.enqueue(desc.hw()) } {
                Enqueue::Accepted => {
                    trace!("descriptor accepted after {attempt} attempt(s)");
                    return Ok(attempt);
                }
                Enqueue::Rejected => {}
            }
        }

        warn!("work queue saturated after {limit} attempts");
        Err(DsaError::QueueSaturated { attempts: limit })
    }

    /// Spin until the completion record is written, giving up after the
    /// configured poll limit.
    ///
    /// # Errors
    ///
    /// Returns `CompletionTimeout` when a poll limit is configured and the
    /// record stays pending for all of it.
    pub fn await_completion(&mut self) -> Result<CompletionOutcome> {
        self.wait(self.config.poll_limit).map(|(outcome, _)| outcome)
    }

    fn wait(&mut self, poll_limit: Option<u32>) -> Result<(CompletionOutcome, u32)> {
        let mut polls = 0u32;
        loop {
            polls = polls.saturating_add(1);
            if let Some(outcome) = self.record.outcome() {
                return Ok((outcome, polls));
            }
            if poll_limit.is_some_and(|limit| polls >= limit) {
                self.abandon_record();
                warn!("completion still pending after {polls} polls");
                return Err(DsaError::CompletionTimeout { polls });
            }
            std::hint::spin_loop();
        }
    }

    /// The device may still write the record after a timeout, so it is
    /// leaked rather than freed or reused.
    fn abandon_record(&mut self) {
        let stale = std::mem::take(&mut self.record);
        let _ = Box::leak(stale);
    }

    fn prepare<'a>(&self, desc: Descriptor<'a>) -> Descriptor<'a> {
        if self.config.cache_control {
            desc.with_cache_control(true)
        } else {
            desc
        }
    }

    /// Largest single submission, from the queue's `max_transfer_size`.
    fn chunk_limit(&self) -> Option<u32> {
        self.portal
            .max_transfer_size()
            .filter(|&max| max > 0)
            .map(|max| u32::try_from(max).unwrap_or(u32::MAX))
    }

    /// Submit once and wait for a terminal status, without resuming page
    /// faults. Requests above the queue's transfer limit are rejected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDescriptor` for an oversized request and
    /// `QueueSaturated` when the queue stays full. Page faults and failures
    /// are returned as outcomes, not errors.
    pub fn submit_once(&mut self, desc: Descriptor<'_>) -> Result<CompletionOutcome> {
        // SAFETY: without a poll limit the wait only returns on a terminal
        // status, after which the device no longer touches the buffers.
        unsafe { self.run_once(desc, None) }
    }

    /// [`submit_once`](Self::submit_once) under the configured poll limit.
    ///
    /// # Errors
    ///
    /// As [`submit_once`](Self::submit_once), plus `CompletionTimeout`.
    ///
    /// # Safety
    ///
    /// On `CompletionTimeout` the descriptor is still in flight: the buffers
    /// it borrowed must never be freed, reused or read afterwards.
    pub unsafe fn submit_once_bounded(&mut self, desc: Descriptor<'_>) -> Result<CompletionOutcome> {
        // SAFETY: forwarded contract.
        unsafe { self.run_once(desc, self.config.poll_limit) }
    }

    /// Caller upholds the `submit_once_bounded` contract when `poll_limit` is set.
    unsafe fn run_once(&mut self, desc: Descriptor<'_>, poll_limit: Option<u32>) -> Result<CompletionOutcome> {
        let mut desc = self.prepare(desc);
        if desc.transfer_size() == 0 {
            return Ok(CompletionOutcome::Success);
        }
        if let Some(max) = self.chunk_limit().filter(|&max| desc.transfer_size() > max) {
            return Err(DsaError::invalid_descriptor(format!(
                "{} bytes exceed the queue's {max} byte transfer limit",
                desc.transfer_size()
            )));
        }
        // SAFETY: desc borrows its buffers until the wait below returns; a
        // timeout is covered by the caller.
        unsafe { self.submit(&mut desc) }?;
        self.wait(poll_limit).map(|(outcome, _)| outcome)
    }

    /// Run `desc` to completion, resuming every recoverable page fault and
    /// splitting it at the queue's transfer limit.
    ///
    /// Waits without a poll limit. A zero-length request completes
    /// immediately without touching the queue.
    ///
    /// # Errors
    ///
    /// Returns `QueueSaturated`, `OperationFailed`, or `ResumeLimitExceeded`
    /// once the request has faulted more than
    /// [`ClientConfig::resume_allowance`] times.
    pub fn submit_and_resume(&mut self, desc: Descriptor<'_>) -> Result<TransferReport> {
        // SAFETY: without a poll limit every wait ends on a terminal status.
        unsafe { self.run(desc, None) }
    }

    /// [`submit_and_resume`](Self::submit_and_resume) under the configured
    /// poll limit.
    ///
    /// # Errors
    ///
    /// As [`submit_and_resume`](Self::submit_and_resume), plus
    /// `CompletionTimeout`.
    ///
    /// # Safety
    ///
    /// On `CompletionTimeout` the descriptor is still in flight: the buffers
    /// it borrowed must never be freed, reused or read afterwards.
    pub unsafe fn submit_and_resume_bounded(&mut self, desc: Descriptor<'_>) -> Result<TransferReport> {
        // SAFETY: forwarded contract.
        unsafe { self.run(desc, self.config.poll_limit) }
    }

    /// Caller upholds the `submit_and_resume_bounded` contract when
    /// `poll_limit` is set.
    unsafe fn run(&mut self, desc: Descriptor<'_>, poll_limit: Option<u32>) -> Result<TransferReport> {
        let mut desc = self.prepare(desc);
        let mut report = TransferReport::new(desc.operation(), desc.transfer_size());
        if report.requested == 0 {
            debug!("zero-length {:?} completed without submission", report.operation);
            return Ok(report);
        }

        let chunk_limit = self.chunk_limit();
        let allowance = self.config.resume_allowance(report.requested);

        loop {
            let held = desc.hold_back(chunk_limit);
            let size = desc.transfer_size();

            // SAFETY: desc borrows its buffers for its whole lifetime and we
            // wait for a terminal status before resubmitting or returning;
            // a timeout is covered by the caller.
            let submitted = unsafe { self.submit(&mut desc) };
            desc.restore(held);
            report.enqueue_attempts += submitted?;
            report.submissions += 1;

            let (outcome, polls) = self.wait(poll_limit)?;
            report.polls += u64::from(polls);

            match outcome {
                CompletionOutcome::Success if held > 0 => {
                    trace!("chunk of {size} bytes done, {held} to go");
                    desc.advance(size)?;
                    report.chunks.push(size);
                }
                CompletionOutcome::Success => {
                    report.final_size = size;
                    debug!(
                        "{:?} of {} bytes done: {} chunk(s), {} resumption(s), {} enqueue attempt(s)",
                        report.operation,
                        report.requested,
                        report.chunks.len() + 1,
                        report.resumptions(),
                        report.enqueue_attempts
                    );
                    return Ok(report);
                }
                CompletionOutcome::PageFault {
                    bytes_completed,
                    fault_addr,
                    write,
                } => {
                    let resumptions = u32::try_from(report.faults.len()).unwrap_or(u32::MAX);
                    if resumptions >= allowance {
                        warn!("resume allowance of {allowance} reached");
                        return Err(DsaError::ResumeLimitExceeded {
                            resumptions,
                            remaining: desc.transfer_size(),
                        });
                    }

                    debug!(
                        "page fault at {fault_addr:#x} ({}) after {bytes_completed} bytes, resuming",
                        if write { "write" } else { "read" }
                    );
                    touch_fault(&desc, fault_addr, write);
                    desc.advance(bytes_completed)?;
                    report.faults.push(PageFaultStep {
                        bytes_completed,
                        fault_addr,
                        write,
                    });
                }
                CompletionOutcome::Failed {
                    status,
                    bytes_completed,
                } => {
                    warn!("descriptor failed: status {status}");
                    return Err(DsaError::OperationFailed {
                        status,
                        bytes_completed,
                    });
                }
            }
        }
    }

    /// Copy `src` into `dst` (equal lengths).
    ///
    /// # Errors
    ///
    /// See [`Descriptor::memmove`] and [`submit_and_resume`](Self::submit_and_resume).
    pub fn memmove(&mut self, src: &[u8], dst: &mut [u8]) -> Result<TransferReport> {
        self.submit_and_resume(Descriptor::memmove(src, dst)?)
    }

    /// Repeat `pattern` over `dst`.
    ///
    /// # Errors
    ///
    /// See [`Descriptor::memfill`] and [`submit_and_resume`](Self::submit_and_resume).
    pub fn memfill(&mut self, dst: &mut [u8], pattern: u64) -> Result<TransferReport> {
        self.submit_and_resume(Descriptor::memfill(dst, pattern)?)
    }
}

/// Fault the page in from the CPU so the resubmission finds it mapped:
/// a write for write-side faults, a read otherwise.
///
/// Only addresses inside the descriptor's remaining buffers are touched;
/// anything else is left to the resume allowance.
fn touch_fault(desc: &Descriptor<'_>, fault_addr: u64, write: bool) {
    let hw = desc.hw();
    let len = u64::from(hw.xfer_size);
    let within = |base: u64| fault_addr >= base && fault_addr - base < len;
    let in_src = matches!(desc.operation(), Some(Operation::Move)) && within(hw.src);
    if !(within(hw.dst_addr) || in_src) {
        warn!("fault address {fault_addr:#x} outside the transfer, not touching it");
        return;
    }

    #[allow(clippy::cast_possible_truncation)]
    let ptr = fault_addr as usize as *mut u8;
    // SAFETY: ptr lies inside a buffer the descriptor borrows, and no
    // submission is in flight. Writing back the byte just read leaves the
    // contents unchanged.
    unsafe {
        let value = ptr.read_volatile();
        if write {
            ptr.write_volatile(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portals::SoftwarePortal;
    use std::time::Duration;

    #[test]
    fn fill_without_faults_is_one_submission() {
        let mut buf = vec![0u8; 4096];
        let mut client = WorkQueueClient::new(SoftwarePortal::new());
        let report = client.memfill(&mut buf, u64::from_ne_bytes([0x5a; 8])).expect("fill");
        assert_eq!(report.submissions, 1);
        assert_eq!(report.final_size, 4096);
        assert!(report.faults.is_empty());
        assert!(buf.iter().all(|&b| b == 0x5a));
    }

    #[test]
    fn zero_length_request_skips_the_queue() {
        let mut buf: Vec<u8> = Vec::new();
        let mut client = WorkQueueClient::new(SoftwarePortal::new().reject_always());
        let report = client.memfill(&mut buf, 0).expect("empty fill");
        assert_eq!(report.submissions, 0);
        assert_eq!(client.portal().stats().attempts, 0);
    }

    #[test]
    fn touch_ignores_foreign_addresses() {
        let mut buf = [0u8; 16];
        let desc = Descriptor::memfill_byte(&mut buf, 1).expect("descriptor");
        // Outside the buffer: must return without dereferencing
        touch_fault(&desc, 0x10, true);
    }

    #[test]
    fn timeout_replaces_the_record() {
        let buf: &'static mut [u8] = vec![0u8; 16].leak();
        let config = ClientConfig::default().with_poll_limit(Some(5));
        let mut client = WorkQueueClient::with_config(SoftwarePortal::new().stall(), config);
        let before = client.record().addr();
        let desc = Descriptor::memfill_byte(buf, 0).expect("descriptor");
        // SAFETY: the buffer is leaked and never touched again.
        let err = unsafe { client.submit_and_resume_bounded(desc) }.unwrap_err();
        assert!(matches!(err, DsaError::CompletionTimeout { polls: 5 }));
        assert_ne!(client.record().addr(), before);
    }

    #[test]
    fn unbounded_wait_outlasts_the_poll_limit() {
        let mut buf = vec![0u8; 4096];
        let portal = SoftwarePortal::new().complete_after(Duration::from_millis(20));
        let config = ClientConfig::default().with_poll_limit(Some(1));
        let mut client = WorkQueueClient::with_config(portal, config);

        let report = client.memfill(&mut buf, u64::MAX).expect("fill");
        assert!(report.polls > 1);
        assert!(buf.iter().all(|&b| b == 0xff));
    }

    #[test]
    fn oversized_request_is_split_into_chunks() {
        let mut buf = vec![0u8; 10_000];
        let pattern = u64::from_ne_bytes([1, 2, 3, 4, 5, 6, 7, 8]);
        let mut client = WorkQueueClient::new(SoftwarePortal::new().with_max_transfer_size(4096));

        let report = client.memfill(&mut buf, pattern).expect("fill");
        assert_eq!(report.chunks, vec![4096, 4096]);
        assert_eq!(report.final_size, 10_000 - 8192);
        assert_eq!(report.submissions, 3);
        assert_eq!(report.accounted_bytes(), 10_000);
        assert!(client.portal().history().iter().all(|d| d.xfer_size <= 4096));
        crate::verify::verify_fill(&buf, pattern).expect("filled");
    }

    #[test]
    fn single_shot_rejects_oversized_request() {
        let mut buf = vec![0u8; 8192];
        let mut client = WorkQueueClient::new(SoftwarePortal::new().with_max_transfer_size(4096));

        let desc = Descriptor::memfill_byte(&mut buf, 0xff).expect("descriptor");
        assert!(matches!(
            client.submit_once(desc),
            Err(DsaError::InvalidDescriptor { .. })
        ));
        assert_eq!(client.portal().stats().attempts, 0);
    }
}
