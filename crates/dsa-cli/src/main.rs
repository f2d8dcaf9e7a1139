//! `dsa`: command-line interface for Intel DSA shared work queues.
//!
//! ```text
//! USAGE:
//!   dsa enumerate                 List work queues and their configuration
//!   dsa memmove [--size N]        Copy a buffer through the accelerator
//!   dsa memfill [--no-resume]     Fill a buffer, resuming page faults
//!   dsa probe                     Cache/page-fault access latencies
//!   dsa calibrate                 Measure the slot unit
//!   dsa send [--bits 0101...]     Transmit bits on the timing-slot channel
//! ```
//!
//! Exit codes: 0 success, 1 other failure, 3 no device, 4 mapping failed,
//! 5 queue saturated, 6 completion timeout, 7 operation failed,
//! 8 content mismatch.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dsa_driver::channel::{alternating_bits, calibrate, Calibration, Sender, SlotOutcome, SlotTable};
use dsa_driver::cycles::estimate_hz;
use dsa_driver::probe::{probe_access, probe_fill, FillProbe};
use dsa_driver::verify::{verify_fill, verify_move, write_chunk_size};
use dsa_driver::{
    select_portal, ChannelConfig, ClientConfig, CompletionOutcome, CycleCounter, Descriptor,
    DsaError, HugePageBuffer, PageSize, PortalSelection, SubmissionPortal, TransferReport, Tsc,
    WorkQueueClient, WqManager,
};
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dsa", about = "Intel DSA work-queue CLI", version)]
struct Cli {
    #[command(flatten)]
    client: ClientOpts,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Args)]
struct ClientOpts {
    /// Run descriptors on the CPU instead of the accelerator.
    #[arg(long, global = true)]
    software: bool,

    /// Total ENQCMD attempts before giving up.
    #[arg(long, global = true, default_value_t = 1000)]
    retry_limit: u32,

    /// Give up after this many status polls (exit 6). Without it every
    /// request is waited for until the device reports; with it, buffers stay
    /// mapped until exit since a timed-out descriptor may still write them.
    #[arg(long, global = true)]
    poll_limit: Option<u32>,

    /// Page-fault resumptions allowed beyond one per 4 KiB page.
    #[arg(long, global = true, default_value_t = dsa_driver::config::DEFAULT_RESUME_LIMIT)]
    resume_limit: u32,

    /// Ask the device to leave written lines in the CPU cache.
    #[arg(long, global = true)]
    cache_control: bool,
}

#[derive(Args)]
struct BufferOpts {
    /// Transfer size (accepts K/M/G suffixes).
    #[arg(long, default_value = "64M", value_parser = parse_size)]
    size: usize,

    /// Page size backing the buffer.
    #[arg(long, value_enum, default_value_t = Pages::Normal)]
    pages: Pages,
}

#[derive(Clone, Copy, ValueEnum)]
enum Pages {
    Normal,
    #[value(name = "2m")]
    Huge2m,
    #[value(name = "1g")]
    Huge1g,
}

impl From<Pages> for PageSize {
    fn from(p: Pages) -> Self {
        match p {
            Pages::Normal => Self::Normal,
            Pages::Huge2m => Self::Huge2M,
            Pages::Huge1g => Self::Huge1G,
        }
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// List all DSA work queues.
    Enumerate,
    /// Copy a patterned buffer and verify the destination.
    Memmove {
        #[command(flatten)]
        buffer: BufferOpts,
        /// Source byte.
        #[arg(long, default_value = "0xaa", value_parser = parse_byte)]
        byte: u8,
    },
    /// Fill a buffer and verify it.
    Memfill {
        #[command(flatten)]
        buffer: BufferOpts,
        /// Fill byte.
        #[arg(long, default_value = "0xff", value_parser = parse_byte)]
        byte: u8,
        /// Submit once and report a partial completion instead of resuming.
        #[arg(long)]
        no_resume: bool,
    },
    /// Time loads after a page fault, a cache flush, while cached, and after a fill.
    Probe {
        #[command(flatten)]
        buffer: BufferOpts,
    },
    /// Measure the duration of one full fill (the slot unit).
    Calibrate {
        #[command(flatten)]
        buffer: BufferOpts,
        /// Timed operations.
        #[arg(long, default_value_t = ChannelConfig::default().calibration_rounds)]
        rounds: u32,
        /// Receiver samples per slot.
        #[arg(long, default_value_t = ChannelConfig::default().oversample)]
        oversample: u32,
    },
    /// Calibrate, then transmit bits one per slot.
    Send {
        #[command(flatten)]
        buffer: BufferOpts,
        /// Payload as a 0/1 string (default: alternating 0101...).
        #[arg(long)]
        bits: Option<String>,
        /// Slot count.
        #[arg(long, default_value_t = ChannelConfig::default().slot_count)]
        slots: usize,
        /// Calibration rounds.
        #[arg(long, default_value_t = ChannelConfig::default().calibration_rounds)]
        rounds: u32,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Cmd::Enumerate => cmd_enumerate(),
        Cmd::Memmove { buffer, byte } => cmd_memmove(&cli.client, &buffer, byte),
        Cmd::Memfill {
            buffer,
            byte,
            no_resume,
        } => cmd_memfill(&cli.client, &buffer, byte, no_resume),
        Cmd::Probe { buffer } => cmd_probe(&cli.client, &buffer),
        Cmd::Calibrate {
            buffer,
            rounds,
            oversample,
        } => cmd_calibrate(&cli.client, &buffer, rounds, oversample).map(|_| ()),
        Cmd::Send {
            buffer,
            bits,
            slots,
            rounds,
        } => cmd_send(&cli.client, &buffer, bits.as_deref(), slots, rounds),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(e: &anyhow::Error) -> u8 {
    match e.chain().find_map(|c| c.downcast_ref::<DsaError>()) {
        Some(DsaError::NoDeviceAvailable | DsaError::DeviceNotFound { .. }) => 3,
        Some(DsaError::MappingFailed { .. }) => 4,
        Some(DsaError::QueueSaturated { .. }) => 5,
        Some(DsaError::CompletionTimeout { .. }) => 6,
        Some(DsaError::OperationFailed { .. } | DsaError::ResumeLimitExceeded { .. }) => 7,
        Some(DsaError::ContentMismatch { .. }) => 8,
        _ => 1,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn parse_size(s: &str) -> std::result::Result<usize, String> {
    let s = s.trim();
    let (digits, shift) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 10),
        Some('M') => (&s[..s.len() - 1], 20),
        Some('G') => (&s[..s.len() - 1], 30),
        _ => (s, 0),
    };
    let n: usize = digits.parse().map_err(|e| format!("invalid size '{s}': {e}"))?;
    n.checked_mul(1 << shift)
        .ok_or_else(|| format!("size '{s}' overflows"))
}

fn parse_byte(s: &str) -> std::result::Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid byte '{s}': {e}"))
}

fn parse_bits(s: &str) -> Result<Vec<bool>> {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            other => bail!("invalid bit '{other}' (expected 0 or 1)"),
        })
        .collect()
}

type Client = WorkQueueClient<Box<dyn SubmissionPortal>>;

/// Client plus the wait policy chosen on the command line.
struct Runner {
    client: Client,
    bounded: bool,
}

/// Mapping handed to the device. Under `--poll-limit` it is never unmapped:
/// a timed-out descriptor may still be writing it.
struct DeviceBuffer {
    buf: ManuallyDrop<HugePageBuffer>,
    unmap: bool,
}

impl Deref for DeviceBuffer {
    type Target = HugePageBuffer;

    fn deref(&self) -> &HugePageBuffer {
        &self.buf
    }
}

impl DerefMut for DeviceBuffer {
    fn deref_mut(&mut self) -> &mut HugePageBuffer {
        &mut self.buf
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if self.unmap {
            // SAFETY: dropped exactly once, here.
            unsafe { ManuallyDrop::drop(&mut self.buf) };
        }
    }
}

impl Runner {
    fn open(opts: &ClientOpts) -> Result<Self> {
        let selection = if opts.software {
            PortalSelection::Software
        } else {
            PortalSelection::Hardware
        };
        let portal = select_portal(selection).context("Cannot open work-queue portal")?;

        let config = ClientConfig::default()
            .with_enqueue_retry_limit(opts.retry_limit)
            .with_poll_limit(opts.poll_limit)
            .with_resume_limit(opts.resume_limit)
            .with_cache_control(opts.cache_control);
        tracing::debug!("Client config: {config:?}");

        Ok(Self {
            client: WorkQueueClient::with_config(portal, config),
            bounded: opts.poll_limit.is_some(),
        })
    }

    fn allocate(&self, opts: &BufferOpts) -> Result<DeviceBuffer> {
        let buf = HugePageBuffer::with_fallback(opts.size, opts.pages.into())
            .with_context(|| format!("Cannot allocate {} bytes", opts.size))?;
        if buf.page_size() != PageSize::from(opts.pages) {
            println!("note: huge pages unavailable, using {} pages", buf.page_size());
        }
        Ok(DeviceBuffer {
            buf: ManuallyDrop::new(buf),
            unmap: !self.bounded,
        })
    }

    fn fill(&mut self, dst: &mut DeviceBuffer, pattern: u64) -> dsa_driver::Result<TransferReport> {
        let bounded = self.bounded && !dst.unmap;
        let desc = Descriptor::memfill(dst.as_mut_slice(), pattern)?;
        if bounded {
            // SAFETY: dst is never unmapped, so a timed-out fill cannot
            // write freed memory.
            unsafe { self.client.submit_and_resume_bounded(desc) }
        } else {
            self.client.submit_and_resume(desc)
        }
    }

    fn fill_once(&mut self, dst: &mut DeviceBuffer, pattern: u64) -> dsa_driver::Result<CompletionOutcome> {
        let bounded = self.bounded && !dst.unmap;
        let desc = Descriptor::memfill(dst.as_mut_slice(), pattern)?;
        if bounded {
            // SAFETY: as in `fill`.
            unsafe { self.client.submit_once_bounded(desc) }
        } else {
            self.client.submit_once(desc)
        }
    }

    fn copy(&mut self, src: &DeviceBuffer, dst: &mut DeviceBuffer) -> dsa_driver::Result<TransferReport> {
        let bounded = self.bounded && !src.unmap && !dst.unmap;
        let desc = Descriptor::memmove(src.as_slice(), dst.as_mut_slice())?;
        if bounded {
            // SAFETY: neither buffer is ever unmapped.
            unsafe { self.client.submit_and_resume_bounded(desc) }
        } else {
            self.client.submit_and_resume(desc)
        }
    }
}

fn print_report(report: &TransferReport) {
    println!("  requested    : {} bytes", report.requested);
    println!("  submissions  : {}", report.submissions);
    println!("  resumptions  : {} ({} bytes)", report.resumptions(), report.resumed_bytes());
    println!("  final size   : {} bytes", report.final_size);
    println!("  enq attempts : {}", report.enqueue_attempts);
    println!("  polls        : {}", report.polls);
}

// ── Commands ─────────────────────────────────────────────────────────────────

fn cmd_enumerate() -> Result<()> {
    let mgr = WqManager::discover()?;

    println!("DSA work queues: {}", mgr.queue_count());
    println!();

    for wq in mgr.queues() {
        let mode = wq.mode.map_or_else(|| "?".to_string(), |m| m.to_string());
        let marker = if wq.is_usable() { "*" } else { " " };
        println!("{marker} {} ({}) @ {}", wq.name, wq.device, wq.dev_path.display());
        println!("     type {}  mode {mode}  state {}", wq.wq_type, wq.state);
        println!(
            "     size {}  max_transfer {} bytes  priority {}",
            wq.size, wq.max_transfer_size, wq.priority
        );
    }

    match mgr.first_usable() {
        Ok(wq) => println!("\nSelected: {}", wq.name),
        Err(_) => println!("\nNo usable queue (need type=user, mode=shared, enabled)"),
    }
    Ok(())
}

fn cmd_memmove(client_opts: &ClientOpts, opts: &BufferOpts, byte: u8) -> Result<()> {
    let mut runner = Runner::open(client_opts)?;
    let mut src = runner.allocate(opts)?;
    let mut dst = runner.allocate(opts)?;
    src.as_mut_slice().fill(byte);

    println!("memmove {} bytes ({:#04x})", opts.size, byte);
    let report = runner.copy(&src, &mut dst)?;
    print_report(&report);

    verify_move(src.as_slice(), dst.as_slice())?;
    println!("memmove successful: content match");
    Ok(())
}

fn cmd_memfill(client_opts: &ClientOpts, opts: &BufferOpts, byte: u8, no_resume: bool) -> Result<()> {
    let mut runner = Runner::open(client_opts)?;
    let mut buf = runner.allocate(opts)?;
    let pattern = u64::from_ne_bytes([byte; 8]);

    println!("memfill {} bytes ({:#04x})", opts.size, byte);

    if no_resume {
        match runner.fill_once(&mut buf, pattern)? {
            CompletionOutcome::Success => {
                verify_fill(buf.as_slice(), pattern)?;
                println!("memfill successful: content match");
            }
            CompletionOutcome::PageFault {
                bytes_completed,
                fault_addr,
                write,
            } => {
                println!("partially complete: {bytes_completed} bytes");
                println!(
                    "  fault at {fault_addr:#x} ({})",
                    if write { "write" } else { "read" }
                );
                match write_chunk_size(bytes_completed) {
                    Some(chunk) => println!("  possible write chunk size: {chunk}"),
                    None => println!("  write chunk size: undetermined"),
                }
            }
            CompletionOutcome::Failed {
                status,
                bytes_completed,
            } => {
                return Err(DsaError::OperationFailed {
                    status,
                    bytes_completed,
                }
                .into())
            }
        }
        return Ok(());
    }

    let report = runner.fill(&mut buf, pattern)?;
    print_report(&report);
    verify_fill(buf.as_slice(), pattern)?;
    println!("memfill successful: content match");
    Ok(())
}

fn cmd_probe(client_opts: &ClientOpts, opts: &BufferOpts) -> Result<()> {
    let tsc = Tsc::new();
    let mut runner = Runner::open(client_opts)?;
    let mut buf = HugePageBuffer::new_untouched(opts.size, opts.pages.into())
        .or_else(|_| HugePageBuffer::new_untouched(opts.size, PageSize::Normal))
        .with_context(|| format!("Cannot allocate {} bytes", opts.size))?;

    let lat = probe_access(&tsc, buf.as_slice())?;
    println!("access latency ({} pages, {} cycles):", buf.page_size(), tsc.name());
    println!("  page fault    : {}", lat.first_touch);
    println!("  after clflush : {}", lat.after_flush);
    println!("  cached        : {}", lat.cached);

    match probe_fill(&mut runner.client, &tsc, buf.as_mut_slice(), u64::MAX)? {
        FillProbe::Completed {
            last_byte,
            first_byte,
        } => {
            println!("after memfill:");
            println!("  last byte     : {last_byte}");
            println!("  first byte    : {first_byte}");
        }
        FillProbe::Partial {
            bytes_completed,
            write_chunk,
        } => {
            println!("memfill partially complete: {bytes_completed} bytes");
            if let Some(chunk) = write_chunk {
                println!("  possible write chunk size: {chunk}");
            }
        }
    }
    Ok(())
}

fn cmd_calibrate(
    client_opts: &ClientOpts,
    opts: &BufferOpts,
    rounds: u32,
    oversample: u32,
) -> Result<Calibration> {
    let tsc = Tsc::new();
    let mut runner = Runner::open(client_opts)?;
    let mut buf = runner.allocate(opts)?;
    run_calibration(&tsc, &mut runner, &mut buf, rounds, oversample)
}

fn run_calibration(
    tsc: &Tsc,
    runner: &mut Runner,
    buf: &mut DeviceBuffer,
    rounds: u32,
    oversample: u32,
) -> Result<Calibration> {
    let cal = calibrate(tsc, rounds, oversample, || {
        runner.fill(buf, u64::MAX).map(|_| ())
    })?;

    let hz = estimate_hz(tsc, Duration::from_millis(100));
    #[allow(clippy::cast_precision_loss)]
    let unit_us = cal.unit as f64 / hz * 1e6;

    println!("calibration over {rounds} fills of {} bytes:", buf.len());
    println!("  unit              : {} cycles (~{unit_us:.1} µs)", cal.unit);
    if let (Some(mean), Some(max)) = (cal.mean_sample(), cal.max_sample()) {
        println!("  mean / max        : {mean:.0} / {max} cycles");
    }
    println!("  oversample        : {}", cal.oversample);
    println!("  sampling interval : {} cycles", cal.sampling_interval());
    Ok(cal)
}

fn cmd_send(
    client_opts: &ClientOpts,
    opts: &BufferOpts,
    bits: Option<&str>,
    slots: usize,
    rounds: u32,
) -> Result<()> {
    let payload = match bits {
        Some(s) => parse_bits(s)?,
        None => alternating_bits(slots),
    };
    if payload.len() > slots {
        bail!("{} bits do not fit in {slots} slots", payload.len());
    }

    let tsc = Tsc::new();
    let mut runner = Runner::open(client_opts)?;
    let mut buf = runner.allocate(opts)?;
    let cal = run_calibration(
        &tsc,
        &mut runner,
        &mut buf,
        rounds,
        ChannelConfig::default().oversample,
    )?;

    let sender = Sender::new(&tsc, SlotTable::new(cal.unit, slots)?);
    let report = sender.transmit(&payload, || {
        runner.fill(&mut buf, u64::MAX).map(|_| ())
    })?;

    let line: String = report
        .outcomes
        .iter()
        .map(|o| match o {
            SlotOutcome::Silent => '0',
            SlotOutcome::Triggered => '1',
            SlotOutcome::Failed => '!',
            SlotOutcome::Missed => 'x',
        })
        .collect();

    println!("sent {} bits in {} cycles:", payload.len(), report.end - report.start);
    println!("  {line}");
    println!(
        "  {} ops, {} failed, {} missed",
        report.operations(),
        report.failed(),
        report.missed()
    );
    Ok(())
}
