//! Operation latency benchmark: memfill and memmove across transfer sizes.
//!
//! Each sample is one fenced submit + completion wait, timed with the TSC.
//! Buffers are pre-faulted so the numbers exclude page-fault resumption.
//!
//! Usage:
//!   cargo run --release --bin bench_latency
//!   cargo run --release --bin bench_latency -- --iterations 2000 --software

use anyhow::Result;
use dsa_driver::{
    select_portal, CycleCounter, PortalSelection, SubmissionPortal, Tsc,
    WorkQueueClient,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_ITERATIONS: usize = 1000;
const SIZES: [usize; 7] = [64, 256, 4 << 10, 64 << 10, 256 << 10, 1 << 20, 2 << 20];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let iterations = parse_arg(&args, "--iterations", DEFAULT_ITERATIONS).max(1);
    let selection = if args.iter().any(|a| a == "--software") {
        PortalSelection::Software
    } else {
        PortalSelection::Auto
    };

    let portal = select_portal(selection)?;
    let portal_type = portal.portal_type();
    let mut client = WorkQueueClient::new(portal);

    let tsc = Tsc::new();
    let hz = dsa_driver::cycles::estimate_hz(&tsc, Duration::from_millis(200));

    println!("DSA operation latency benchmark");
    println!("===============================");
    println!("Portal     : {portal_type}");
    println!("Iterations : {iterations}");
    println!("Counter    : {} (~{:.2} GHz)", tsc.name(), hz / 1e9);
    println!();

    println!(
        "  {:>8}  {:>8}  {:>9}  {:>9}  {:>9}  {:>9}  {:>10}",
        "op", "size", "min", "p50", "p99", "max", "GB/s (p50)"
    );

    for &size in &SIZES {
        let src = vec![0xaau8; size];
        let mut dst = vec![0u8; size];

        let fill = measure(&tsc, iterations, || {
            client.memfill(&mut dst, u64::MAX).map(|_| ())
        })?;
        print_row("memfill", size, &fill, hz);

        let moved = measure(&tsc, iterations, || {
            client.memmove(&src, &mut dst).map(|_| ())
        })?;
        print_row("memmove", size, &moved, hz);
    }

    Ok(())
}

/// Sorted per-operation cycle counts after a short warmup.
fn measure<F>(tsc: &Tsc, iterations: usize, mut op: F) -> Result<Vec<u64>>
where
    F: FnMut() -> dsa_driver::Result<()>,
{
    // Warmup (also faults every page in)
    for _ in 0..20 {
        op()?;
    }

    let mut cycles = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let t0 = tsc.now();
        op()?;
        cycles.push(tsc.now().saturating_sub(t0));
    }
    cycles.sort_unstable();
    Ok(cycles)
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn print_row(op: &str, size: usize, cycles: &[u64], hz: f64) {
    let n = cycles.len();
    let p50 = cycles[n / 2];
    let p99 = cycles[((n as f64 * 0.99) as usize).min(n - 1)];
    let gbps = if p50 == 0 {
        0.0
    } else {
        size as f64 / (p50 as f64 / hz) / 1e9
    };
    println!(
        "  {:>8}  {:>8}  {:>9}  {:>9}  {:>9}  {:>9}  {:>10.2}",
        op,
        size,
        cycles[0],
        p50,
        p99,
        cycles[n - 1],
        gbps
    );
}

fn parse_arg(args: &[String], flag: &str, default: usize) -> usize {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
