//! Subcommand implementations
//!
//! Each command writes its user-facing result to the given writer and
//! leaves diagnostics to `tracing`.

use shmrt_core::storm::{
    STORM_MUTEX_OFFSET, counter_offset, increment_storm, read_counter, storm_segment_size,
};
use shmrt_core::{ChildHarness, ForkHarness, HarnessError, ShmError, ShmRuntime};
use std::io::Write;
use thiserror::Error;
use tracing::{info, warn};

const DUMP_WIDTH: usize = 16;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Runtime call failed
    #[error(transparent)]
    Shm(#[from] ShmError),

    /// Stress children could not be run
    #[error(transparent)]
    Harness(#[from] HarnessError),

    /// Writing output failed
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    /// Serializing output failed
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),

    /// Total increments would overflow the 32-bit counter
    #[error("{children} children x {iterations} iterations overflows the counter")]
    StormTooLarge {
        /// Requested children
        children: u32,
        /// Requested iterations per child
        iterations: u32,
    },

    /// The storm lost or invented increments
    #[error("counter is {actual}, expected {expected}")]
    CounterMismatch {
        /// Children x iterations
        expected: u32,
        /// Observed counter
        actual: u32,
    },
}

/// Create a segment and leave it in place for other processes.
pub fn create(
    runtime: &ShmRuntime,
    name: &str,
    size: usize,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    let segment = runtime.create_segment(name, size)?;
    writeln!(
        out,
        "created {} ({} bytes, generation {})",
        segment.name(),
        segment.size(),
        segment.generation()
    )?;
    Ok(())
}

/// Attach to a segment and optionally hex-dump its first `dump` bytes.
pub fn attach(
    runtime: &ShmRuntime,
    name: &str,
    size: usize,
    dump: Option<usize>,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    let segment = runtime.attach_segment(name, size)?;
    writeln!(
        out,
        "attached {} ({} bytes, generation {})",
        segment.name(),
        segment.size(),
        segment.generation()
    )?;

    if let Some(dump) = dump {
        let len = dump.min(segment.size());
        out.write_all(hex_dump(&segment.base().to_vec(0, len)).as_bytes())?;
    }
    Ok(())
}

/// Destroy a segment by name.
pub fn destroy(runtime: &ShmRuntime, name: &str, out: &mut impl Write) -> Result<(), CommandError> {
    runtime.destroy_segment(name)?;
    writeln!(out, "destroyed {name}")?;
    Ok(())
}

/// Print the live segment's description as JSON.
pub fn inspect(runtime: &ShmRuntime, name: &str, out: &mut impl Write) -> Result<(), CommandError> {
    let info = runtime.describe(name)?;
    serde_json::to_writer_pretty(&mut *out, &info)?;
    writeln!(out)?;
    Ok(())
}

/// Run an increment storm in `children` forked processes and verify the
/// final count.
pub fn stress(
    runtime: &ShmRuntime,
    children: u32,
    iterations: u32,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    let expected = children
        .checked_mul(iterations)
        .ok_or(CommandError::StormTooLarge {
            children,
            iterations,
        })?;

    let name = format!("stress_{}", std::process::id());
    let size = storm_segment_size(runtime);
    let counter = counter_offset(runtime);
    let segment = runtime.create_segment(&name, size)?;
    let mutex = runtime.create_mutex(&segment, STORM_MUTEX_OFFSET)?;

    info!(children, iterations, segment = %name, "starting increment storm");
    let started = std::time::Instant::now();

    let mut harness = ForkHarness::new();
    let outcome = (|| {
        for _ in 0..children {
            let child_runtime = runtime.clone();
            let child_name = name.clone();
            harness.spawn_child(move |ctx| {
                let run = || -> Result<(), ShmError> {
                    let segment = child_runtime.attach_segment(&child_name, size)?;
                    let mutex = child_runtime.attach_mutex(&segment, STORM_MUTEX_OFFSET)?;
                    increment_storm(&segment, &mutex, counter, iterations)
                };
                if let Err(e) = run() {
                    warn!("stress child failed: {e}");
                    ctx.signal_failed();
                }
            })?;
        }
        harness.wait_for_children()
    })();

    let actual = read_counter(&segment, &mutex, counter);
    drop(mutex);
    runtime.destroy_segment(&name)?;
    outcome?;
    let actual = actual?;

    writeln!(
        out,
        "counter {actual} / {expected} in {:.2?}",
        started.elapsed()
    )?;
    if actual != expected {
        return Err(CommandError::CounterMismatch { expected, actual });
    }
    Ok(())
}

/// Classic 16-bytes-per-line hex dump with offsets.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut text = String::new();
    for (line, chunk) in bytes.chunks(DUMP_WIDTH).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        text.push_str(&format!(
            "{:08x}  {:<width$}  |{ascii}|\n",
            line * DUMP_WIDTH,
            hex.join(" "),
            width = DUMP_WIDTH * 3 - 1
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(run: impl FnOnce(&mut Vec<u8>) -> Result<(), CommandError>) -> String {
        let mut out = Vec::new();
        run(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn unique(tag: &str) -> String {
        use std::sync::atomic::{AtomicU32, Ordering};
        static CTR: AtomicU32 = AtomicU32::new(0);
        let id = CTR.fetch_add(1, Ordering::Relaxed);
        format!("cli_{tag}_{}_{id}", std::process::id())
    }

    #[test]
    fn test_hex_dump_layout() {
        let dump = hex_dump(b"Hello, shm!\0\x01\x02\x03\x04\xff");
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000000  48 65 6c 6c 6f"));
        assert!(lines[0].ends_with("|Hello, shm!.....|"));
        assert!(lines[1].starts_with("00000010  ff"));
        assert!(lines[1].ends_with("|.|"));
        assert!(hex_dump(&[]).is_empty());
    }

    #[test]
    fn test_create_attach_inspect_destroy() {
        let runtime = ShmRuntime::default();
        let name = unique("cycle");

        let text = output(|out| create(&runtime, &name, 64, out));
        assert!(text.contains("64 bytes"));

        let text = output(|out| attach(&runtime, &name, 64, Some(100), out));
        assert!(text.starts_with("attached"));
        // 64 bytes clamp to four dump lines.
        assert_eq!(text.lines().count(), 1 + 4);

        let text = output(|out| inspect(&runtime, &name, out));
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["size"], 64);

        output(|out| destroy(&runtime, &name, out));
        let mut sink = Vec::new();
        assert!(matches!(
            inspect(&runtime, &name, &mut sink),
            Err(CommandError::Shm(ShmError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_stress_counts_exactly() {
        let runtime = ShmRuntime::default();
        let text = output(|out| stress(&runtime, 2, 5_000, out));
        assert!(text.starts_with("counter 10000 / 10000"));
    }

    #[test]
    fn test_stress_rejects_overflow() {
        let runtime = ShmRuntime::default();
        let mut sink = Vec::new();
        assert!(matches!(
            stress(&runtime, 2, u32::MAX, &mut sink),
            Err(CommandError::StormTooLarge { .. })
        ));
    }
}
