//! # cephlink CLI
//!
//! Self-check harness for the native bridge primitives.
//!
//! ## Commands
//!
//! - `cephlink registry` - Concurrent add/lookup/remove churn on a registry
//! - `cephlink guards` - Randomized pointer guard store/release over native cells
//! - `cephlink sizer` - Print the attempt sequence of a resize loop

use std::ffi::c_void;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nix::errno::Errno;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use cephlink_bridge::errno::is_range;
use cephlink_bridge::{BridgeError, Callbacks, PtrGuard, Sizer};
use cephlink_config::Config;

/// cephlink - native storage bridge self-checks
#[derive(Parser)]
#[command(name = "cephlink")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (default: $CEPHLINK_CONFIG or ~/.config/cephlink/config.toml)
    #[arg(long, global = true, env = "CEPHLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Churn a callback registry from many threads
    Registry {
        /// Worker threads (default: number of CPUs)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Add/lookup/remove rounds per worker
        #[arg(short, long, default_value_t = 10_000)]
        iterations: usize,
    },

    /// Toggle pointer guards at random over natively allocated cells
    Guards {
        /// Number of independent guards
        #[arg(short, long, default_value_t = 1000)]
        guards: usize,

        /// Total store/release operations
        #[arg(short, long, default_value_t = 10_000)]
        ops: usize,

        /// RNG seed
        #[arg(short, long, default_value_t = 0)]
        seed: u64,
    },

    /// Show the sizes a resize loop tries for a given requirement
    Sizer {
        #[arg(long, default_value_t = 1)]
        start: usize,

        #[arg(long, default_value_t = 1024)]
        max: usize,

        /// Size the simulated native call needs
        #[arg(long)]
        need: usize,

        /// Simulated call reports the size it needs on failure
        #[arg(long)]
        hint: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };
    match cli.verbose {
        0 => {}
        1 => config.log.level = "debug".into(),
        _ => config.log.level = "trace".into(),
    }
    cephlink_config::logging::init_logging(&config.log)?;
    let config = cephlink_config::install(config);
    debug!(?config, "Configuration installed");

    match cli.command {
        Commands::Registry {
            workers,
            iterations,
        } => cmd_registry(workers.unwrap_or_else(num_cpus::get), iterations),
        Commands::Guards { guards, ops, seed } => cmd_guards(guards, ops, seed),
        Commands::Sizer {
            start,
            max,
            need,
            hint,
        } => cmd_sizer(start, max, need, hint),
    }
}

/// Concurrent churn on one registry; checks the table stays bounded.
fn cmd_registry(workers: usize, iterations: usize) -> Result<()> {
    if workers == 0 {
        bail!("--workers must be at least 1");
    }
    let cbks: Arc<Callbacks<String>> = Arc::new(Callbacks::new());
    let started = Instant::now();

    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let cbks = Arc::clone(&cbks);
            thread::Builder::new()
                .name(format!("registry-{w}"))
                .spawn(move || -> Result<()> {
                    for i in 0..iterations {
                        let names = ["foo", "bar", "baz"].map(|n| format!("{n}-{w}-{i}"));
                        let tokens: Vec<_> = names.iter().map(|n| cbks.add(n.clone())).collect();
                        for (token, name) in tokens.iter().zip(&names) {
                            match cbks.lookup(*token) {
                                Some(found) if *found == *name => {}
                                other => {
                                    bail!("token {token} resolved to {other:?}, expected {name}")
                                }
                            }
                        }
                        for token in tokens.into_iter().rev() {
                            cbks.remove(token);
                        }
                    }
                    Ok(())
                })
                .context("Failed to spawn registry worker")
        })
        .collect::<Result<Vec<_>>>()?;

    for handle in handles {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => bail!("registry worker panicked"),
        }
    }

    let (live, slots) = (cbks.live(), cbks.slots());
    info!(workers, iterations, elapsed = ?started.elapsed(), "Registry churn finished");
    println!("Registry churn: {} workers x {} rounds", workers, iterations);
    println!("  live:  {}", live);
    println!("  slots: {} (bound {})", slots, workers * 3 + 1);
    if live != 0 {
        bail!("{live} tokens leaked");
    }
    if slots > workers * 3 + 1 {
        bail!("registry grew to {slots} slots");
    }
    Ok(())
}

/// Block of pointer cells from the C allocator.
struct NativeCells {
    base: *mut *mut c_void,
    len: usize,
}

// SAFETY: each cell is only written by the guard that currently owns it and
// read under the slot lock.
unsafe impl Send for NativeCells {}
unsafe impl Sync for NativeCells {}

impl NativeCells {
    fn new(len: usize) -> Result<Self> {
        let base = unsafe { libc::calloc(len.max(1), std::mem::size_of::<*mut c_void>()) };
        if base.is_null() {
            bail!("calloc of {len} cells failed");
        }
        Ok(Self {
            base: base as *mut *mut c_void,
            len,
        })
    }

    fn cell(&self, i: usize) -> *mut *mut c_void {
        debug_assert!(i < self.len);
        unsafe { self.base.add(i) }
    }

    fn read(&self, i: usize) -> *mut c_void {
        unsafe { self.cell(i).read_volatile() }
    }
}

impl Drop for NativeCells {
    fn drop(&mut self) {
        unsafe { libc::free(self.base as *mut c_void) };
    }
}

struct GuardSlot {
    guard: Option<PtrGuard>,
    value: Box<u64>,
}

fn cmd_guards(guards: usize, ops: usize, seed: u64) -> Result<()> {
    if guards == 0 {
        bail!("--guards must be at least 1");
    }
    let cells = Arc::new(NativeCells::new(guards)?);
    let slots: Arc<Vec<Mutex<GuardSlot>>> = Arc::new(
        (0..guards as u64)
            .map(|v| {
                Mutex::new(GuardSlot {
                    guard: None,
                    value: Box::new(v),
                })
            })
            .collect(),
    );
    let threads = num_cpus::get().clamp(1, 16);
    let started = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let cells = Arc::clone(&cells);
            let slots = Arc::clone(&slots);
            let share = ops / threads + usize::from(t < ops % threads);
            thread::Builder::new()
                .name(format!("guards-{t}"))
                .spawn(move || toggle_guards(&cells, &slots, share, seed.wrapping_add(t as u64)))
                .context("Failed to spawn guard driver")
        })
        .collect::<Result<Vec<_>>>()?;

    for handle in handles {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => bail!("guard driver panicked"),
        }
    }

    let mut held = 0;
    for (i, slot) in slots.iter().enumerate() {
        let mut slot = slot.lock();
        if slot.guard.take().is_some() {
            held += 1;
        }
        if !cells.read(i).is_null() {
            bail!("cell {i} still published after release");
        }
    }

    info!(guards, ops, seed, elapsed = ?started.elapsed(), "Guard toggling finished");
    println!("Guard toggling: {} guards, {} ops, seed {}", guards, ops, seed);
    println!("  threads:        {}", threads);
    println!("  held at finish: {}", held);
    println!("  all cells null: yes");
    Ok(())
}

fn toggle_guards(cells: &NativeCells, slots: &[Mutex<GuardSlot>], ops: usize, seed: u64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..ops {
        let i = rng.gen_range(0..slots.len());
        let mut slot = slots[i].lock();
        let slot = &mut *slot;
        match slot.guard.take() {
            Some(mut guard) => {
                guard.release();
                if !cells.read(i).is_null() {
                    bail!("cell {i} not cleared by release");
                }
            }
            None => {
                let addr = &mut *slot.value as *mut u64 as *mut c_void;
                // SAFETY: the cell block outlives every guard; guards are
                // dropped before `cells` in `cmd_guards`.
                let guard = unsafe { PtrGuard::new(cells.cell(i), addr) }?;
                if cells.read(i) != addr {
                    bail!("cell {i} does not hold the stored address");
                }
                slot.guard = Some(guard);
            }
        }
    }
    Ok(())
}

fn cmd_sizer(start: usize, max: usize, need: usize, hint: bool) -> Result<()> {
    let mut sizer = Sizer::new(start, max, is_range);
    let mut attempts = Vec::new();
    let mut outcome = Ok(());

    while sizer.should_continue() {
        let size = sizer.size();
        attempts.push(size);
        let result = if size >= need {
            Ok(())
        } else {
            Err(BridgeError::Errno(Errno::ERANGE))
        };
        let wants = (hint && result.is_err()).then_some(need);
        outcome = sizer.update_wants(result, wants);
    }

    println!(
        "Attempts: {}",
        attempts
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    match outcome {
        Ok(()) => println!("Succeeded at {} bytes after {} attempts", sizer.size(), attempts.len()),
        Err(e) => println!("Gave up after {} attempts: {}", attempts.len(), e),
    }
    Ok(())
}
