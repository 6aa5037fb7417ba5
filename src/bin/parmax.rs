//! parmax - parallel maximum over barrier-synchronized worker processes.
//!
//! Reads `items` unsigned integers from the input file, splits them across
//! `workers` independent OS processes, and reduces the per-chunk maxima
//! through a shared scratch segment, with a barrier rendezvous after every
//! reduction round. The result lands in the output file.
//!
//! Workers are re-invocations of this executable: the coordinator spawns
//! them with their rank and the run parameters passed through environment
//! variables, so no worker ever touches the CLI.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::Ordering;

use clap::Parser;
use colored::Colorize;

use shmwall::{validate, CyclicBarrier, ShmSegment, WallError, WallResult};

/// Env var that marks a worker invocation and carries its rank.
const WORKER_ENV: &str = "SHMWALL_WORKER_RANK";
/// Env var carrying the run id (segment name stem) to workers.
const RUN_ENV: &str = "SHMWALL_RUN";
/// Env var carrying the worker count.
const WORKERS_ENV: &str = "SHMWALL_WORKERS";
/// Env var carrying the item count.
const ITEMS_ENV: &str = "SHMWALL_ITEMS";
/// Env var carrying the input path.
const INPUT_ENV: &str = "SHMWALL_INPUT";

#[derive(Parser)]
#[command(
    name = "parmax",
    about = "Parallel maximum over m barrier-synchronized worker processes",
    version
)]
struct Cli {
    /// Number of values to read from the input file
    items: usize,
    /// Number of worker processes
    workers: usize,
    /// Input file holding at least `items` whitespace-separated integers
    input: PathBuf,
    /// Output file for the result
    output: PathBuf,
    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    // Worker re-invocations bypass the CLI entirely.
    if let Ok(rank) = std::env::var(WORKER_ENV) {
        if let Err(e) = worker_main(&rank) {
            eprintln!("{} worker {}: {}", "Error:".red().bold(), rank, e);
            std::process::exit(1);
        }
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .format_target(false)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> WallResult<()> {
    let workers = validate::validate_counts(cli.items, cli.workers)?;
    validate::validate_io_paths(&cli.input, &cli.output)?;
    validate::check_input_numbers(&cli.input, cli.items)?;

    // Two separate segments: the barrier control block and the scratch
    // array the reduction works in. Both must exist before any worker does.
    let run_id = format!("parmax_{}", std::process::id());
    let barrier = CyclicBarrier::create(&barrier_name(&run_id), workers as u32)?;
    let scratch = ShmSegment::create(&scratch_name(&run_id), workers)?;

    log::debug!("spawning {} workers for {} items", workers, cli.items);

    let exe = std::env::current_exe()?;
    let mut children = Vec::with_capacity(workers);
    for rank in 0..workers {
        let child = Command::new(&exe)
            .env(WORKER_ENV, rank.to_string())
            .env(RUN_ENV, &run_id)
            .env(WORKERS_ENV, workers.to_string())
            .env(ITEMS_ENV, cli.items.to_string())
            .env(INPUT_ENV, &cli.input)
            .spawn()?;
        children.push(child);
    }

    for (rank, mut child) in children.into_iter().enumerate() {
        let status = child.wait()?;
        if !status.success() {
            return Err(WallError::invalid_input(format!(
                "worker {} exited with {}",
                rank, status
            )));
        }
    }

    // The tree reduction leaves the group maximum in scratch slot 0.
    let result = scratch.word(0).load(Ordering::Acquire);
    log::debug!(
        "workers completed {} barrier cycles, maximum {}",
        barrier.generation(),
        result
    );

    std::fs::write(&cli.output, format!("{}\n", result))?;
    println!("maximum of {} values: {}", cli.items, result);
    Ok(())
}

fn worker_main(rank: &str) -> WallResult<()> {
    let rank: u32 = rank.parse()?;
    let run_id = env_var(RUN_ENV)?;
    let workers: u32 = env_var(WORKERS_ENV)?.parse()?;
    let items: usize = env_var(ITEMS_ENV)?.parse()?;
    let input = PathBuf::from(env_var(INPUT_ENV)?);

    let barrier = CyclicBarrier::attach(&barrier_name(&run_id), workers)?;
    let scratch = ShmSegment::attach(&scratch_name(&run_id), workers as usize)?;

    let values = read_numbers(&input, items)?;
    let (start, end) = chunk_bounds(items, workers as usize, rank as usize);
    // An empty trailing chunk contributes the identity for max.
    let local_max = values[start..end].iter().copied().max().unwrap_or(0);
    scratch.word(rank as usize).store(local_max, Ordering::Release);
    barrier.wait(rank);

    // Binary tree reduction: the surviving slots halve each round, but
    // every rank passes through every rendezvous.
    let mut step = 1u32;
    while step < workers {
        if rank % (2 * step) == 0 {
            let partner = rank + step;
            if partner < workers {
                let other = scratch.word(partner as usize).load(Ordering::Acquire);
                let mine = scratch.word(rank as usize).load(Ordering::Acquire);
                if other > mine {
                    scratch.word(rank as usize).store(other, Ordering::Release);
                }
            }
        }
        barrier.wait(rank);
        step *= 2;
    }
    Ok(())
}

fn barrier_name(run_id: &str) -> String {
    format!("{}_wall", run_id)
}

fn scratch_name(run_id: &str) -> String {
    format!("{}_scratch", run_id)
}

fn env_var(key: &str) -> WallResult<String> {
    std::env::var(key).map_err(|_| WallError::invalid_input(format!("{} not set", key)))
}

fn read_numbers(path: &Path, items: usize) -> WallResult<Vec<u32>> {
    let content = std::fs::read_to_string(path)?;
    let mut values = Vec::with_capacity(items);
    for token in content.split_whitespace().take(items) {
        values.push(token.parse::<u32>()?);
    }
    if values.len() < items {
        return Err(WallError::invalid_input(format!(
            "fewer than {} numbers in input file '{}'",
            items,
            path.display()
        )));
    }
    Ok(values)
}

fn chunk_bounds(items: usize, workers: usize, rank: usize) -> (usize, usize) {
    let chunk = items.div_ceil(workers);
    let start = (rank * chunk).min(items);
    let end = (start + chunk).min(items);
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_all_items_exactly_once() {
        for (items, workers) in [(10, 3), (5, 4), (7, 7), (100, 1), (1, 1)] {
            let mut covered = 0;
            for rank in 0..workers {
                let (start, end) = chunk_bounds(items, workers, rank);
                assert_eq!(start, covered.min(items));
                covered = end;
            }
            assert_eq!(covered, items);
        }
    }

    #[test]
    fn trailing_ranks_may_be_empty() {
        // 5 items over 4 workers: ceil-chunking starves the last rank.
        let (start, end) = chunk_bounds(5, 4, 3);
        assert_eq!(start, end);
    }
}
