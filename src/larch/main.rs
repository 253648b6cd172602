// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

mod metrics;

use anyhow::{Context, bail};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Barrier;
use std::time::Instant;
use ticketing::config::TrainConfig;
use ticketing::engine::TicketingEngine;
use ticketing::history::HistoryLine;
use ticketing::records::Ticket;

use crate::metrics::Metrics;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Concurrent load driver for the ticketing engine", long_about = None)]
struct Args {
    /// Number of worker threads
    threads: usize,
    /// Operations issued by each worker
    ops: usize,
    /// Train config, plain text or `.ron`
    #[arg(short, long, default_value = "TrainConfig")]
    config: PathBuf,
    /// Write every operation to this file, ordered by start time
    #[arg(long)]
    history: Option<PathBuf>,
    /// Audit the engine once all workers are done
    #[arg(long)]
    verify: bool,
    /// Base seed for the worker RNGs
    #[arg(long)]
    seed: Option<u64>,
}

struct WorkerOutcome {
    metrics: Metrics,
    history: Vec<HistoryLine>,
}

struct Worker<'a> {
    index: usize,
    engine: &'a TicketingEngine,
    train: TrainConfig,
    epoch: Instant,
    record: bool,
}

impl Worker<'_> {
    fn random_span(&self, rng: &mut StdRng) -> (u32, u32, u32) {
        let route = rng.random_range(1..=self.train.routes);
        let departure = rng.random_range(1..self.train.stations);
        let arrival = rng.random_range(departure + 1..=self.train.stations);
        (route, departure, arrival)
    }

    fn since_epoch(&self, at: Instant) -> u64 {
        at.duration_since(self.epoch).as_nanos() as u64
    }

    fn run(&self, ops: usize, seed: u64, barrier: &Barrier) -> anyhow::Result<WorkerOutcome> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut held: Vec<Ticket> = Vec::new();
        let mut metrics = Metrics::default();
        let mut history = Vec::new();
        let thread = self.index as u64;

        barrier.wait();

        for _ in 0..ops {
            let draw = rng.random_range(0..100);

            if draw < self.train.refund_ratio && !held.is_empty() {
                let ticket = held.swap_remove(rng.random_range(0..held.len()));
                let start = Instant::now();
                let refunded = self.engine.release(&ticket);
                let end = Instant::now();
                metrics.refund.record(end - start);

                if self.record {
                    history.push(HistoryLine::refund(
                        self.since_epoch(start),
                        self.since_epoch(end),
                        thread,
                        &ticket,
                        refunded,
                    ));
                }
                if !refunded {
                    bail!("worker {}: refund returned false for {:?}", self.index, ticket);
                }
            } else if draw < self.train.refund_ratio + self.train.buy_ratio {
                let passenger = format!("p{}", rng.random_range(0..1_000_000));
                let (route, departure, arrival) = self.random_span(&mut rng);
                let start = Instant::now();
                let issued = self.engine.allocate(&passenger, route, departure, arrival);
                let end = Instant::now();
                metrics.buy.record(end - start);

                match issued {
                    Some(ticket) => {
                        if self.record {
                            history.push(HistoryLine::buy(
                                self.since_epoch(start),
                                self.since_epoch(end),
                                thread,
                                &ticket,
                            ));
                        }
                        held.push(ticket);
                    }
                    None => {
                        metrics.no_ticket += 1;
                        if self.record {
                            history.push(HistoryLine::sold_out(
                                self.since_epoch(start),
                                self.since_epoch(end),
                                thread,
                                &passenger,
                                route,
                                departure,
                                arrival,
                            ));
                        }
                    }
                }
            } else {
                let (route, departure, arrival) = self.random_span(&mut rng);
                let start = Instant::now();
                let remaining = self.engine.count(route, departure, arrival);
                let end = Instant::now();
                metrics.inquiry.record(end - start);

                if self.record {
                    history.push(HistoryLine::inquiry(
                        self.since_epoch(start),
                        self.since_epoch(end),
                        thread,
                        &format!("p{}", rng.random_range(0..1_000_000)),
                        route,
                        departure,
                        arrival,
                        remaining,
                    ));
                }
            }
        }

        tracing::debug!(worker = self.index, "done");
        Ok(WorkerOutcome { metrics, history })
    }
}

fn write_history(path: &Path, mut lines: Vec<HistoryLine>) -> anyhow::Result<()> {
    lines.sort_by_key(|line| (line.start_ns, line.end_ns));

    let file = std::fs::File::create(path)
        .with_context(|| format!("creating history file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for line in &lines {
        writeln!(out, "{}", line)?;
    }
    out.flush()?;

    println!("history: {} records written to {}", lines.len(), path.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    if args.threads == 0 {
        bail!("at least one worker thread is required");
    }

    let train = TrainConfig::load_or_default(&args.config)
        .with_context(|| format!("reading train config {}", args.config.display()))?;
    println!("threadnum: {}, testnum: {}", args.threads, args.ops);
    println!(
        "route: {}, coach: {}, seatnum: {}, station: {}, refundRatio: {}, buyRatio: {}, inquiryRatio: {}",
        train.routes,
        train.coaches,
        train.seats,
        train.stations,
        train.refund_ratio,
        train.buy_ratio,
        train.inquiry_ratio
    );
    if train.stations < 2 {
        bail!("a route needs at least two stations to sell anything");
    }

    let engine = TicketingEngine::new(train.engine(args.threads)).context("building engine")?;
    let barrier = Barrier::new(args.threads);
    let base_seed = args.seed.unwrap_or_else(rand::random);
    let epoch = Instant::now();

    let outcomes: Vec<anyhow::Result<WorkerOutcome>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..args.threads)
            .map(|index| {
                let worker = Worker {
                    index,
                    engine: &engine,
                    train,
                    epoch,
                    record: args.history.is_some(),
                };
                let barrier = &barrier;
                let seed = base_seed.wrapping_add(index as u64 * 1_000_000_007);
                scope.spawn(move || worker.run(args.ops, seed, barrier))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("worker panicked")))
            })
            .collect()
    });
    let elapsed = epoch.elapsed();

    let mut metrics = Metrics::default();
    let mut history = Vec::new();
    for outcome in outcomes {
        let outcome = outcome?;
        metrics.merge(&outcome.metrics);
        history.extend(outcome.history);
    }

    println!("{}", metrics.report(args.threads));
    println!("time: {}s", elapsed.as_secs_f64());
    println!(
        "client QPS: {:.2} ops/ms",
        (args.threads * args.ops) as f64 / (elapsed.as_secs_f64() * 1e3)
    );

    if let Some(path) = &args.history {
        write_history(path, history)?;
    }

    if args.verify {
        match engine.audit() {
            Ok(report) => println!(
                "audit ok: {} sold, {} free spans, {} seats free end to end",
                report.sold_tickets, report.free_spans, report.fully_free_seats
            ),
            Err((route, violation)) => bail!("audit failed on route {}: {}", route, violation),
        }
    }

    Ok(())
}
