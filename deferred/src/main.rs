//! Deferred - command line driver for the scheduler and the delay queue

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use parking_lot::Mutex;
use tracing::info;

use deferred::cli::{Cli, Command};
use deferred::clock;
use deferred::config::{Config, JobConfig};
use deferred::{DelayCoordinator, Expiring, Firing, HeapScheduler, PayloadFailure, Task};

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre!("{}", e))?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(jobs = config.jobs.len(), "deferred starting");

    match cli.command {
        Command::Run { duration_ms } => cmd_run(&config, Duration::from_millis(duration_ms)),
        Command::Race {
            consumers,
            items,
            spacing_ms,
        } => cmd_race(&config, consumers, items, Duration::from_millis(spacing_ms)),
        Command::Config => cmd_config(&config),
    }
}

fn stamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Payload for a configured job: print the firing, fail on schedule
fn job_task(job: &JobConfig) -> Task {
    let job = job.clone();
    Task::new(job.name.clone(), move |firing: &Firing<'_>| {
        println!(
            "{} {} run {} scheduled {} late {}ms",
            stamp().dimmed(),
            firing.name.cyan(),
            firing.run,
            firing.scheduled_at,
            firing.lateness().as_millis()
        );
        if job.should_fail(firing.run) {
            return Err(eyre!("{} failed on run {}", job.name, firing.run));
        }
        Ok(())
    })
}

fn cmd_run(config: &Config, duration: Duration) -> Result<()> {
    let report = |failure: PayloadFailure| {
        println!("{} {} {}", stamp().dimmed(), "✗".red(), failure);
    };
    let scheduler = HeapScheduler::with_parts(config.scheduler.clone(), clock::system(), Arc::new(report))
        .context("Failed to start scheduler")?;

    let mut handles = Vec::with_capacity(config.jobs.len());
    for job in &config.jobs {
        let handle = job
            .submit(&scheduler, &job_task(job))
            .context(format!("Failed to schedule job {}", job.name))?;
        println!("{} Scheduled {} ({:?})", "✓".green(), job.name.cyan(), handle.period());
        handles.push(handle);
    }

    thread::sleep(duration);
    scheduler.shutdown();
    let stats = scheduler.stats();
    scheduler.join();

    println!("{} Scheduler stopped", "✓".green());
    for handle in &handles {
        println!(
            "  {}: {} runs, {} failures, {}",
            handle.name().cyan(),
            handle.fire_count(),
            handle.failure_count(),
            handle.state()
        );
    }
    println!("  Fired: {}", stats.total_fired);
    println!("  Failed: {}", stats.total_failed);
    println!("  Peak queue depth: {}", stats.peak_queue_depth);
    Ok(())
}

fn cmd_race(config: &Config, consumers: usize, items: usize, spacing: Duration) -> Result<()> {
    if consumers == 0 {
        return Err(eyre!("At least one consumer is required"));
    }

    let coordinator = Arc::new(DelayCoordinator::<Expiring<usize>>::new(config.coordinator.clone()));
    let clock = Arc::clone(coordinator.clock());
    for n in 0..items {
        let delay = spacing.saturating_mul(u32::try_from(n + 1).unwrap_or(u32::MAX));
        coordinator.offer(Expiring::after(clock.as_ref(), delay, n));
    }

    let remaining = Arc::new(AtomicUsize::new(items));
    let taken = Arc::new(Mutex::new(Vec::with_capacity(items)));
    let workers: Vec<_> = (0..consumers)
        .map(|id| {
            let coordinator = Arc::clone(&coordinator);
            let remaining = Arc::clone(&remaining);
            let taken = Arc::clone(&taken);
            thread::Builder::new()
                .name(format!("consumer-{}", id))
                .spawn(move || {
                    // a claim guarantees an item is left for this take
                    while remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                        let item = coordinator.take();
                        taken.lock().push((id, *item.value()));
                    }
                })
                .context("Failed to spawn consumer")
        })
        .collect::<Result<Vec<_>>>()?;

    for worker in workers {
        worker.join().map_err(|_| eyre!("Consumer panicked"))?;
    }

    for (id, value) in taken.lock().iter() {
        println!("{} consumer-{} took item {}", stamp().dimmed(), id, value.to_string().yellow());
    }

    let stats = coordinator.stats();
    println!(
        "{} Race complete: {} items taken by {} consumers",
        "✓".green(),
        stats.taken,
        consumers
    );
    println!("  Leader elections: {}", stats.leader_elections);
    println!("  Peak timed waiters: {}", stats.peak_timed_waiters);
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}
