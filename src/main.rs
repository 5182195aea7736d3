use std::fs::File;
use std::io::{BufWriter, Write};
use std::process::ExitCode;

use casevac::analysis::{self, IntegrityViolation, RunReport};
use casevac::facility::DoctrineViolation;
use casevac::types::{Disposition, Facility, Triage};
use casevac::{CancellationToken, Progress, RunOptions, RunSummary, ScenarioConfig, Simulation};
use tracing::error;
use tracing_subscriber::EnvFilter;

struct Args {
    seed: u64,
    patients: Option<usize>,
    days: Option<u32>,
    config_path: Option<String>,
    batch_size: usize,
    workers: usize,
    output_path: String,
    quiet: bool,
    runs: Option<u64>,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();
    let defaults = RunOptions::default();
    let mut parsed = Args {
        seed: defaults.seed,
        patients: None,
        days: None,
        config_path: None,
        batch_size: defaults.batch_size,
        workers: defaults.workers,
        output_path: "casualties.ndjson".to_string(),
        quiet: false,
        runs: None,
    };

    fn value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T, String> {
        args.get(i)
            .ok_or_else(|| format!("{flag} requires a value"))?
            .parse()
            .map_err(|_| format!("{flag}: cannot parse `{}`", args[i]))
    }

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--seed" => {
                i += 1;
                parsed.seed = value(&args, i, flag)?;
            }
            "--patients" => {
                i += 1;
                parsed.patients = Some(value(&args, i, flag)?);
            }
            "--days" => {
                i += 1;
                parsed.days = Some(value(&args, i, flag)?);
            }
            "--config" => {
                i += 1;
                parsed.config_path = Some(value(&args, i, flag)?);
            }
            "--batch-size" => {
                i += 1;
                parsed.batch_size = value(&args, i, flag)?;
            }
            "--workers" => {
                i += 1;
                parsed.workers = value(&args, i, flag)?;
            }
            "--output" => {
                i += 1;
                parsed.output_path = value(&args, i, flag)?;
            }
            "--runs" => {
                i += 1;
                parsed.runs = Some(value(&args, i, flag)?);
            }
            "--quiet" => parsed.quiet = true,
            other => return Err(format!("unknown argument `{other}`")),
        }
        i += 1;
    }
    Ok(parsed)
}

fn load_config(args: &Args) -> Result<ScenarioConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            if path.ends_with(".json") {
                ScenarioConfig::from_json_str(&text)?
            } else {
                ScenarioConfig::from_toml_str(&text)?
            }
        }
        None => ScenarioConfig::canonical(),
    };
    if let Some(n) = args.patients {
        config.total_patients = n;
    }
    if let Some(d) = args.days {
        config.days_of_fighting = d;
    }
    Ok(config)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("casevac=info")))
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{msg}");
            eprintln!(
                "usage: casevac [--seed N] [--patients N] [--days N] [--config FILE] [--batch-size N] \
                 [--workers N] [--output FILE] [--runs N] [--quiet]"
            );
            return ExitCode::from(2);
        }
    };

    let result = match args.runs {
        Some(n) => run_many(&args, n),
        None => run_once(&args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}

fn run_once(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let sim = Simulation::from_config(load_config(args)?)?;
    let options = RunOptions { seed: args.seed, batch_size: args.batch_size, workers: args.workers };

    let mut writer = BufWriter::new(File::create(&args.output_path)?);
    let cancel = CancellationToken::new();
    let mut write_error: Option<std::io::Error> = None;
    let mut report = RunReport::new(1.0);

    let summary = sim.run_batched(&options, &cancel, &Progress::new(), |batch| {
        if write_error.is_none() {
            for c in &batch {
                let written = serde_json::to_writer(&mut writer, c)
                    .map_err(std::io::Error::from)
                    .and_then(|()| writeln!(writer));
                if let Err(e) = written {
                    write_error = Some(e);
                    cancel.cancel();
                    break;
                }
            }
        }
        for c in &batch {
            report.add(c);
        }
    })?;
    if let Some(e) = write_error {
        return Err(e.into());
    }
    writer.flush()?;

    if !args.quiet {
        println!("Casualties written: {} → {}", summary.emitted, args.output_path);
        print_report(&sim, &report, &summary);
    }
    Ok(())
}

/// Seed of the `i`-th run in a `--runs` sweep. Wraps past `u64::MAX`.
fn seed_for_run(base: u64, i: u64) -> u64 {
    base.wrapping_add(i)
}

fn run_many(args: &Args, n: u64) -> Result<(), Box<dyn std::error::Error>> {
    use rayon::prelude::*;

    let sim = Simulation::from_config(load_config(args)?)?;
    let summaries: Vec<RunSummary> = (0..n)
        .into_par_iter()
        .map(|i| {
            let options = RunOptions { seed: seed_for_run(args.seed, i), batch_size: args.batch_size, workers: 1 };
            sim.run_batched(&options, &CancellationToken::new(), &Progress::new(), |_| {})
        })
        .collect::<Result<_, _>>()?;

    if args.quiet {
        return Ok(());
    }
    println!("\n=== Disposition rates across {n} seeds (start seed {}) ===", args.seed);
    println!("{:>18} | {:>7} | {:>7} | {:>7} | {:>7} | {:>7}", "Disposition", "mean%", "p5%", "p50%", "p95%", "sd%");
    println!("{}", "-".repeat(18 + 5 * 10));
    for d in Disposition::ALL {
        let mut rates: Vec<f64> = summaries
            .iter()
            .filter(|s| s.emitted > 0)
            .map(|s| s.count(d) as f64 / s.emitted as f64 * 100.0)
            .collect();
        if let Some(ds) = analysis::percentile_stats(&mut rates) {
            println!(
                "{:>18} | {:>7.2} | {:>7.2} | {:>7.2} | {:>7.2} | {:>7.2}",
                d.to_string(),
                ds.mean,
                ds.p5,
                ds.p50,
                ds.p95,
                ds.std_dev
            );
        }
    }
    Ok(())
}

fn print_report(sim: &Simulation, report: &RunReport, summary: &RunSummary) {
    // ── Integrity invariants ────────────────────────────────────────────────
    let violations = report.integrity(summary);
    let inv = |variant: fn(&IntegrityViolation) -> bool| {
        if violations.iter().any(variant) { "FAIL" } else { "PASS" }
    };
    println!("\n=== Integrity invariants ===");
    println!("  [1] Well-formed timelines:            {}", inv(|v| matches!(v, IntegrityViolation::MalformedTimeline { .. })));
    println!("  [2] Unique casualty ids:              {}", inv(|v| matches!(v, IntegrityViolation::DuplicateId { .. })));
    println!("  [3] Arrivals in order:                {}", inv(|v| matches!(v, IntegrityViolation::ArrivalOutOfOrder { .. })));
    println!("  [4] Record count matches summary:     {}", inv(|v| matches!(v, IntegrityViolation::RecordCount { .. })));
    println!("  [5] Reducer matches engine counters:  {}", inv(|v| matches!(v, IntegrityViolation::SummaryMismatch { .. })));
    println!("  [6] Blood volume never rises:         {}", inv(|v| matches!(v, IntegrityViolation::BloodVolumeRose { .. })));
    println!("  [7] Exsanguination forces KIA:        {}", inv(|v| matches!(v, IntegrityViolation::ExsanguinatedNotKia { .. })));
    println!("  [8] Threshold only crossed at end:    {}", inv(|v| matches!(v, IntegrityViolation::BelowThresholdBeforeEnd { .. })));
    if violations.is_empty() {
        println!("  All integrity invariants: PASS");
    } else {
        println!("\n  {} violation(s):", violations.len());
        for v in &violations {
            println!("    {v}");
        }
    }

    // ── Doctrine ────────────────────────────────────────────────────────────
    let doctrine = &sim.config().doctrine;
    let observed = report.doctrine_report(doctrine);
    let table = sim.doctrine_violations();
    let check = |vs: &[DoctrineViolation], variant: fn(&DoctrineViolation) -> bool| {
        if vs.iter().any(variant) { "WARN" } else { "PASS" }
    };
    println!("\n=== Doctrine thresholds (table / observed) ===");
    let plurality = |v: &DoctrineViolation| matches!(v, DoctrineViolation::Role1NotPlurality { .. });
    let minimum = |v: &DoctrineViolation| matches!(v, DoctrineViolation::Role1BelowMinimum { .. });
    let skip = |v: &DoctrineViolation| matches!(v, DoctrineViolation::SkipOutsideBand { .. });
    println!("  Role1 plurality of POI outflow:       {} / {}", check(table, plurality), check(observed.as_slice(), plurality));
    println!(
        "  Role1 share >= {:.0}%:                  {} / {}",
        doctrine.min_role1_share * 100.0,
        check(table, minimum),
        check(observed.as_slice(), minimum)
    );
    println!(
        "  POI→Role4 skip in [{:.0}%, {:.0}%]:          {} / {}",
        doctrine.skip_band_min * 100.0,
        doctrine.skip_band_max * 100.0,
        check(table, skip),
        check(observed.as_slice(), skip)
    );
    for v in table.iter().chain(observed.iter()) {
        println!("    {v}");
    }

    // ── Flow tables ─────────────────────────────────────────────────────────
    println!("\n=== Dispositions ===");
    for d in Disposition::ALL {
        let n = summary.count(d);
        let pct = if summary.emitted > 0 { n as f64 / summary.emitted as f64 * 100.0 } else { 0.0 };
        println!("  {:<18} {:>7}  {:>6.1}%", d.to_string(), n, pct);
    }

    println!("\n=== Facility arrivals ===");
    for f in Facility::ALL {
        println!("  {:<6} {:>7}", f.label(), summary.facility_arrivals.get(&f).copied().unwrap_or(0));
    }

    println!("\n=== First hop from POI ===");
    println!("{:>4} | {:>7} | {:>7} | {:>7} | {:>7}", "", "Role1%", "Role2%", "Role3%", "Role4%");
    for triage in Triage::ALL {
        let shares = report.first_hop_shares(Some(triage));
        let pct = |f: Facility| shares.get(&f).copied().unwrap_or(0.0) * 100.0;
        println!(
            "{:>4} | {:>7.1} | {:>7.1} | {:>7.1} | {:>7.1}",
            triage.to_string(),
            pct(Facility::Role1),
            pct(Facility::Role2),
            pct(Facility::Role3),
            pct(Facility::Role4)
        );
    }

    println!("\n=== Hours to disposition ===");
    println!("{:>4} | {:>18} | {:>5} | {:>8} | {:>8} | {:>8}", "", "Disposition", "n", "p50", "p95", "max");
    for ((triage, disposition), ds) in report.time_to_disposition() {
        println!(
            "{:>4} | {:>18} | {:>5} | {:>8.1} | {:>8.1} | {:>8.1}",
            triage.to_string(),
            disposition.to_string(),
            ds.n,
            ds.p50,
            ds.p95,
            ds.max
        );
    }
    println!(
        "\n  Evacuated from POI within {:.0} h: {:.1}%",
        report.evacuation_window(),
        report.evacuated_share() * 100.0
    );
}
