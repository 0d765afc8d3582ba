use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use rebate_grid::account::load_accounts_file;
use rebate_grid::config::EngineConfig;
use rebate_grid::elasticity::ElasticitySpec;
use rebate_grid::engine::{CalculateReport, Engine, OptimizeReport};
use rebate_grid::evaluation::Totals;
use rebate_grid::grid::RebateGrid;
use rebate_grid::grid_table::{read_grid_table_file, write_grid_table};

const USAGE: &str = "\
usage:
  rebate-grid optimize  --accounts FILE [--config FILE] [--seed N] [--iterations N]
                        [--elasticity X | --learned] [--grid FILE] [--grid-out FILE]
                        [--bootstrap N] [--output FILE] [--quiet]
  rebate-grid calculate --accounts FILE --grid FILE [--config FILE]
                        [--elasticity X | --learned] [--output FILE] [--quiet]";

#[derive(Default)]
struct Args {
    accounts: Option<PathBuf>,
    config: Option<PathBuf>,
    grid: Option<PathBuf>,
    grid_out: Option<PathBuf>,
    output: Option<PathBuf>,
    seed: Option<u64>,
    iterations: Option<usize>,
    bootstrap: Option<usize>,
    elasticity: Option<f64>,
    learned: bool,
    quiet: bool,
}

fn parse_args(raw: &[String]) -> Result<Args> {
    let mut args = Args::default();
    let mut i = 0;
    while i < raw.len() {
        let flag = raw[i].as_str();
        let mut value = || next_value(raw, &mut i, flag);
        match flag {
            "--accounts" => args.accounts = Some(value()?.into()),
            "--config" => args.config = Some(value()?.into()),
            "--grid" => args.grid = Some(value()?.into()),
            "--grid-out" => args.grid_out = Some(value()?.into()),
            "--output" => args.output = Some(value()?.into()),
            "--seed" => args.seed = Some(value()?.parse().context("--seed requires a u64")?),
            "--iterations" => {
                args.iterations = Some(value()?.parse().context("--iterations requires a positive integer")?)
            }
            "--bootstrap" => {
                args.bootstrap = Some(value()?.parse().context("--bootstrap requires a positive integer")?)
            }
            "--elasticity" => {
                args.elasticity = Some(value()?.parse().context("--elasticity requires a number")?)
            }
            "--learned" => args.learned = true,
            "--quiet" => args.quiet = true,
            other => bail!("unknown argument {other:?}\n{USAGE}"),
        }
        i += 1;
    }
    Ok(args)
}

fn next_value<'a>(raw: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str> {
    *i += 1;
    raw.get(*i).map(String::as_str).with_context(|| format!("{flag} requires a value"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let raw: Vec<String> = std::env::args().collect();
    let Some(mode) = raw.get(1).map(String::as_str) else {
        bail!("missing mode\n{USAGE}");
    };
    if matches!(mode, "-h" | "--help" | "help") {
        println!("{USAGE}");
        return Ok(());
    }
    let args = parse_args(&raw[2..])?;

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::canonical(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(n) = args.iterations {
        config.iterations_per_config = n;
    }
    if args.bootstrap.is_some() {
        config.bootstrap = args.bootstrap;
    }
    if let Some(coefficient) = args.elasticity {
        config.elasticity = ElasticitySpec::Fixed { coefficient };
    }
    if args.learned {
        let fallback = match config.elasticity {
            ElasticitySpec::Fixed { coefficient } => coefficient,
            ElasticitySpec::Learned { fallback_coefficient, .. } => fallback_coefficient.unwrap_or(2.0),
        };
        config.elasticity = ElasticitySpec::Learned {
            samples: Vec::new(),
            outlier_bound: Some(0.5),
            fallback_coefficient: Some(fallback),
        };
    }

    let accounts_path = args.accounts.as_ref().with_context(|| format!("--accounts is required\n{USAGE}"))?;
    let accounts = load_accounts_file(accounts_path)
        .with_context(|| format!("loading accounts {}", accounts_path.display()))?;
    let start_grid = args
        .grid
        .as_ref()
        .map(|p| read_grid_table_file(p).with_context(|| format!("loading grid {}", p.display())))
        .transpose()?;

    let engine = Engine::new(config)?;

    // The table shares stdout only when the JSON goes to a file.
    let to_stdout = args.output.is_none();
    match mode {
        "optimize" => {
            let report = match &start_grid {
                Some(grid) => engine.refine(&accounts, grid)?,
                None => engine.optimize(&accounts)?,
            };
            if let Some(path) = &args.grid_out {
                let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
                write_grid_table(BufWriter::new(file), &report.best.grid)?;
            }
            if !args.quiet {
                with_table_sink(to_stdout, |w| print_optimize(w, &report))?;
            }
            write_json(args.output.as_ref(), &report)?;
        }
        "calculate" => {
            let grid = start_grid.with_context(|| format!("calculate needs --grid\n{USAGE}"))?;
            let report = engine.calculate(&accounts, &grid)?;
            if !args.quiet {
                with_table_sink(to_stdout, |w| print_calculate(w, &report))?;
            }
            write_json(args.output.as_ref(), &report)?;
        }
        other => bail!("unknown mode {other:?}\n{USAGE}"),
    }
    Ok(())
}

fn with_table_sink(json_on_stdout: bool, f: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> io::Result<()> {
    if json_on_stdout {
        f(&mut io::stderr().lock())
    } else {
        f(&mut io::stdout().lock())
    }
}

fn write_json<T: Serialize>(path: Option<&PathBuf>, value: &T) -> Result<()> {
    match path {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            let mut w = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut w, value)?;
            writeln!(w)?;
            w.flush()?;
        }
        None => {
            let mut w = io::stdout().lock();
            serde_json::to_writer_pretty(&mut w, value)?;
            writeln!(w)?;
        }
    }
    Ok(())
}

fn print_grid(w: &mut dyn Write, grid: &RebateGrid) -> io::Result<()> {
    let volume_labels = grid.bins().volume.labels();
    let growth_labels = grid.bins().growth.labels();
    write!(w, "{:>14}", "")?;
    for g in &growth_labels {
        write!(w, " | {g:>8}")?;
    }
    writeln!(w)?;
    writeln!(w, "{}", "-".repeat(14 + growth_labels.len() * 11))?;
    for (label, row) in volume_labels.iter().zip(grid.rows()) {
        write!(w, "{label:>14}")?;
        for rate in row {
            write!(w, " | {:>7.2}%", rate * 100.0)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

fn print_totals(w: &mut dyn Write, title: &str, t: &Totals) -> io::Result<()> {
    writeln!(
        w,
        "  {title:<9} net {:>16.2}  projected {:>16.2}  rebate {:>14.2}  eff.rate {:>6.2}%  coverage {:>5.1}%",
        t.net_revenue,
        t.projected_revenue,
        t.rebate_cost,
        t.effective_rebate_rate() * 100.0,
        t.coverage() * 100.0,
    )
}

fn print_optimize(w: &mut dyn Write, r: &OptimizeReport) -> io::Result<()> {
    let best = &r.best;
    writeln!(w, "\n=== Best grid (config {}, seed {}) ===", best.config_index + 1, best.seed)?;
    print_grid(w, &best.grid)?;
    writeln!(w)?;
    print_totals(w, "best", &best.totals)?;
    print_totals(w, "baseline", &best.baseline)?;
    writeln!(w, "  uplift    {:>16.2}", best.uplift)?;
    if let Some(b) = &best.bootstrap {
        writeln!(
            w,
            "  95% CI    {:>16.2} .. {:.2}  (std error {:.2}, {} resamples)",
            b.lower, b.upper, b.std_error, b.resamples
        )?;
    }
    if best.totals.undefined_growth > 0 {
        writeln!(w, "  excluded (zero previous revenue): {}", best.totals.undefined_growth)?;
    }

    writeln!(w, "\n=== Per configuration ===")?;
    writeln!(w, "{:>6} | {:>16} | {:>9}", "Config", "Best net", "Iteration")?;
    for s in &best.per_config {
        writeln!(w, "{:>6} | {:>16.2} | {:>9}", s.config_index + 1, s.best_net_revenue, s.best_iteration + 1)?;
    }
    writeln!(w, "\nmodel: {:?}  candidates: {}", r.model, best.candidates_evaluated)
}

fn print_calculate(w: &mut dyn Write, r: &CalculateReport) -> io::Result<()> {
    writeln!(w, "\n=== Grid ===")?;
    print_grid(w, &r.grid)?;

    writeln!(w, "\n=== Accounts ===")?;
    writeln!(
        w,
        "{:>8} | {:>14} | {:>8} | {:>6} | {:>14} | {:>12} | {:>14}",
        "Account", "Volume", "Growth", "Rate%", "Projected", "Rebate", "Net"
    )?;
    for rec in &r.evaluation.records {
        writeln!(
            w,
            "{:>8} | {:>14} | {:>8} | {:>6.2} | {:>14.2} | {:>12.2} | {:>14.2}",
            rec.account.to_string(),
            rec.volume_tier,
            rec.growth_tier,
            rec.rate * 100.0,
            rec.projected_revenue,
            rec.rebate_cost,
            rec.net_revenue,
        )?;
    }

    writeln!(w, "\n=== Cells ===")?;
    writeln!(
        w,
        "{:>14} | {:>8} | {:>6} | {:>8} | {:>14} | {:>12} | {:>14}",
        "Volume", "Growth", "Rate%", "Accounts", "Projected", "Rebate", "Net"
    )?;
    for c in &r.evaluation.cells {
        writeln!(
            w,
            "{:>14} | {:>8} | {:>6.2} | {:>8} | {:>14.2} | {:>12.2} | {:>14.2}",
            c.volume_tier,
            c.growth_tier,
            c.rate * 100.0,
            c.accounts,
            c.projected_revenue,
            c.rebate_cost,
            c.net_revenue,
        )?;
    }

    writeln!(w)?;
    print_totals(w, "grid", &r.evaluation.totals)?;
    print_totals(w, "baseline", &r.baseline)?;
    writeln!(w, "  uplift    {:>16.2}", r.uplift)?;
    if !r.evaluation.excluded.is_empty() {
        let ids: Vec<String> = r.evaluation.excluded.iter().map(ToString::to_string).collect();
        writeln!(w, "  excluded (zero previous revenue): {}", ids.join(", "))?;
    }
    Ok(())
}
