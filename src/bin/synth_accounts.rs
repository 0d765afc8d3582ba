use std::fs::File;
use std::io::{self, BufWriter};

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::info;

use rebate_grid::account::write_accounts;
use rebate_grid::synthetic::{PortfolioConfig, synth_accounts};

/// Usage: synth_accounts [--accounts N] [--seed N] [--pass-through X]
///                       [--new-share P] [--output FILE]
///
/// Writes the account CSV to `--output`, or to stdout.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = PortfolioConfig::default();
    let mut seed = 42u64;
    let mut output: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        i += 1;
        let value = args.get(i).with_context(|| format!("{flag} requires a value"))?;
        match flag {
            "--accounts" => config.accounts = value.parse().context("--accounts requires a count")?,
            "--seed" => seed = value.parse().context("--seed requires a u64")?,
            "--pass-through" => config.pass_through = value.parse().context("--pass-through requires a number")?,
            "--new-share" => config.new_account_share = value.parse().context("--new-share requires a number")?,
            "--output" => output = Some(value.clone()),
            other => anyhow::bail!("unknown argument {other:?}"),
        }
        i += 1;
    }

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let accounts = synth_accounts(&config, &mut rng)?;

    match &output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating {path}"))?;
            write_accounts(BufWriter::new(file), &accounts)?;
        }
        None => write_accounts(io::stdout().lock(), &accounts)?,
    }

    let excluded = accounts.iter().filter(|a| a.growth().is_none()).count();
    info!(accounts = accounts.len(), new_accounts = excluded, seed, "synthetic portfolio written");
    Ok(())
}
