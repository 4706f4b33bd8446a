//! Run every party of a computation on local threads.
//!
//! Party 0 owns the input vector; all parties learn the results, which party
//! 0 prints as JSON.

use anyhow::anyhow;
use clap::Parser;
use mpctensor::prelude::*;
use ndarray::{ArrayD, IxDyn};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser, Clone)]
pub struct Opt {
    #[arg(env, long, default_value = "3")]
    /// Number of parties
    parties: usize,

    #[arg(env, long)]
    /// TOML configuration file
    config: Option<PathBuf>,

    #[arg(long)]
    /// Fractional bits, overriding the configuration
    precision: Option<u32>,

    #[arg(long)]
    /// Hex encoded 16 byte dealer seed, overriding the configuration
    seed: Option<String>,

    #[arg(long)]
    /// JSON file holding the input vector
    input: Option<PathBuf>,
}

fn load_input(path: Option<&PathBuf>) -> anyhow::Result<ArrayD<f64>> {
    let values: Vec<f64> = match path {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => vec![1.0, 1.0, 2.0, 1.0, 4.0, 1.0, 3.0, 4.0],
    };
    if values.is_empty() {
        return Err(anyhow!("input vector is empty"));
    }
    Ok(ArrayD::from_shape_vec(IxDyn(&[values.len()]), values)?)
}

fn evaluate(sess: &Session, input: &ArrayD<f64>) -> mpctensor::Result<serde_json::Value> {
    let value = if sess.rank() == 0 { Some(input) } else { None };
    let x = MpcTensor::from_plain(sess, value, 0)?;

    let max = x.max(sess, None, false)?.reveal(sess)?;
    let argmax = x.argmax(sess, None)?.reveal(sess)?;
    let softmax = x.softmax(sess, 0)?.reveal(sess)?;
    let relu = x.sub(sess, 2.0)?.relu(sess)?.reveal(sess)?;

    Ok(serde_json::json!({
        "input": input.iter().collect::<Vec<_>>(),
        "max": max.iter().collect::<Vec<_>>(),
        "argmax": argmax.iter().collect::<Vec<_>>(),
        "softmax": softmax.iter().collect::<Vec<_>>(),
        "relu_shifted": relu.iter().collect::<Vec<_>>(),
        "rounds": sess.rounds(),
    }))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let opt = Opt::parse();

    let mut config = match &opt.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(precision) = opt.precision {
        config.encoding.precision_bits = precision;
    }
    if let Some(seed) = &opt.seed {
        config.dealer.seed = Some(seed.clone());
    }
    config.validate()?;

    let input = load_input(opt.input.as_ref())?;
    let dealer = TrustedDealer::from_config(&config, opt.parties)?;
    tracing::info!(parties = opt.parties, len = input.len(), "starting local run");

    let outputs = std::thread::scope(|s| {
        let handles: Vec<_> = LocalNetwork::new(opt.parties)
            .into_iter()
            .map(|comm| {
                let provider = Box::new(dealer.provider(comm.rank()));
                let config = config.clone();
                let input = &input;
                s.spawn(move || {
                    let sess = Session::new(Box::new(comm), provider, config)?;
                    evaluate(&sess, input)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| anyhow!("party thread panicked")))
            .collect::<anyhow::Result<Vec<_>>>()
    })?;

    let mut results = outputs.into_iter();
    let first = results
        .next()
        .ok_or_else(|| anyhow!("no parties were run"))??;
    for res in results {
        res?;
    }
    println!("{}", serde_json::to_string_pretty(&first)?);
    Ok(())
}
