//! HMM Chain CLI
//!
//! Command-line interface for training, decoding and scoring

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use hmm_chain::{
    data::write_sequences,
    eval::{read_results, score, write_results, DecodeResult},
    BaumWelch, Config, DictionaryAssigner, Generator, HmmSet, Manifest, ViterbiDecoder,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hmm_chain")]
#[command(about = "Embedded-chain HMM training and decoding")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on labeled sequences
    Train {
        /// Dataset manifest (JSON list of observation files)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Initial model
        #[arg(long)]
        model: PathBuf,

        /// Trained model output path
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Label to net-name dictionary
        #[arg(short, long)]
        dictionary: Option<PathBuf>,
    },

    /// Decode sequences into per-frame labels
    Decode {
        /// Dataset manifest
        #[arg(short, long)]
        manifest: PathBuf,

        /// Trained model
        #[arg(long)]
        model: PathBuf,

        /// Results output path (JSON lines)
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Score decoding results against their references
    Score {
        /// Results file produced by `decode`
        #[arg(short, long)]
        results: PathBuf,
    },

    /// Sample labeled sequences from a model
    Generate {
        /// Model to sample from
        #[arg(long)]
        model: PathBuf,

        /// Comma-separated net names sampled in order
        #[arg(short, long, value_delimiter = ',')]
        nets: Vec<String>,

        /// Number of sequences
        #[arg(long, default_value = "10")]
        count: usize,

        /// Random seed
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Maximum frames per sequence
        #[arg(long, default_value = "1000")]
        max_len: usize,

        /// Output path (JSON lines)
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hmm_chain=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            manifest,
            model,
            output,
            config,
            dictionary,
        } => {
            train(&manifest, &model, &output, config.as_deref(), dictionary.as_deref())?;
        }
        Commands::Decode {
            manifest,
            model,
            output,
            config,
        } => {
            decode(&manifest, &model, &output, config.as_deref())?;
        }
        Commands::Score { results } => {
            score_results(&results)?;
        }
        Commands::Generate {
            model,
            nets,
            count,
            seed,
            max_len,
            output,
        } => {
            generate(&model, &nets, count, seed, max_len, &output)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::from_file(p).with_context(|| format!("loading config {}", p.display())),
        None => Ok(Config::default()),
    }
}

fn train(
    manifest: &Path,
    model: &Path,
    output: &Path,
    config: Option<&Path>,
    dictionary: Option<&Path>,
) -> Result<()> {
    let config = load_config(config)?;

    println!("{}", "Loading data...".cyan());
    let data = Manifest::from_file(manifest)?.load()?;
    let frames: usize = data.iter().map(|s| s.len()).sum();
    println!("Loaded {} sequences ({} frames)", data.len(), frames);

    let mut set = HmmSet::from_file(model).with_context(|| format!("loading model {}", model.display()))?;
    println!("Model has {} nets", set.len());

    let trainer = BaumWelch::new(config.trainer);
    let trainer = match dictionary {
        Some(path) => trainer.with_assigner(DictionaryAssigner::from_file(path)?),
        None => trainer,
    };

    println!(
        "{}",
        format!("Training (max {} iterations)...", trainer.config().max_iterations).cyan()
    );
    let report = trainer.train(&mut set, &data)?;

    let status = if report.converged {
        "converged".green()
    } else {
        "not converged".yellow()
    };
    println!(
        "{}",
        format!(
            "Training complete after {} iterations! Log-likelihood: {:.4}",
            report.iterations,
            report.final_log_likelihood().unwrap_or(f64::NEG_INFINITY)
        )
        .green()
    );
    println!("  Status: {}", status);
    if report.skipped > 0 {
        println!("  {}", format!("Skipped {} sequences", report.skipped).yellow());
    }

    set.to_file(output)?;
    println!("{}", format!("Saved model to {}", output.display()).green());
    Ok(())
}

fn decode(manifest: &Path, model: &Path, output: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;

    println!("{}", "Loading data...".cyan());
    let data = Manifest::from_file(manifest)?.load()?;
    let set = HmmSet::from_file(model).with_context(|| format!("loading model {}", model.display()))?;

    let graph = set.search_graph_with(&config.decoder)?;
    let decoder = ViterbiDecoder::new(&set, &graph);

    println!("{}", format!("Decoding {} sequences...", data.len()).cyan());
    let mut results = Vec::with_capacity(data.len());
    for seq in &data {
        match decoder.decode(seq.view()) {
            Ok(decoding) => results.push(DecodeResult {
                id: seq.id.clone(),
                hyp: decoding.labels,
                reference: seq.frame_labels(),
            }),
            Err(e) => tracing::warn!("Sequence {}: {}", seq.id, e),
        }
    }

    write_results(BufWriter::new(File::create(output)?), &results)?;
    println!(
        "{}",
        format!("Wrote {} results to {}", results.len(), output.display()).green()
    );

    let summary = score(&results);
    if summary.scored > 0 {
        println!("  Frame accuracy: {:.2}%", summary.accuracy() * 100.0);
    }
    Ok(())
}

fn score_results(path: &Path) -> Result<()> {
    let results = read_results(path)?;
    let summary = score(&results);
    if summary.scored == 0 {
        bail!("no result in {} carries a reference", path.display());
    }

    println!("\n{}", "=== Score ===".bold());
    println!("  Sequences: {} ({} scored)", summary.sequences, summary.scored);
    println!("  Frames:    {}", summary.frames);
    println!("  Correct:   {}", summary.correct);
    let accuracy = format!("{:.2}%", summary.accuracy() * 100.0);
    let accuracy = if summary.accuracy() >= 0.5 {
        accuracy.green()
    } else {
        accuracy.red()
    };
    println!("  Accuracy:  {}", accuracy);
    Ok(())
}

fn generate(
    model: &Path,
    nets: &[String],
    count: usize,
    seed: u64,
    max_len: usize,
    output: &Path,
) -> Result<()> {
    if nets.is_empty() {
        bail!("--nets must name at least one net");
    }
    let set = HmmSet::from_file(model).with_context(|| format!("loading model {}", model.display()))?;

    println!("{}", format!("Sampling {} sequences...", count).cyan());
    let mut generator = Generator::new(seed);
    let mut sequences = Vec::with_capacity(count);
    for k in 0..count {
        let seq = generator.sample_chain(&set, nets, max_len, format!("gen{}", k))?;
        if seq.is_empty() {
            tracing::warn!("Sequence gen{} is empty; dropped", k);
            continue;
        }
        sequences.push(seq);
    }

    write_sequences(BufWriter::new(File::create(output)?), &sequences)?;
    let frames: usize = sequences.iter().map(|s| s.len()).sum();
    println!(
        "{}",
        format!(
            "Wrote {} sequences ({} frames) to {}",
            sequences.len(),
            frames,
            output.display()
        )
        .green()
    );
    Ok(())
}
