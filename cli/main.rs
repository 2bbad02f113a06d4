#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::process;

use prs_calibrate::data::{
    DataConfig, PcSelection, load_calibration_inputs, load_table, write_table, z_score_frame,
};
use prs_calibrate::optimizer::OptimizerOptions;
use prs_calibrate::risk::table::classify_frame;
use prs_calibrate::risk::{HighRiskThreshold, RiskPolicy, TierCutoffs};
use prs_calibrate::{CalibratorConfig, FittedCalibrator, GradientMode};

/// Options shared by every subcommand that reads PRS and PC tables.
#[derive(Args)]
pub struct InputArgs {
    /// Table of raw polygenic scores, one row per sample
    pub prs_file: String,

    /// Table of ancestry principal components, one row per sample
    pub pc_file: String,

    /// Single-byte field separator for all input and output tables
    #[arg(long, default_value = "\t", value_parser = parse_separator)]
    pub separator: u8,

    /// Column holding the sample identifier used to join the two tables
    #[arg(long, default_value = "sample_id")]
    pub id_column: String,

    /// Column in the PRS table holding the raw score
    #[arg(long, default_value = "PRS")]
    pub score_column: String,

    /// Name of the z-score column in the output table
    #[arg(long, default_value = "z_score")]
    pub z_column: String,

    /// Output table of calibrated z-scores
    #[arg(long, default_value = "z_scores.tsv")]
    pub out: String,
}

impl InputArgs {
    fn data_config(&self) -> DataConfig {
        DataConfig {
            separator: self.separator,
            id_column: self.id_column.clone(),
            score_column: self.score_column.clone(),
        }
    }
}

#[derive(Args)]
pub struct FitArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Use PC1..PCN from the PC table instead of every non-ID column
    #[arg(long, value_name = "N")]
    pub num_pcs: Option<usize>,

    /// Maximum number of BFGS iterations
    #[arg(long, default_value = "500")]
    pub max_iterations: usize,

    /// Gradient-norm threshold for convergence
    #[arg(long, default_value = "1e-6")]
    pub tolerance: f64,

    /// Differentiate the likelihood numerically instead of in closed form
    #[arg(long)]
    pub numeric_gradient: bool,

    /// Where to write the fitted model
    #[arg(long, default_value = "model.toml")]
    pub model_out: String,
}

#[derive(Args)]
pub struct ScoreArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Fitted model file (.toml)
    #[arg(long)]
    pub model: String,
}

#[derive(Args)]
pub struct ClassifyArgs {
    /// Table containing calibrated z-scores
    #[arg(long, default_value = "z_scores.tsv")]
    pub z_score_file: String,

    /// Column holding the z-scores
    #[arg(long, default_value = "z_score")]
    pub z_column: String,

    /// Sample identifier column, passed through as text
    #[arg(long, default_value = "sample_id")]
    pub id_column: String,

    /// Single-byte field separator for the input and output tables
    #[arg(long, default_value = "\t", value_parser = parse_separator)]
    pub separator: u8,

    /// Flag the top P percent of the standard normal as high risk
    #[arg(long, default_value = "9.0", conflicts_with_all = ["low", "high"])]
    pub percentile_cutoff: f64,

    /// Lower percentile for three-tier classification
    #[arg(long, requires = "high")]
    pub low: Option<f64>,

    /// Upper percentile for three-tier classification
    #[arg(long, requires = "low")]
    pub high: Option<f64>,

    /// Output table: the input columns plus one label column
    #[arg(long, default_value = "high_risk_output.tsv")]
    pub out_file: String,
}

#[derive(Parser)]
#[command(
    name = "prs-calibrate",
    about = "Ancestry-adjusted polygenic score calibration",
    long_about = "Removes the dependence of a polygenic score's mean and spread on genetic \
                 ancestry, then classifies the calibrated z-scores into risk groups."
)]
struct Cli {
    /// Log level: error, warn, info, debug, or trace
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a calibration model and write z-scores for the training cohort
    Fit(FitArgs),
    /// Apply a saved calibration model to new individuals
    Score(ScoreArgs),
    /// Label calibrated z-scores by percentile cutoffs
    Classify(ClassifyArgs),
    /// Show version information
    Version,
}

fn parse_separator(raw: &str) -> Result<u8, String> {
    let unescaped = match raw {
        "\\t" | "tab" => "\t",
        other => other,
    };
    match unescaped.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(format!("separator must be a single byte, got '{raw}'")),
    }
}

fn init_logging(level: &str) {
    let filter = level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Warning: Invalid log level '{level}' provided. Defaulting to Info.");
        log::LevelFilter::Info
    });
    env_logger::Builder::new()
        .filter_level(filter)
        .parse_default_env()
        .init();
}

pub fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.input.data_config();
    let selection = match args.num_pcs {
        Some(n) => PcSelection::First(n),
        None => PcSelection::All,
    };

    println!(
        "Loading PRS from '{}' and PCs from '{}'",
        args.input.prs_file, args.input.pc_file
    );
    let inputs = load_calibration_inputs(
        &args.input.prs_file,
        &args.input.pc_file,
        &config,
        &selection,
    )?;
    println!(
        "Loaded {} samples with {} PCs ({})",
        inputs.prs.len(),
        inputs.pc_names.len(),
        inputs.pc_names.join(", ")
    );

    let calibrator = CalibratorConfig::new(inputs.pc_names.len())
        .with_pc_names(inputs.pc_names.clone())
        .with_optimizer(OptimizerOptions {
            max_iterations: args.max_iterations,
            tolerance: args.tolerance,
        })
        .with_gradient(if args.numeric_gradient {
            GradientMode::FiniteDifference
        } else {
            GradientMode::Analytic
        });

    let model = calibrator.fit(inputs.prs.view(), inputs.pcs.view())?;
    let report = model.convergence();
    println!(
        "Fit finished after {} iterations (converged: {}, mean NLL: {:.6})",
        report.iterations, report.converged, report.mean_negative_log_likelihood
    );
    if !report.converged {
        println!(
            "Warning: the optimizer stopped before reaching the gradient tolerance (gradient norm {:.3e}); the best parameters found are used.",
            report.gradient_norm
        );
    }

    model.save(&args.model_out)?;
    println!("Model saved to: {}", args.model_out);

    let z = model.score(inputs.prs.view(), inputs.pcs.view())?;
    let mut df = z_score_frame(&inputs.sample_ids, z.view(), &config, &args.input.z_column)?;
    write_table(&mut df, &args.input.out, &config)?;
    println!("Calibrated z-scores saved to: {}", args.input.out);
    Ok(())
}

pub fn score(args: ScoreArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model);
    let model = FittedCalibrator::load(&args.model)?;
    println!(
        "Model expects {} PCs ({})",
        model.num_pcs(),
        model.pc_names().join(", ")
    );

    let config = args.input.data_config();
    let inputs = load_calibration_inputs(
        &args.input.prs_file,
        &args.input.pc_file,
        &config,
        &PcSelection::Named(model.pc_names().to_vec()),
    )?;
    println!("Loaded {} samples for scoring", inputs.prs.len());

    let z = model.score(inputs.prs.view(), inputs.pcs.view())?;
    let mut df = z_score_frame(&inputs.sample_ids, z.view(), &config, &args.input.z_column)?;
    write_table(&mut df, &args.input.out, &config)?;
    println!("Calibrated z-scores saved to: {}", args.input.out);
    Ok(())
}

pub fn classify(args: ClassifyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = DataConfig {
        separator: args.separator,
        id_column: args.id_column.clone(),
        ..DataConfig::default()
    };

    let policy = match (args.low, args.high) {
        (Some(low), Some(high)) => {
            let cutoffs = TierCutoffs::new(low, high)?;
            let (low_z, high_z) = cutoffs.cutoffs();
            println!(
                "Tier cutoffs: Low at or below z = {low_z:.4} ({low}th percentile), High above z = {high_z:.4} ({high}th percentile)"
            );
            RiskPolicy::ThreeTier(cutoffs)
        }
        _ => {
            let threshold = HighRiskThreshold::new(args.percentile_cutoff)?;
            println!(
                "The z-score cutoff for the top {}% is: {:.4}",
                threshold.top_percent(),
                threshold.z_cutoff()
            );
            RiskPolicy::TopPercent(threshold)
        }
    };

    let mut df = load_table(&args.z_score_file, &config)?;
    let label = classify_frame(&mut df, &args.z_column, &policy)?;
    write_table(&mut df, &args.out_file, &config)?;
    println!(
        "Wrote {} rows with '{}' labels to: {}",
        df.height(),
        label,
        args.out_file
    );
    Ok(())
}

fn print_version_info() {
    println!("prs-calibrate {}", env!("CARGO_PKG_VERSION"));
}

fn main() {
    let cli = Cli::parse();
    let Cli { log_level, command } = cli;
    init_logging(&log_level);

    let result = match command {
        Some(Commands::Fit(args)) => fit(args),
        Some(Commands::Score(args)) => score(args),
        Some(Commands::Classify(args)) => classify(args),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
