//! tilegen - tiled GEMM kernel generator
//!
//! # Usage
//!
//! ```bash
//! # Check tuning profiles against the generator's structural rules
//! tilegen validate tuned/*.toml
//!
//! # Emit kernel text for a profile
//! tilegen generate tuned.toml --dtype f32 -o gemm.cl
//!
//! # Memory footprint of the profile's [problem]
//! tilegen estimate tuned.toml --json
//!
//! # Execute the generated algorithm on the host and compare with a naive product
//! tilegen verify tuned.toml --seed 7
//! ```

mod logging;
mod profile;
mod verify;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use symbolic::{ArrayHandle, NumericType};
use tilegen_gpu::{estimate, validate, KernelSource};

use crate::profile::{load_profile, Problem, Profile};

#[derive(Parser)]
#[command(name = "tilegen")]
#[command(version = "0.1.0")]
#[command(about = "Tiled GEMM kernel generator", long_about = None)]
struct Cli {
    /// Log generation and launch milestones
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check one or more tuning profiles
    Validate {
        /// Profile files
        #[arg(required = true)]
        profiles: Vec<PathBuf>,
    },

    /// Generate kernel text for a profile
    Generate {
        /// Profile file
        profile: PathBuf,

        /// Element type (defaults to the profile's [problem] dtype, then f32)
        #[arg(long)]
        dtype: Option<String>,

        /// Kernel name suffix
        #[arg(long, default_value = "_0")]
        suffix: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Estimate local memory, registers and workspace for the profile's [problem]
    Estimate {
        /// Profile file
        profile: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the profile's [problem] on the host reference queue
    Verify {
        /// Profile file
        profile: PathBuf,

        /// Seed for the random operands
        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

fn main() {
    let cli = Cli::parse();
    if cli.verbose {
        logging::init_with_level(log::LevelFilter::Debug);
    } else if std::env::var_os("RUST_LOG").is_some() {
        logging::init_from_env();
    } else {
        logging::init();
    }

    let result = match cli.command {
        Commands::Validate { profiles } => validate_profiles(&profiles),
        Commands::Generate {
            profile,
            dtype,
            suffix,
            output,
        } => generate_kernel(&profile, dtype.as_deref(), &suffix, output),
        Commands::Estimate { profile, json } => estimate_profile(&profile, json),
        Commands::Verify { profile, seed } => verify_profile(&profile, seed),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn parse_dtype(name: &str) -> Result<NumericType, String> {
    match name {
        "f32" => Ok(NumericType::Float32),
        "f64" => Ok(NumericType::Float64),
        "i32" => Ok(NumericType::Int32),
        "i64" => Ok(NumericType::Int64),
        other => Err(format!("unknown element type '{}' (expected f32, f64, i32 or i64)", other)),
    }
}

fn require_problem(profile: &Profile, path: &std::path::Path) -> Result<Problem, String> {
    profile
        .problem
        .ok_or_else(|| format!("{} has no [problem] section", path.display()))
}

fn validate_profiles(paths: &[PathBuf]) -> Result<(), String> {
    let mut rejected = 0;
    for path in paths {
        let profile = load_profile(path)?;
        match validate(&profile.params) {
            Ok(()) => println!("{}: ok ({})", path.display(), profile.params),
            Err(v) => {
                rejected += 1;
                log::warn!("{} rejected: {:?}", path.display(), v);
                println!("{}: invalid [{}] {}", path.display(), v.code(), v);
            }
        }
    }
    if rejected > 0 {
        return Err(format!("{} of {} profiles invalid", rejected, paths.len()));
    }
    Ok(())
}

fn generate_kernel(
    path: &std::path::Path,
    dtype: Option<&str>,
    suffix: &str,
    output: Option<PathBuf>,
) -> Result<(), String> {
    let profile = load_profile(path)?;
    validate(&profile.params).map_err(|v| format!("invalid parameters: {} (code {})", v, v.code()))?;
    let dtype = match dtype {
        Some(name) => parse_dtype(name)?,
        None => profile.problem.map_or(NumericType::Float32, |p| p.dtype),
    };

    let source = KernelSource::generate(&profile.params, dtype, suffix);
    match output {
        Some(out) => {
            std::fs::write(&out, &source.text)
                .map_err(|e| format!("Failed to write {}: {}", out.display(), e))?;
            log::info!("wrote {} to {}", source.gemm_name(), out.display());
        }
        None => print!("{}", source.text),
    }
    Ok(())
}

fn estimate_profile(path: &std::path::Path, json: bool) -> Result<(), String> {
    let profile = load_profile(path)?;
    let problem = require_problem(&profile, path)?;
    let tree = problem.expression(&profile.params, [ArrayHandle(0), ArrayHandle(1), ArrayHandle(2)]);
    let usage = estimate(&profile.params, &tree).map_err(|e| e.to_string())?;

    if json {
        let text = serde_json::to_string_pretty(&usage).map_err(|e| e.to_string())?;
        println!("{}", text);
    } else {
        println!("local memory: {} bytes", usage.local_memory_bytes);
        println!("registers:    {} bytes", usage.register_bytes);
        println!("workspace:    {} elements", usage.workspace_elements);
    }
    Ok(())
}

fn verify_profile(path: &std::path::Path, seed: u64) -> Result<(), String> {
    let profile = load_profile(path)?;
    let problem = require_problem(&profile, path)?;
    let report = verify::verify(&profile.params, &problem, seed)?;
    println!(
        "{}: {}x{}x{} {} max relative error {:e} ({} launches)",
        profile.params, problem.m, problem.n, problem.k, problem.dtype, report.max_error, report.launches
    );
    if !report.passed() {
        return Err(format!(
            "error {:e} exceeds tolerance {:e}",
            report.max_error, report.tolerance
        ));
    }
    Ok(())
}
