//! Bobbin CLI - inspect, validate and run compute-dispatch programs.

use anyhow::{Context, Result, bail};
use bobbin_cli::{inspect, tensor_io, validate};
use bobbin_core::{Program, SafetensorsWeights, WeightSource};
use bobbin_runtime::{ExecutorConfig, Runtime};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "bobbin")]
#[command(about = "Replay fixed GPU compute-dispatch programs", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a program's resources, pipelines and tape
    Inspect {
        /// Path to the program JSON file
        #[arg(value_name = "PROGRAM")]
        program: PathBuf,
    },
    /// Check a program without touching the GPU
    Validate {
        /// Path to the program JSON file
        #[arg(value_name = "PROGRAM")]
        program: PathBuf,

        /// Also reject tapes that read scratch buffers before writing them
        #[arg(long)]
        strict: bool,
    },
    /// Run a program on the GPU
    Run {
        /// Path to the program JSON file
        #[arg(value_name = "PROGRAM")]
        program: PathBuf,

        /// Safetensors file holding the weight tensors
        #[arg(short, long, value_name = "FILE")]
        weights: Option<PathBuf>,

        /// Raw little-endian f32 input, one per program input (zeros if omitted)
        #[arg(short, long, value_name = "FILE")]
        input: Vec<PathBuf>,

        /// Where to write each output's raw bytes (printed if omitted)
        #[arg(short, long, value_name = "FILE")]
        output: Vec<PathBuf>,

        /// Check tape dependencies before setup
        #[arg(long)]
        strict: bool,

        /// Run the tape this many times and report timings
        #[arg(long, default_value = "1")]
        repeat: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { program } => {
            cmd_inspect(&program, cli.verbose > 0)?;
        }
        Commands::Validate { program, strict } => {
            validate::validate_program(&program, strict, cli.verbose > 0)?;
        }
        Commands::Run {
            program,
            weights,
            input,
            output,
            strict,
            repeat,
        } => {
            pollster::block_on(cmd_run(
                &program,
                weights.as_deref(),
                &input,
                &output,
                strict,
                repeat,
            ))?;
        }
    }

    Ok(())
}

fn load_program(path: &Path) -> Result<Program> {
    Program::from_path(path)
        .with_context(|| format!("Failed to load program from {}", path.display()))
}

fn cmd_inspect(program_path: &Path, verbose: bool) -> Result<()> {
    let program = load_program(program_path)?;
    inspect::print_program(&program, verbose);
    Ok(())
}

async fn cmd_run(
    program_path: &Path,
    weights_path: Option<&Path>,
    input_paths: &[PathBuf],
    output_paths: &[PathBuf],
    strict: bool,
    repeat: usize,
) -> Result<()> {
    let program = load_program(program_path)?;

    let weights: Box<dyn WeightSource> = match weights_path {
        Some(path) => Box::new(
            SafetensorsWeights::from_path(path)
                .with_context(|| format!("Failed to load weights from {}", path.display()))?,
        ),
        None => Box::new(HashMap::<String, Vec<u8>>::new()),
    };

    let runtime = Runtime::new().await.context("Failed to initialize GPU")?;
    let info = runtime.adapter_info();
    eprintln!("GPU: {} ({:?})", info.name, info.backend);

    let mut config = ExecutorConfig::default();
    if strict {
        config = config.strict();
    }

    let setup_start = Instant::now();
    let mut executor = runtime
        .load_program(&program, &*weights, config)
        .await
        .context("Failed to set up executor")?;
    eprintln!(
        "Setup: {} pipelines, {} dispatches in {:.2?}",
        executor.pipelines().len(),
        executor.tape_len(),
        setup_start.elapsed()
    );

    let input_sizes = executor.input_sizes();
    let inputs: Vec<Vec<u8>> = if input_paths.is_empty() {
        input_sizes.iter().map(|&n| vec![0u8; n as usize]).collect()
    } else {
        if input_paths.len() != input_sizes.len() {
            bail!(
                "Program takes {} input(s) but {} --input file(s) were given",
                input_sizes.len(),
                input_paths.len()
            );
        }
        input_paths
            .iter()
            .zip(&input_sizes)
            .map(|(path, &size)| tensor_io::read_input(path, size))
            .collect::<Result<_>>()?
    };
    let input_refs: Vec<&[u8]> = inputs.iter().map(Vec::as_slice).collect();

    if output_paths.len() > executor.outputs().len() {
        bail!(
            "Program has {} output(s) but {} --output file(s) were given",
            executor.outputs().len(),
            output_paths.len()
        );
    }

    let mut outputs = Vec::new();
    for iteration in 0..repeat.max(1) {
        let start = Instant::now();
        outputs = executor
            .run_bytes(&input_refs)
            .await
            .context("Execution failed")?;
        eprintln!("Run {}: {:.2?}", iteration + 1, start.elapsed());
    }

    for (index, data) in outputs.iter().enumerate() {
        match output_paths.get(index) {
            Some(path) => {
                tensor_io::write_output(path, data)?;
                println!("Output {} -> {} ({} bytes)", index, path.display(), data.len());
            }
            None => {
                let values = tensor_io::decode_f32(data);
                println!("Output {}: {}", index, tensor_io::describe_f32(&values, 8));
            }
        }
    }

    Ok(())
}
