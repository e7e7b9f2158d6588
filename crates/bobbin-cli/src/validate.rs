//! Program validation without a GPU.

use anyhow::{Context, Result};
use bobbin_core::{Program, check_dependencies};
use std::io::Write;
use std::path::Path;

/// Validate a program file and report any issues.
///
/// With `strict`, the tape is also checked for reads of scratch buffers
/// before any instruction has written them.
pub fn validate_program(program_path: &Path, strict: bool, verbose: bool) -> Result<()> {
    println!("Validating program: {}\n", program_path.display());

    print_step("Loading program", verbose);
    let program = Program::from_path(program_path)
        .with_context(|| format!("Failed to load program from {}", program_path.display()))?;
    print_success(verbose);

    print_step("Checking resources, pipelines and tape", verbose);
    program.validate().context("Program is invalid")?;
    print_success(verbose);

    if strict {
        print_step("Checking tape dependencies", verbose);
        check_dependencies(&program).context("Tape dependency check failed")?;
        print_success(verbose);
    }

    let summary = program.summary();
    let unused = summary.pipeline_count - summary.referenced_pipelines;
    if unused > 0 {
        println!("\n⚠ {} pipeline(s) are never dispatched and will not be compiled.", unused);
    }

    println!(
        "\n✓ Program is valid: {} resources, {} pipelines, {} dispatches",
        summary.resource_count, summary.pipeline_count, summary.instruction_count
    );
    Ok(())
}

fn print_step(name: &str, verbose: bool) {
    if verbose {
        print!("  {}... ", name);
        std::io::stdout().flush().ok();
    }
}

fn print_success(verbose: bool) {
    if verbose {
        println!("✓");
    }
}
