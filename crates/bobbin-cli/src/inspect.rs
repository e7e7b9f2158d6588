//! Program inspection utilities.

use bobbin_core::{Program, ResourceId};
use std::collections::BTreeMap;

/// Print a summary of a program's resources, pipelines and tape.
pub fn print_program(program: &Program, verbose: bool) {
    let summary = program.summary();

    println!("Program: {}", display_name(program));
    println!();

    println!("Resources: {}", summary.resource_count);
    println!("  Weights: {}", format_bytes(summary.weight_bytes));
    println!("  Scratch: {}", format_bytes(summary.scratch_bytes));
    println!("  Io:      {}", format_bytes(summary.io_bytes));
    println!();

    println!("Pipelines: {}", summary.pipeline_count);
    println!("  Referenced by tape: {}", summary.referenced_pipelines);
    println!("  Distinct kernels:   {}", summary.distinct_kernels);
    println!("  Distinct layouts:   {}", summary.distinct_layouts);
    println!();

    println!("Tape: {} dispatches", summary.instruction_count);
    println!("  Total workgroups: {}", summary.workgroup_total);
    println!();

    println!("Inputs:");
    print_io(program, &program.inputs);
    println!("Outputs:");
    print_io(program, &program.outputs);

    if verbose {
        println!();
        println!("Dispatch counts by pipeline:");
        for (label, count) in dispatch_counts(program) {
            println!("  {:>6}  {}", count, label);
        }
    }
}

fn print_io(program: &Program, ids: &[ResourceId]) {
    if ids.is_empty() {
        println!("  (none)");
        return;
    }
    for &id in ids {
        match program.resource(id) {
            Some(desc) => println!(
                "  {} ({}, {} f32)",
                desc.display_name(),
                format_bytes(desc.byte_size),
                desc.byte_size / 4
            ),
            None => println!("  {} (missing)", id),
        }
    }
}

fn display_name(program: &Program) -> &str {
    if program.name.is_empty() {
        "(unnamed)"
    } else {
        &program.name
    }
}

/// Number of dispatches per pipeline label, sorted by label.
pub fn dispatch_counts(program: &Program) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for inst in &program.tape {
        let label = program
            .pipeline(inst.pipeline)
            .map(|spec| spec.display_name())
            .unwrap_or_else(|| inst.pipeline.to_string());
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
