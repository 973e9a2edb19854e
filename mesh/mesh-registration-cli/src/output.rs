//! Report printing for text and JSON output.

use mesh_registration::{AffineTransform, LevelSummary, ParametricTransform, RegistrationOutput};
use serde::Serialize;

use crate::OutputFormat;

/// Everything a run reports on success.
#[derive(Serialize)]
pub struct RegistrationReport {
    pub fixed: String,
    pub moving: String,
    pub output: String,
    pub initial_value: f64,
    pub final_value: f64,
    pub iterations: usize,
    pub parameters: Vec<f64>,
    pub center: [f64; 3],
    pub levels: Vec<LevelSummary>,
}

impl RegistrationReport {
    pub fn new(
        fixed: String,
        moving: String,
        output: String,
        result: &RegistrationOutput<AffineTransform>,
    ) -> Self {
        let center = result.transform.center;
        Self {
            fixed,
            moving,
            output,
            initial_value: result.initial_value,
            final_value: result.final_value,
            iterations: result.total_iterations(),
            parameters: result.transform.parameters().iter().copied().collect(),
            center: [center.x, center.y, center.z],
            levels: result.levels.clone(),
        }
    }
}

pub fn print_report(report: &RegistrationReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => print_text(report),
    }
    Ok(())
}

fn print_text(report: &RegistrationReport) {
    println!("Fixed:   {}", report.fixed);
    println!("Moving:  {}", report.moving);
    println!("Start value:    {:.6e}", report.initial_value);
    for level in &report.levels {
        println!(
            "Level {}: {} iterations, {:?}, value {:.6e}",
            level.level,
            level.optimization.iterations(),
            level.optimization.stop_reason,
            level.optimization.final_value
        );
    }
    println!("Solution value: {:.6e}", report.final_value);

    // Row-major 3x3 matrix, then translation.
    let p = &report.parameters;
    if p.len() == 12 {
        println!("Matrix:");
        for row in p[..9].chunks(3) {
            println!("  [{:>12.6} {:>12.6} {:>12.6}]", row[0], row[1], row[2]);
        }
        println!("Translation: [{:.6} {:.6} {:.6}]", p[9], p[10], p[11]);
    } else {
        println!("Parameters: {p:?}");
    }
    println!(
        "Center:      [{:.6} {:.6} {:.6}]",
        report.center[0], report.center[1], report.center[2]
    );
    println!("Wrote {}", report.output);
}
