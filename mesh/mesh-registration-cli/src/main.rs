//! mesh-register: thin-shell registration of a moving mesh onto a fixed one.
//!
//! Reads two surface meshes (VTK PolyData or OBJ), finds the affine transform
//! carrying the moving mesh onto the fixed one and writes the registered
//! moving mesh. Nothing is written when registration fails.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=mesh_registration=info` - start, per-iteration and finish lines
//! - `RUST_LOG=mesh_registration=debug` - per-evaluation term breakdown
//!
//! # Example
//!
//! ```bash
//! mesh-register fixed.vtk moving.vtk -o registered.vtk --iterations 100
//! mesh-register fixed.vtk moving.vtk -o out.vtk --config params.json --format json
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use mesh_io::{load_mesh, save_mesh, MeshFormat};
use mesh_registration::{register, RegistrationParams};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod output;

use output::{print_report, RegistrationReport};

/// Register a moving surface mesh onto a fixed one.
#[derive(Parser)]
#[command(name = "mesh-register")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Fixed (target) mesh file
    fixed: PathBuf,

    /// Moving mesh file
    moving: PathBuf,

    /// Output path for the registered moving mesh (format from extension)
    #[arg(short, long)]
    output: PathBuf,

    /// JSON file with registration parameters; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Weight of the stretch term
    #[arg(long)]
    stretch_weight: Option<f64>,

    /// Weight of the bend term
    #[arg(long)]
    bend_weight: Option<f64>,

    /// Weight of the feature term (0 disables feature matching)
    #[arg(long)]
    feature_weight: Option<f64>,

    /// Down-weight far correspondences
    #[arg(long)]
    confidence_weighting: Option<bool>,

    /// Use the largest correspondence distance as the confidence sigma
    #[arg(long)]
    maximal_distance_sigma: Option<bool>,

    /// Recompute feature matches at every evaluation
    #[arg(long)]
    update_feature_matching: Option<bool>,

    /// Optimizer iterations per level
    #[arg(long)]
    iterations: Option<usize>,

    /// Largest point motion per step, in mesh units
    #[arg(long)]
    max_step: Option<f64>,

    /// Stop once the windowed convergence value falls to this
    #[arg(long)]
    min_convergence: Option<f64>,

    /// Values in the convergence window
    #[arg(long)]
    convergence_window: Option<usize>,

    /// Virtual domain samples along the bounding-box diagonal
    #[arg(long)]
    samples_along_diagonal: Option<usize>,

    /// Optimization levels run back to back
    #[arg(long)]
    levels: Option<usize>,

    /// Output format for the report
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied.
    fn params(&self) -> Result<RegistrationParams> {
        let mut params = match &self.config {
            Some(path) => read_config(path)?,
            None => RegistrationParams::default(),
        };

        let metric = &mut params.metric;
        if let Some(w) = self.stretch_weight {
            metric.stretch_weight = w;
        }
        if let Some(w) = self.bend_weight {
            metric.bend_weight = w;
        }
        if let Some(w) = self.feature_weight {
            metric.feature_weight = w;
        }
        if let Some(on) = self.confidence_weighting {
            metric.use_confidence_weighting = on;
        }
        if let Some(on) = self.maximal_distance_sigma {
            metric.use_maximal_distance_confidence_sigma = on;
        }
        if let Some(on) = self.update_feature_matching {
            metric.update_feature_matching_each_iteration = on;
        }

        let optimizer = &mut params.optimizer;
        if let Some(n) = self.iterations {
            optimizer.number_of_iterations = n;
        }
        if let Some(step) = self.max_step {
            optimizer.maximum_step_size_physical_units = step;
        }
        if let Some(value) = self.min_convergence {
            optimizer.minimum_convergence_value = value;
        }
        if let Some(size) = self.convergence_window {
            optimizer.convergence_window_size = size;
        }

        if let Some(samples) = self.samples_along_diagonal {
            params.samples_along_diagonal = samples;
        }
        if let Some(levels) = self.levels {
            params.number_of_levels = levels;
        }

        params.validate().context("Invalid registration parameters")?;
        Ok(params)
    }
}

fn read_config(path: &Path) -> Result<RegistrationParams> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags.
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "mesh_registration=info,mesh_register=info",
            2 => "mesh_registration=debug,mesh_register=debug,mesh_io=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    if MeshFormat::from_path(&cli.output).is_none() {
        bail!(
            "Unsupported output format for {} (expected .vtk or .obj)",
            cli.output.display()
        );
    }
    let params = cli.params()?;

    let fixed = load_mesh(&cli.fixed)
        .with_context(|| format!("Failed to load fixed mesh from {}", cli.fixed.display()))?;
    let moving = load_mesh(&cli.moving)
        .with_context(|| format!("Failed to load moving mesh from {}", cli.moving.display()))?;
    info!(
        fixed_faces = fixed.faces.len(),
        moving_faces = moving.faces.len(),
        "Loaded meshes"
    );

    let result = register(&fixed, &moving, &params).context("Registration failed")?;

    save_mesh(&result.registered, &cli.output).with_context(|| {
        format!("Failed to save registered mesh to {}", cli.output.display())
    })?;

    if !cli.quiet {
        let report = RegistrationReport::new(
            cli.fixed.display().to_string(),
            cli.moving.display().to_string(),
            cli.output.display().to_string(),
            &result,
        );
        print_report(&report, cli.format)?;
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        for cause in e.chain().skip(1) {
            eprintln!("  Caused by: {cause}");
        }
        std::process::exit(1);
    }
}
