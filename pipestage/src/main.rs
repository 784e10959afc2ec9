//! Pipestage CLI - run declared stages and keep dvc.yaml in sync
//!
//! # Commands
//!
//! ```bash
//! pipestage run prepare                # Run a stage (manifest must be in sync)
//! pipestage get-config prepare         # Print the traced dvc.yaml entry
//! pipestage update-config prepare      # Rewrite the dvc.yaml entry after confirmation
//! pipestage operations                 # Show available operations
//! ```

use clap::{Parser, Subcommand};
use pipestage::config::{DEFAULT_MANIFEST_FILE, DEFAULT_PARAMS_FILE};
use pipestage::manifest::{self, AutoConfirm, Confirm, Synchronizer, TerminalConfirm};
use pipestage::models::table::{NATIVE_METHODS, NATIVE_PREDICATES};
use pipestage::registry::{Load, Transform, Validate, Write, CUSTOM};
use pipestage::transform::COMBINE;
use pipestage::{logging, Params, ProjectPaths, Registry, RunOptions, StageRunner};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pipestage")]
#[command(about = "Run declared data stages and keep dvc.yaml in sync", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Params file declaring the stages
    #[arg(long, global = true, env = "PIPESTAGE_PARAMS", default_value = DEFAULT_PARAMS_FILE)]
    params: PathBuf,

    /// DVC manifest file
    #[arg(long, global = true, env = "PIPESTAGE_MANIFEST", default_value = DEFAULT_MANIFEST_FILE)]
    manifest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a stage
    Run {
        /// Stage name in the params file
        stage: String,

        /// Skip validations
        #[arg(long)]
        skip_validation: bool,
    },

    /// Print the expected dvc.yaml entry of a stage
    GetConfig {
        /// Stage name in the params file
        stage: String,
    },

    /// Update the dvc.yaml entry of a stage
    UpdateConfig {
        /// Stage name in the params file
        stage: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show available operations
    Operations,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let _guard = match logging::init(&cli.log_level, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let paths = ProjectPaths {
        params: cli.params,
        manifest: cli.manifest,
    };

    let result = match cli.command {
        Commands::Run {
            stage,
            skip_validation,
        } => cmd_run(&paths, &stage, skip_validation),

        Commands::GetConfig { stage } => cmd_get_config(&paths, &stage),

        Commands::UpdateConfig { stage, yes } => cmd_update_config(&paths, &stage, yes),

        Commands::Operations => cmd_operations(),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_params(paths: &ProjectPaths) -> Result<Params, Box<dyn std::error::Error>> {
    tracing::debug!("reading params from {}", paths.params.display());
    Ok(Params::from_file(&paths.params)?)
}

fn cmd_run(paths: &ProjectPaths, stage: &str, skip_validation: bool) -> CliResult {
    let params = load_params(paths)?;
    let registry = Registry::builtin();

    Synchronizer::new(&params, &registry, &paths.manifest).ensure_in_sync(stage)?;

    let options = RunOptions { skip_validation };
    let report = StageRunner::new(&params, &registry).run(stage, &options)?;

    eprintln!("Stage '{}' done in {} ms", report.stage, report.duration_ms());
    eprintln!("   Inputs: {}", report.inputs.len());
    eprintln!("   Validations: {}", report.validations_run);
    eprintln!("   Rows written: {}", report.rows_written);
    for output in &report.outputs {
        eprintln!("   -> {}", output);
    }
    Ok(())
}

fn cmd_get_config(paths: &ProjectPaths, stage: &str) -> CliResult {
    let params = load_params(paths)?;
    let registry = Registry::builtin();
    let sync = Synchronizer::new(&params, &registry, &paths.manifest);

    let current = manifest::Manifest::load(&paths.manifest)?.entry(stage)?;
    let entry = sync.expected(stage, current.as_ref())?;
    print!("{}", manifest::render_entry(stage, &entry)?);
    Ok(())
}

fn cmd_update_config(paths: &ProjectPaths, stage: &str, yes: bool) -> CliResult {
    let params = load_params(paths)?;
    let registry = Registry::builtin();
    let sync = Synchronizer::new(&params, &registry, &paths.manifest);

    let confirm: Box<dyn Confirm> = if yes {
        Box::new(AutoConfirm(true))
    } else {
        Box::new(TerminalConfirm)
    };

    if sync.update(stage, confirm.as_ref())? {
        eprintln!("Updated stage '{}' in {}", stage, paths.manifest.display());
    } else {
        eprintln!("Stage '{}' is already up to date", stage);
    }
    Ok(())
}

fn cmd_operations() -> CliResult {
    let registry = Registry::builtin();

    println!("Load formats:");
    for name in registry.names::<Load>() {
        println!("  {}", name);
    }

    println!("\nTransformations:");
    println!("  {}  (structural: include, exclude, new_key)", COMBINE);
    println!("  {}  (import_from: <module>.<symbol>)", CUSTOM);
    for name in registry.names::<Transform>() {
        println!("  {}", name);
    }
    println!("  native: {}", NATIVE_METHODS.join(", "));

    println!("\nValidations:");
    for name in registry.names::<Validate>() {
        println!("  {}", name);
    }
    println!("  native: {}", NATIVE_PREDICATES.join(", "));

    println!("\nWrite formats:");
    for name in registry.names::<Write>() {
        println!("  {}", name);
    }
    Ok(())
}
