use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, bail};
use phenograph::{
    ExecuteOptions, Pipeline, PipelineSettings, ProcessingContext, ProgressEvent, Severity, ToolRegistry,
    check_inputs,
};
use phenograph_cli::{parse_target, render_tree, write_outputs};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline on one image
    Run {
        /// Path to the pipeline JSON document
        #[arg(short, long)]
        pipeline: PathBuf,
        /// Image to analyse
        #[arg(short, long)]
        image: PathBuf,
        /// Settings file (.toml or .json) overriding the document's settings
        #[arg(short, long)]
        settings: Option<PathBuf>,
        /// Where to write the result images and the feature report
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,
        /// Stop right after this node (uuid)
        #[arg(long)]
        target: Option<String>,
    },
    /// Convert a legacy pipeline document into the current format
    Convert {
        /// Legacy JSON document
        #[arg(short, long)]
        input: PathBuf,
        /// Where to write the converted document
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print a pipeline's tree and check module inputs
    Inspect {
        /// Path to the pipeline JSON document
        #[arg(short, long)]
        pipeline: PathBuf,
    },
    /// Print the JSON schema of the pipeline settings
    Schema,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();
    let registry = ToolRegistry::with_builtins();

    match &cli.command {
        Commands::Run {
            pipeline,
            image,
            settings,
            output_dir,
            target,
        } => {
            run_pipeline(&registry, pipeline, image, settings.as_deref(), output_dir, target.as_deref())?;
        }
        Commands::Convert { input, output } => {
            convert_pipeline(&registry, input, output)?;
        }
        Commands::Inspect { pipeline } => {
            inspect_pipeline(&registry, pipeline)?;
        }
        Commands::Schema => {
            let schema = PipelineSettings::schema();
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }

    Ok(())
}

fn load(registry: &ToolRegistry, path: &Path) -> Result<Pipeline> {
    let loaded = Pipeline::load(path, registry)?;
    for issue in &loaded.issues {
        warn!("{issue}");
    }
    Ok(loaded.pipeline)
}

fn run_pipeline(
    registry: &ToolRegistry,
    pipeline_path: &Path,
    image_path: &Path,
    settings: Option<&Path>,
    output_dir: &Path,
    target: Option<&str>,
) -> Result<()> {
    let mut pipeline = load(registry, pipeline_path)?;
    if let Some(settings) = settings {
        pipeline.settings = PipelineSettings::from_file(settings)?;
        info!("Settings overridden from {:?}", settings);
    }

    let mut options = ExecuteOptions::new().with_callback(|event: &ProgressEvent| match event.severity {
        Severity::Ok if event.step >= 0 => {
            info!("[{}/{}] {}", event.step + 1, event.total, event.message)
        }
        Severity::Ok => info!("{}", event.message),
        Severity::Warning => warn!("{}: {}", event.source, event.message),
        Severity::Error | Severity::Exception => error!("{}: {}", event.source, event.message),
    });
    if let Some(target) = target {
        options = options.with_target(parse_target(&pipeline, target)?);
    }

    let mut ctx = ProcessingContext::from_path(image_path)?;
    info!("Running '{}' on {:?}", pipeline.name, image_path);
    let success = pipeline.execute(&mut ctx, options);

    let written = write_outputs(&pipeline, &ctx, success, output_dir)?;
    for path in &written {
        info!("Wrote {:?}", path);
    }
    for entry in pipeline.error_log() {
        println!("{} [{}] {}", entry.severity, entry.source, entry.message);
    }

    if !success {
        bail!("pipeline '{}' failed with {}", pipeline.name, pipeline.max_severity());
    }
    info!("Pipeline completed");
    Ok(())
}

fn convert_pipeline(registry: &ToolRegistry, input: &Path, output: &Path) -> Result<()> {
    let loaded = Pipeline::load(input, registry)?;
    for issue in &loaded.issues {
        println!("issue: {issue}");
    }
    loaded.pipeline.save(output)?;
    info!(
        "Converted {:?} -> {:?} ({} nodes, {} issues)",
        input,
        output,
        loaded.pipeline.tree().len(),
        loaded.issues.len()
    );
    Ok(())
}

fn inspect_pipeline(registry: &ToolRegistry, path: &Path) -> Result<()> {
    let pipeline = load(registry, path)?;
    println!("{} (version {}, {})", pipeline.name, pipeline.version, pipeline.date);
    if !pipeline.description.is_empty() {
        println!("{}", pipeline.description);
    }
    print!("{}", render_tree(pipeline.tree()));

    let issues = check_inputs(&pipeline);
    if issues.is_empty() {
        println!("All module inputs are satisfied");
    }
    for issue in issues {
        println!("warning: {issue}");
    }
    Ok(())
}
