use anyhow::{bail, Context, Result};
use clap::Parser;
use formula_designer_core::{generate_module, GeneratorConfig, Rulebook};
use std::fs;
use std::path::PathBuf;

/// Generate Python classes from a JSON entity schema, compiling every
/// calculated field and aggregation formula into a property.
#[derive(Parser, Debug)]
#[command(name = "formula-designer", version)]
struct Cli {
    /// Path to the input JSON schema.
    #[arg(short, long)]
    input: PathBuf,

    /// Path to the output .py file.
    #[arg(short, long)]
    output: PathBuf,

    /// Also emit a sample_main() entry point.
    #[arg(long)]
    include_sample_main: bool,

    /// TOML file with generator settings. Flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Module the building blocks are imported from.
    #[arg(long)]
    building_block_module: Option<String>,

    /// Exit with an error if any formula failed to compile.
    #[arg(long)]
    strict: bool,
}

fn load_config(cli: &Cli) -> Result<GeneratorConfig> {
    let mut config = match &cli.config {
        Some(path) => GeneratorConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let mut config = GeneratorConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    if cli.include_sample_main {
        config.include_sample_main = true;
    }
    if let Some(module) = &cli.building_block_module {
        config.building_block_module = module.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    let rulebook = Rulebook::load(&cli.input)
        .with_context(|| format!("loading schema {}", cli.input.display()))?;
    log::info!(
        "loaded {} entities from {}",
        rulebook.entities.len(),
        cli.input.display()
    );

    let module = generate_module(&rulebook, &config);
    fs::write(&cli.output, &module.source)
        .with_context(|| format!("writing {}", cli.output.display()))?;

    println!("Generated Python code written to {}", cli.output.display());
    let blocks = module.building_blocks();
    if !blocks.is_empty() {
        println!("Detected usage of building blocks: {}", blocks.join(", "));
    }

    for failure in &module.failures {
        eprintln!(
            "warning: {}.{}: {}",
            failure.entity, failure.member, failure.error
        );
    }
    if cli.strict && !module.failures.is_empty() {
        bail!("{} formula(s) failed to compile", module.failures.len());
    }
    Ok(())
}
