//! `docstack` command line: declare the document pipeline stack, synthesize
//! its CloudFormation template, package function code, and audit templates.
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docstack::{
    asset::{CodeAsset, package_asset},
    config::{self, StackConfig},
    describe::describe_stack,
    logging,
    pipeline::build_pipeline_stack,
    synth::{SynthOptions, Template, synthesize},
    verify::{Expectations, verify_template},
};

#[derive(Parser)]
#[command(
    name = "docstack",
    version,
    about = "Synthesizes the document question-answering stack"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `<stack>.template.json` and `assets.json`.
    Synth {
        /// Output directory; defaults to `DOCSTACK_OUTPUT_DIR` or `cdk.out`.
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Print the template to stdout instead of writing files.
        #[arg(long)]
        stdout: bool,
    },
    /// Zip the function code directory as `<fingerprint>.zip`.
    Package {
        /// Output directory; defaults to `<output dir>/assets`.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Audit a template file and exit non-zero on violations.
    Verify {
        /// Template to audit.
        template: PathBuf,
    },
    /// Print the declared resources and their wiring.
    Describe,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();
    let config = config::load_config().context("failed to load configuration")?;

    match cli.command {
        Command::Synth { out_dir, stdout } => run_synth(&config, out_dir, stdout),
        Command::Package { out_dir } => run_package(&config, out_dir),
        Command::Verify { template } => run_verify(&config, &template),
        Command::Describe => {
            let stack = build_pipeline_stack(&config).context("failed to declare stack")?;
            print!("{}", describe_stack(&stack));
            Ok(())
        }
    }
}

fn run_synth(config: &StackConfig, out_dir: Option<PathBuf>, stdout: bool) -> Result<()> {
    let stack = build_pipeline_stack(config).context("failed to declare stack")?;
    let options = SynthOptions {
        description: Some(format!("{} document pipeline", stack.name())),
        ..SynthOptions::default()
    };
    let output = synthesize(&stack, &options)
        .with_context(|| format!("failed to synthesize stack {}", stack.name()))?;

    if stdout {
        let json = output
            .template
            .to_json_pretty()
            .context("failed to render template")?;
        let mut handle = std::io::stdout().lock();
        writeln!(handle, "{json}").context("failed to write template to stdout")?;
        return Ok(());
    }

    let out_dir = out_dir.unwrap_or_else(|| config.output_dir.clone());
    let path = output
        .write_to(&out_dir, stack.name())
        .with_context(|| format!("failed to write synthesis output to {}", out_dir.display()))?;
    println!("{}", path.display());
    Ok(())
}

fn run_package(config: &StackConfig, out_dir: Option<PathBuf>) -> Result<()> {
    let out_dir = out_dir.unwrap_or_else(|| config.output_dir.join("assets"));
    let asset = CodeAsset::new(config.asset_dir.clone());
    let packaged = package_asset(&asset, &out_dir).with_context(|| {
        format!("failed to package code asset {}", config.asset_dir.display())
    })?;
    println!(
        "{} ({} files, key {})",
        packaged.archive.display(),
        packaged.file_count,
        packaged.object_key
    );
    Ok(())
}

fn run_verify(config: &StackConfig, path: &Path) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read template at {}", path.display()))?;
    let template = Template::from_json(&raw)
        .with_context(|| format!("failed to parse template at {}", path.display()))?;

    let violations = verify_template(&template, &Expectations::for_pipeline(config));
    if violations.is_empty() {
        println!("{}: all checks passed", path.display());
        return Ok(());
    }
    for violation in &violations {
        println!("{violation}");
    }
    bail!(
        "{} violation(s) found in {}",
        violations.len(),
        path.display()
    )
}
