// src/main.rs

use anyhow::Result;
use brewery::config::{self, BuildConfig};
use brewery::deps::{AnyOf, CellarResolver, PathResolver};
use brewery::fetch::CacheFetcher;
use brewery::process::SystemRunner;
use brewery::{BuildOutcome, Engine, FormulaDescriptor, Platform, integrity, plan};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "brewery")]
#[command(author, version, about = "Build packages from declarative formulae", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and install one or more formulae (independent formulae build in parallel)
    Build {
        /// Formula files (.toml or .json)
        #[arg(required = true)]
        formulas: Vec<PathBuf>,
        #[command(flatten)]
        options: BuildOptions,
    },
    /// Show whether a formula would be poured or built, and with which patches
    Plan {
        /// Formula file (.toml or .json)
        formula: PathBuf,
        #[command(flatten)]
        options: BuildOptions,
    },
    /// Validate formula files without building anything
    Lint {
        /// Formula files (.toml or .json)
        #[arg(required = true)]
        formulas: Vec<PathBuf>,
    },
    /// Print or verify the SHA-256 of a file
    Checksum {
        /// File to hash
        file: PathBuf,
        /// Expected digest; exits non-zero on mismatch
        #[arg(short, long)]
        expect: Option<String>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
struct BuildOptions {
    /// Cellar kegs are installed into
    #[arg(long, env = "BREWERY_CELLAR", default_value = config::DEFAULT_CELLAR)]
    cellar: PathBuf,
    /// Directory for configuration files ({etc})
    #[arg(long, env = "BREWERY_ETC", default_value = config::DEFAULT_ETC)]
    etc: PathBuf,
    /// Directory for variable data ({var})
    #[arg(long, env = "BREWERY_VAR", default_value = config::DEFAULT_VAR)]
    var: PathBuf,
    /// Download cache holding fetched sources, patches and bottles
    #[arg(long, env = "BREWERY_CACHE", default_value = config::DEFAULT_CACHE)]
    cache: PathBuf,
    /// Parent directory for build scratch space (default: system temp dir)
    #[arg(long, env = "BREWERY_TEMP")]
    work_dir: Option<PathBuf>,
    /// Write per-step build logs below this directory
    #[arg(long, env = "BREWERY_LOGS")]
    logs: Option<PathBuf>,
    /// Platform tag to build for (default: detected)
    #[arg(long, env = "BREWERY_PLATFORM")]
    platform: Option<String>,
    /// Parallel make jobs (default: available CPUs)
    #[arg(short, long)]
    jobs: Option<usize>,
    /// Ignore bottles and build from source
    #[arg(short = 's', long)]
    build_from_source: bool,
    /// Enable a feature flag (exported as FEATURE_<NAME>=1); repeatable
    #[arg(long = "feature", value_name = "NAME")]
    features: Vec<String>,
    /// Set an extra build environment variable; repeatable
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,
    /// Keep the build directory after the build
    #[arg(long)]
    keep_tmp: bool,
    /// Replace an already installed keg
    #[arg(long)]
    overwrite: bool,
    /// Base URL bottles are fetched from when a formula sets none
    #[arg(long, env = "BREWERY_BOTTLE_DOMAIN")]
    bottle_root_url: Option<String>,
    /// Program used to apply patches
    #[arg(long, default_value = config::DEFAULT_PATCH_PROGRAM)]
    patch_program: String,
}

impl BuildOptions {
    fn into_config(self) -> Result<BuildConfig> {
        let mut config = BuildConfig::new(self.cellar).inherit_env();
        config.etc = self.etc;
        config.var = self.var;
        config.cache = self.cache;
        if let Some(work_dir) = self.work_dir {
            config.work_root = work_dir;
        }
        config.logs = self.logs;
        if let Some(platform) = self.platform {
            config.platform = Platform::new(platform)?;
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs.max(1);
        }
        config.build_from_source = self.build_from_source;
        config.features = self.features.into_iter().collect();
        config.env_overrides = self.env.into_iter().collect();
        config.keep_tmp = self.keep_tmp;
        config.overwrite = self.overwrite;
        config.bottle_root_url = self.bottle_root_url;
        config.patch_program = self.patch_program;
        Ok(config)
    }
}

fn parse_env_pair(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn load_all(paths: &[PathBuf]) -> Result<Vec<FormulaDescriptor>> {
    let formulas = paths
        .iter()
        .map(|p| FormulaDescriptor::load(p))
        .collect::<brewery::Result<Vec<_>>>()?;

    let mut names = HashSet::new();
    for formula in &formulas {
        if !names.insert(formula.name.as_str()) {
            return Err(anyhow::anyhow!(
                "Formula '{}' given more than once",
                formula.name
            ));
        }
    }
    Ok(formulas)
}

fn cmd_build(paths: Vec<PathBuf>, options: BuildOptions) -> Result<()> {
    let formulas = load_all(&paths)?;
    let config = options.into_config()?;
    info!(
        "Building {} formula(e) for {} into {}",
        formulas.len(),
        config.platform,
        config.cellar.display()
    );

    let fetcher = CacheFetcher::new(&config.cache);
    let search_path = config.env.get("PATH").cloned().unwrap_or_default();
    let resolver = AnyOf(vec![
        Box::new(CellarResolver::new(&config.cellar)),
        Box::new(PathResolver::new(search_path, std::env::current_dir()?)),
    ]);
    let runner = SystemRunner;
    let engine = Engine::new(&config, &fetcher, &resolver, &runner);

    let outcomes: Vec<(String, BuildOutcome)> = formulas
        .par_iter()
        .map(|formula| (formula.name.clone(), engine.build(formula)))
        .collect();

    let mut failed = 0;
    for (name, outcome) in &outcomes {
        match outcome {
            BuildOutcome::Done(installed) => {
                println!(
                    "Installed {} {} from {}",
                    installed.name, installed.version, installed.method
                );
                println!("  Keg: {}", installed.keg.display());
            }
            BuildOutcome::Failed { stage, error } => {
                failed += 1;
                error!("{} failed during {}", name, stage);
                println!("Failed {} during {}: {}", name, stage, error);
            }
        }
    }

    if failed > 0 {
        return Err(anyhow::anyhow!(
            "{} of {} formula(e) failed",
            failed,
            outcomes.len()
        ));
    }
    Ok(())
}

fn cmd_plan(path: PathBuf, options: BuildOptions) -> Result<()> {
    let formula = FormulaDescriptor::load(&path)?;
    formula.validate()?;
    let config = options.into_config()?;
    let plan = plan::resolve(&formula, &config)?;

    println!("{} {} on {}", formula.name, formula.version()?, config.platform);
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn cmd_lint(paths: Vec<PathBuf>) -> Result<()> {
    let mut failed = 0;
    for path in &paths {
        match FormulaDescriptor::load(path).and_then(|f| f.validate()) {
            Ok(()) => println!("{}: ok", path.display()),
            Err(e) => {
                failed += 1;
                println!("{}: {}", path.display(), e);
            }
        }
    }
    if failed > 0 {
        return Err(anyhow::anyhow!("{} formula file(s) failed validation", failed));
    }
    Ok(())
}

fn cmd_checksum(path: PathBuf, expect: Option<String>) -> Result<()> {
    match expect {
        Some(expected) => {
            let digest = integrity::Digest::parse(&expected)?;
            integrity::verify_file(&path, &digest, &path.display().to_string())?;
            println!("{}: OK", path.display());
        }
        None => println!("{}  {}", integrity::sha256_file(&path)?, path.display()),
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Build { formulas, options }) => cmd_build(formulas, options),
        Some(Commands::Plan { formula, options }) => cmd_plan(formula, options),
        Some(Commands::Lint { formulas }) => cmd_lint(formulas),
        Some(Commands::Checksum { file, expect }) => cmd_checksum(file, expect),
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "brewery", &mut std::io::stdout());
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("Brewery v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'brewery --help' for usage information");
            Ok(())
        }
    }
}
