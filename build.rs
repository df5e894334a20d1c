// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_options(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("cellar")
            .long("cellar")
            .env("BREWERY_CELLAR")
            .value_name("PATH")
            .default_value("/opt/brewery/Cellar")
            .help("Cellar kegs are installed into"),
    )
    .arg(
        Arg::new("etc")
            .long("etc")
            .env("BREWERY_ETC")
            .value_name("PATH")
            .default_value("/opt/brewery/etc")
            .help("Directory for configuration files ({etc})"),
    )
    .arg(
        Arg::new("var")
            .long("var")
            .env("BREWERY_VAR")
            .value_name("PATH")
            .default_value("/opt/brewery/var")
            .help("Directory for variable data ({var})"),
    )
    .arg(
        Arg::new("cache")
            .long("cache")
            .env("BREWERY_CACHE")
            .value_name("PATH")
            .default_value("/var/cache/brewery")
            .help("Download cache holding fetched sources, patches and bottles"),
    )
    .arg(
        Arg::new("work_dir")
            .long("work-dir")
            .env("BREWERY_TEMP")
            .value_name("PATH")
            .help("Parent directory for build scratch space"),
    )
    .arg(
        Arg::new("logs")
            .long("logs")
            .env("BREWERY_LOGS")
            .value_name("PATH")
            .help("Write per-step build logs below this directory"),
    )
    .arg(
        Arg::new("platform")
            .long("platform")
            .env("BREWERY_PLATFORM")
            .value_name("TAG")
            .help("Platform tag to build for (default: detected)"),
    )
    .arg(
        Arg::new("jobs")
            .short('j')
            .long("jobs")
            .help("Parallel make jobs (default: available CPUs)"),
    )
    .arg(
        Arg::new("build_from_source")
            .short('s')
            .long("build-from-source")
            .action(ArgAction::SetTrue)
            .help("Ignore bottles and build from source"),
    )
    .arg(
        Arg::new("feature")
            .long("feature")
            .value_name("NAME")
            .action(ArgAction::Append)
            .help("Enable a feature flag (exported as FEATURE_<NAME>=1)"),
    )
    .arg(
        Arg::new("env")
            .long("env")
            .value_name("KEY=VALUE")
            .action(ArgAction::Append)
            .help("Set an extra build environment variable"),
    )
    .arg(
        Arg::new("keep_tmp")
            .long("keep-tmp")
            .action(ArgAction::SetTrue)
            .help("Keep the build directory after the build"),
    )
    .arg(
        Arg::new("overwrite")
            .long("overwrite")
            .action(ArgAction::SetTrue)
            .help("Replace an already installed keg"),
    )
    .arg(
        Arg::new("bottle_root_url")
            .long("bottle-root-url")
            .env("BREWERY_BOTTLE_DOMAIN")
            .value_name("URL")
            .help("Base URL bottles are fetched from when a formula sets none"),
    )
    .arg(
        Arg::new("patch_program")
            .long("patch-program")
            .default_value("patch")
            .help("Program used to apply patches"),
    )
}

fn build_cli() -> Command {
    Command::new("brewery")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Brewery Contributors")
        .about("Build packages from declarative formulae")
        .subcommand_required(false)
        .subcommand(build_options(
            Command::new("build")
                .about("Build and install one or more formulae")
                .arg(
                    Arg::new("formulas")
                        .required(true)
                        .num_args(1..)
                        .help("Formula files (.toml or .json)"),
                ),
        ))
        .subcommand(build_options(
            Command::new("plan")
                .about("Show whether a formula would be poured or built, and with which patches")
                .arg(Arg::new("formula").required(true).help("Formula file (.toml or .json)")),
        ))
        .subcommand(
            Command::new("lint")
                .about("Validate formula files without building anything")
                .arg(
                    Arg::new("formulas")
                        .required(true)
                        .num_args(1..)
                        .help("Formula files (.toml or .json)"),
                ),
        )
        .subcommand(
            Command::new("checksum")
                .about("Print or verify the SHA-256 of a file")
                .arg(Arg::new("file").required(true).help("File to hash"))
                .arg(
                    Arg::new("expect")
                        .short('e')
                        .long("expect")
                        .help("Expected digest; exits non-zero on mismatch"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("brewery.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
