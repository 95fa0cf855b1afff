//! gemkit - install Ruby gem packages

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gemkit_cli::{Cli, Commands, cmd, load_config};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.install_dir.as_deref())?;

    match cli.command {
        Commands::Install {
            archives,
            bin_dir,
            force,
            ignore_dependencies,
            no_wrappers,
            env_shebang,
            format_executable,
            build_args,
        } => {
            let mut config = config;
            if bin_dir.is_some() {
                config.bin_dir = bin_dir;
            }
            config.force |= force;
            config.ignore_dependencies |= ignore_dependencies;
            config.wrappers &= !no_wrappers;
            config.env_shebang |= env_shebang;
            config.format_executable |= format_executable;
            config.build_args.extend(build_args);
            cmd::install::install(&archives, config, cli.quiet)
        }
        Commands::List { json } => cmd::list::list(&config, json),
        Commands::Search { name, all } => cmd::search::search(&config, &name, all),
        Commands::Build {
            spec,
            source,
            output,
        } => cmd::build::build(&spec, source.as_deref(), &output),
        Commands::Env => cmd::env::env(&config),
    }
}
