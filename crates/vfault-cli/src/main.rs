//! # vfault CLI
//!
//! Inspect configuration and push synthetic faults through the handler chain.

use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use vfault_config::logging::{init_logging, LogLevel};
use vfault_core::ExceptionCode;

mod simulate;

/// vfault - hardware fault translation diagnostics
#[derive(Parser)]
#[command(name = "vfault")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// List the exception codes the runtime claims
    Codes,

    /// Deliver one synthetic fault and report what the runtime did with it
    Simulate(simulate::SimulateArgs),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file locations
    Path,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    });

    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", vfault_config::config().to_toml());
                Ok(())
            }
            ConfigCommands::Path => {
                match vfault_config::Config::global_config_path() {
                    Some(path) => println!("Global:  {}", path.display()),
                    None => println!("Global:  (no home directory)"),
                }
                println!("Project: {}", Path::new(".vfault/config.toml").display());
                Ok(())
            }
        },
        Commands::Codes => {
            cmd_codes();
            Ok(())
        }
        Commands::Simulate(args) => {
            let config = vfault_config::config().clone();
            let outcome = simulate::run(&args, config)?;
            vfault_config::log_cli_debug!(
                "Simulation finished",
                outcome = tracing::field::debug(&outcome),
            );
            std::process::exit(outcome.exit_code());
        }
    }
}

fn cmd_codes() {
    println!("{:<12} {:<32} KIND", "CODE", "NAME");
    for code in ExceptionCode::RECOGNIZED {
        let kind = match code {
            ExceptionCode::ACCESS_VIOLATION => "memory",
            ExceptionCode::BREAKPOINT => "abort",
            ExceptionCode::ILLEGAL_INSTRUCTION => "instruction",
            code if code.is_float_trap() => "float",
            _ => "integer",
        };
        println!(
            "{:<12} {:<32} {}",
            format!("{:#x}", code.raw()),
            code.name().unwrap_or("?"),
            kind
        );
    }
}
