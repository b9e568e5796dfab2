//! fleet-core CLI entry point.
//!
//! ## CLI Subcommands
//!
//! - `fleet-core-cli simulate [N]` - Run N in-process instances (default 3)
//! - `fleet-core-cli config show|defaults|validate` - Inspect configuration
//! - `fleet-core-cli version` - Print version
//! - `fleet-core-cli help [COMMAND]` - Print usage

use std::process::ExitCode;

use fleet_core::cli::{config_cmd, run_simulate};
use fleet_core::config as fleet_config;
use fleet_core::telemetry::init_logging;

const DEFAULT_SIMULATED_INSTANCES: usize = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match command {
        "simulate" => {
            let instances = match args.get(2) {
                Some(raw) => match raw.parse::<usize>() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("Invalid instance count: {}", raw);
                        print_command_help("simulate");
                        return ExitCode::from(2u8);
                    }
                },
                None => DEFAULT_SIMULATED_INSTANCES,
            };
            ExitCode::from(simulate(instances).await as u8)
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    config_cmd::run_show();
                    ExitCode::SUCCESS
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => {
                    let code = config_cmd::run_validate();
                    ExitCode::from(code as u8)
                }
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("fleet-core {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

async fn simulate(instances: usize) -> i32 {
    let env = fleet_config::load();
    if let Err(e) = init_logging(&env.log) {
        eprintln!("Logging setup failed: {}", e);
        return 2;
    }

    let report = tokio::select! {
        result = run_simulate(instances, &env) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            return 1;
        }
    };

    match report {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(text) => {
                println!("{}", text);
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Err(e) => {
            eprintln!("Simulation failed: {}", e);
            1
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "fleet-core - fleet coordination core v{}

USAGE:
    fleet-core-cli [COMMAND] [OPTIONS]

COMMANDS:
    simulate     Run an in-process fleet and one client handshake
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

EXAMPLES:
    fleet-core-cli simulate          # three instances
    fleet-core-cli simulate 5        # five instances
    fleet-core-cli config validate   # check FLEET_CORE_* variables

ENVIRONMENT:
    FLEET_CORE_JOB_ID            Job id of this instance (default: random uuid)
    FLEET_CORE_KEY_TIMEOUT       Channel key idle timeout in seconds (default: 600)
    FLEET_CORE_MAX_MESSAGE_SIZE  Wire message limit in bytes (default: 65536)
    FLEET_CORE_HUB_CAPACITY      In-process hub buffer (default: 1024)
    FLEET_CORE_LOG_FORMAT        json or pretty (default: json)
    FLEET_CORE_LOG_LEVEL         Log filter directive (default: info)
    FLEET_CORE_LOG_FILE          Write logs to this file (default: stderr)

EXIT CODES:
    0  Success
    1  Failure
    2  Usage or configuration error
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "simulate" => {
            eprintln!(
                "fleet-core-cli simulate - Run an in-process fleet

USAGE:
    fleet-core-cli simulate [N]

DESCRIPTION:
    Starts N instances (default 3) on a shared in-process hub. The first
    instance announces itself and collects pongs from the others, then a
    simulated client fetches channel keys, verifies, and reads settings.
    The report is printed as JSON on stdout.
"
            );
        }
        "config" => {
            eprintln!(
                "fleet-core-cli config - Inspect configuration

USAGE:
    fleet-core-cli config <SUBCOMMAND>

SUBCOMMANDS:
    show           Show effective configuration
    defaults       Show default configuration
    validate       Warn about values that fall back to defaults or floors
"
            );
        }
        _ => {
            eprintln!(
                "No detailed help available for '{}'. Use 'fleet-core-cli help' for general usage.",
                command
            );
        }
    }
}
