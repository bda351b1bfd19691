//! esp-coredump - Main Entry Point

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

use esp_coredump::{
    config::{Args, Command, LoggingConfig},
    Config, CoreDump, CoreDumpError, CoreDumpOptions,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.generate_config {
        return match Config::default().to_toml() {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                print_error(&e);
                ExitCode::FAILURE
            }
        };
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            print_error(&e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&args, &config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> esp_coredump::Result<Config> {
    let mut config = Config::load(args.config.as_ref())?;
    config.merge_args(args);
    config.validate()?;
    Ok(config)
}

async fn run(args: Args, config: Config) -> esp_coredump::Result<()> {
    info!("esp-coredump v{}", env!("CARGO_PKG_VERSION"));
    debug!("Command line args: {:?}", args);

    if args.show_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    let Some(command) = args.command else {
        return Err(CoreDumpError::Configuration(
            "No operation given, use dbg-corefile or info-corefile".to_string(),
        ));
    };

    let (common, print_mem) = match command {
        Command::DbgCorefile(common) => (common, None),
        Command::InfoCorefile(info) => (info.common, Some(info.print_mem)),
    };
    let options = CoreDumpOptions {
        prog: Some(common.prog),
        core: common.core,
        core_format: Some(common.core_format),
        save_core: common.save_core,
        rom_elf: common.rom_elf,
        print_mem: print_mem.unwrap_or(false),
    };
    let mut dump = CoreDump::new(config, options)?;

    match print_mem {
        None => dump.dbg_corefile().await,
        Some(_) => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            dump.info_corefile(&mut out).await?;
            out.flush()?;
            Ok(())
        }
    }
}

/// Log level for the `--debug` verbosity number
fn debug_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// `--debug` wins over the configured level
fn log_level<'a>(args: &Args, logging: &'a LoggingConfig) -> &'a str {
    args.command
        .as_ref()
        .and_then(|c| c.common().debug)
        .map(debug_level)
        .unwrap_or(logging.level.as_str())
}

/// Initialize logging system
fn init_logging(args: &Args, logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let level = log_level(args, logging);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    // Report output owns stdout
    if let Some(log_file) = &logging.file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        subscriber.with_ansi(false).with_writer(file).init();
    } else {
        subscriber.with_writer(std::io::stderr).init();
    }

    debug!("Logging initialized with level: {}", level);
    Ok(())
}

fn print_error(e: &CoreDumpError) {
    eprintln!("A fatal error occurred: {}", e);
    if let Some(details) = e.details() {
        eprintln!("{}", boxed(&details));
    }
}

/// Frame multi-line diagnostics so they stand out from the log
fn boxed(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let rule = format!("    +{}+", "-".repeat(width + 2));

    let mut out = vec![rule.clone()];
    for line in &lines {
        out.push(format!("    | {:<width$} |", line, width = width));
    }
    out.push(rule);
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from([
            "esp-coredump",
            "--log-level",
            "debug",
            "info-corefile",
            "--core",
            "core.bin",
            "--core-format",
            "raw",
            "app.elf",
        ]);

        assert_eq!(args.log_level.as_deref(), Some("debug"));
        let common = args.command.as_ref().unwrap().common();
        assert_eq!(common.core_format, esp_coredump::CoreFormat::Raw);
        assert_eq!(common.core.as_deref(), Some(std::path::Path::new("core.bin")));
    }

    #[test]
    fn test_debug_levels() {
        assert_eq!(debug_level(0), "error");
        assert_eq!(debug_level(2), "info");
        assert_eq!(debug_level(4), "trace");
        assert_eq!(debug_level(9), "trace");
    }

    #[test]
    fn test_log_level_sources() {
        let logging = LoggingConfig {
            level: "warn".to_string(),
            file: None,
        };
        let args = Args::parse_from(["esp-coredump", "info-corefile", "app.elf"]);
        assert_eq!(log_level(&args, &logging), "warn");

        let args = Args::parse_from(["esp-coredump", "info-corefile", "-d", "3", "app.elf"]);
        assert_eq!(log_level(&args, &logging), "debug");
    }

    #[test]
    fn test_boxed_details() {
        let text = boxed("line 3: Invalid symbol 46\nat offset 12");
        assert_eq!(
            text,
            "    +---------------------------+\n    \
             | line 3: Invalid symbol 46 |\n    \
             | at offset 12              |\n    \
             +---------------------------+"
        );
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.esptool.chip, "auto");
    }
}
