//! Command line and configuration file handling

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::error::{CoreDumpError, Result};
use crate::format::CoreFormat;
use crate::gdb::DEFAULT_GDB_TIMEOUT_SEC;
use crate::loader::flash::DEFAULT_PARTITION_TABLE_OFFSET;
use crate::target::Chip;
use crate::utils::parse_int;

/// Default esptool baud rate
pub const DEFAULT_BAUD: u32 = 115_200;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "esp-coredump")]
#[command(about = "ESP32 core dump utility: decode core dumps and print crash reports")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); `[logging] level` when omitted
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Target chip type, or "auto"
    #[arg(long, env = "ESPTOOL_CHIP")]
    pub chip: Option<String>,

    /// Serial port device
    #[arg(short, long, env = "ESPTOOL_PORT")]
    pub port: Option<String>,

    /// Serial port baud rate used when reading flash
    #[arg(short, long, env = "ESPTOOL_BAUD")]
    pub baud: Option<u32>,

    /// Timeout for each GDB response in seconds
    #[arg(long)]
    pub gdb_timeout_sec: Option<u64>,

    /// Print the default configuration file and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub show_config: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a GDB debugging session with the core dump
    #[command(alias = "dbg_corefile")]
    DbgCorefile(CommonArgs),

    /// Print core dump information
    #[command(alias = "info_corefile")]
    InfoCorefile(InfoArgs),
}

impl Command {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Command::DbgCorefile(common) => common,
            Command::InfoCorefile(info) => &info.common,
        }
    }
}

/// Options shared by both operations
#[derive(clap::Args, Debug, Clone)]
pub struct CommonArgs {
    /// Verbosity, 0 (errors only) to 4 (trace)
    #[arg(short, long)]
    pub debug: Option<u8>,

    /// Path to gdb
    #[arg(short, long)]
    pub gdb: Option<String>,

    /// Path to an additional gdbinit file
    #[arg(long)]
    pub extra_gdbinit_file: Option<PathBuf>,

    /// Core dump file; read from flash when omitted
    #[arg(short, long)]
    pub core: Option<PathBuf>,

    /// Encoding of the file given with --core
    #[arg(short = 't', long, value_enum, default_value_t = CoreFormat::Auto)]
    pub core_format: CoreFormat,

    /// Offset of the core dump partition in flash
    #[arg(short, long, value_parser = parse_int)]
    pub off: Option<u32>,

    /// Save the reconstructed core to this file
    #[arg(short, long)]
    pub save_core: Option<PathBuf>,

    /// Path to the ROM ELF file, "<target>_rom.elf" by default
    #[arg(short, long)]
    pub rom_elf: Option<PathBuf>,

    /// Path to the program's ELF binary
    pub prog: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct InfoArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Print the contents of every captured memory segment
    #[arg(short = 'm', long)]
    pub print_mem: bool,
}

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub gdb: GdbConfig,
    pub esptool: EsptoolConfig,
    pub flash: FlashConfig,
    pub rom: RomConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file or create default
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let content = std::fs::read_to_string(path).map_err(|e| {
                CoreDumpError::Configuration(format!("Failed to read config file: {}", e))
            })?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| CoreDumpError::Configuration(format!("Invalid TOML syntax: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Merge command line arguments into configuration
    pub fn merge_args(&mut self, args: &Args) {
        if let Some(chip) = &args.chip {
            self.esptool.chip = chip.clone();
        }
        if let Some(port) = &args.port {
            self.esptool.port = Some(port.clone());
        }
        if let Some(baud) = args.baud {
            self.esptool.baud = baud;
        }
        if let Some(timeout) = args.gdb_timeout_sec {
            self.gdb.timeout_sec = timeout;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.log_file.is_some() {
            self.logging.file = args.log_file.clone();
        }

        if let Some(command) = &args.command {
            let common = command.common();
            if let Some(gdb) = &common.gdb {
                self.gdb.path = Some(gdb.clone());
            }
            if let Some(init) = &common.extra_gdbinit_file {
                self.gdb.extra_gdbinit_file = Some(init.clone());
            }
            if let Some(off) = common.off {
                self.flash.coredump_offset = Some(off);
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.gdb.timeout_sec == 0 {
            return Err(CoreDumpError::Configuration(
                "gdb.timeout_sec must be > 0".to_string(),
            ));
        }
        if self.esptool.baud == 0 {
            return Err(CoreDumpError::Configuration(
                "esptool.baud must be > 0".to_string(),
            ));
        }
        self.esptool.chip()?;
        Ok(())
    }

    /// Generate TOML configuration string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            CoreDumpError::Configuration(format!("Failed to serialize config: {}", e))
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GdbConfig {
    /// GDB executable; picked from the target architecture when unset
    pub path: Option<String>,
    pub timeout_sec: u64,
    /// Loaded with `-x` instead of passing `--nx`
    pub extra_gdbinit_file: Option<PathBuf>,
}

impl Default for GdbConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout_sec: DEFAULT_GDB_TIMEOUT_SEC,
            extra_gdbinit_file: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EsptoolConfig {
    pub path: String,
    pub chip: String,
    pub port: Option<String>,
    pub baud: u32,
}

impl EsptoolConfig {
    /// Chip forced by the configuration; `None` for "auto"
    pub fn chip(&self) -> Result<Option<Chip>> {
        if self.chip.eq_ignore_ascii_case("auto") {
            return Ok(None);
        }
        self.chip
            .parse()
            .map(Some)
            .map_err(CoreDumpError::Configuration)
    }
}

impl Default for EsptoolConfig {
    fn default() -> Self {
        Self {
            path: "esptool.py".to_string(),
            chip: "auto".to_string(),
            port: None,
            baud: DEFAULT_BAUD,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FlashConfig {
    pub partition_table_offset: u32,
    /// Read the core dump here instead of looking up the partition table
    pub coredump_offset: Option<u32>,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            partition_table_offset: DEFAULT_PARTITION_TABLE_OFFSET,
            coredump_offset: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RomConfig {
    /// Directory searched for `<target>_rom.elf`
    pub elf_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}
