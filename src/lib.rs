//! ESP32 core dump engine
//!
//! Decodes the core dumps ESP-IDF firmware writes to flash or prints on the
//! console, reconstructs them into ELF core files and drives GDB over its MI
//! interface to print a crash report for Xtensa and RISC-V chips.

pub mod arch;
pub mod config;
pub mod coredump;
pub mod error;
pub mod format;
pub mod gdb;
pub mod image;
pub mod loader;
pub mod regions;
pub mod report;
pub mod target;
pub mod utils;

pub use config::Config;
pub use coredump::{CoreDump, CoreDumpOptions};
pub use error::{CoreDumpError, Result};
pub use format::CoreFormat;
pub use target::Chip;
