//! Error types for the core dump engine

use thiserror::Error;

/// Main error type for the core dump engine
#[derive(Error, Debug)]
pub enum CoreDumpError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Failed to load core dump: {0}")]
    Snapshot(#[from] LoaderError),

    #[error("Cannot acquire core dump from the device: {0}")]
    Transport(String),

    #[error("Architecture mismatch: program targets machine {program}, core dump targets machine {core}")]
    ArchitectureMismatch { program: u16, core: u16 },

    #[error("GDB executable '{name}' could not be resolved")]
    DebuggerUnavailable { name: String, guidance: String },

    #[error("GDB error: {0}")]
    Gdb(#[from] GdbError),

    #[error("Invalid ELF image: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreDumpError {
    /// Extended diagnostic text shown below the error message, if any
    pub fn details(&self) -> Option<String> {
        match self {
            CoreDumpError::Snapshot(e) => e.details(),
            CoreDumpError::Transport(_) => Some(
                "Specify the chip with --chip and the serial port with --port explicitly".to_string(),
            ),
            CoreDumpError::DebuggerUnavailable { guidance, .. } => Some(guidance.clone()),
            CoreDumpError::Gdb(GdbError::NoResponse { observed, .. }) => Some(observed.clone()),
            _ => None,
        }
    }
}

impl From<goblin::error::Error> for CoreDumpError {
    fn from(error: goblin::error::Error) -> Self {
        CoreDumpError::Image(error.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CoreDumpError>;

/// Snapshot decoding and reconstruction errors
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Malformed core dump encoding")]
    MalformedEncoding { details: String },

    #[error("Unsupported core dump version 0x{0:08x}")]
    UnsupportedVersion(u32),

    #[error("Core dump checksum mismatch (expected {expected}, computed {computed})")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("Truncated core dump: {needed} bytes declared, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Core dump partition not found in the partition table")]
    PartitionNotFound,

    #[error("Core dump partition is empty")]
    EmptyPartition,

    #[error("Invalid partition table: {0}")]
    InvalidPartitionTable(String),

    #[error("Failed to read registers: {0}")]
    Arch(#[from] ArchError),

    #[error("Failed to write core file: {0}")]
    Io(#[from] std::io::Error),
}

impl LoaderError {
    /// Decoder diagnostics carried along with the error
    pub fn details(&self) -> Option<String> {
        match self {
            LoaderError::MalformedEncoding { details } => Some(details.clone()),
            _ => None,
        }
    }
}

/// Architecture adapter errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArchError {
    #[error("Growing up stacks are not supported")]
    UnsupportedStackGrowth,

    #[error("Stack is too small to hold a frame: {have} bytes, need {need}")]
    StackTooSmall { have: usize, need: usize },
}

/// GDB/MI protocol errors
#[derive(Error, Debug)]
pub enum GdbError {
    #[error("No response with message '{message}' and type '{kind}' to '{command}'")]
    NoResponse {
        command: String,
        message: String,
        kind: String,
        observed: String,
    },

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Field '{0}' missing from GDB response")]
    MissingField(String),

    #[error("Invalid GDB thread id '{0}'")]
    InvalidThreadId(String),

    #[error("GDB session is terminated")]
    Terminated,

    #[error("Failed to launch GDB: {0}")]
    LaunchFailed(String),

    #[error("GDB pipe error: {0}")]
    Pipe(#[from] std::io::Error),
}
