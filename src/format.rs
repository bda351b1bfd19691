//! Core dump encoding detection

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::loader::parse_version_word;
use crate::target::Chip;
use crate::utils::read_u32_le;

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// Encoding of a core dump file
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreFormat {
    /// Detect from the file contents
    Auto,
    /// ELF core file
    Elf,
    /// Raw binary dump as stored in flash
    Raw,
    /// Base64 text printed on the console
    #[value(name = "b64")]
    #[serde(rename = "b64")]
    Base64,
}

impl fmt::Display for CoreFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoreFormat::Auto => "auto",
            CoreFormat::Elf => "elf",
            CoreFormat::Raw => "raw",
            CoreFormat::Base64 => "b64",
        };
        f.write_str(name)
    }
}

/// Outcome of [`detect_format`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub format: CoreFormat,
    /// Chip named by a raw header
    pub target: Option<Chip>,
}

/// Classify a core dump by its first bytes.
///
/// Anything that is neither ELF nor a raw dump with a known version word is
/// assumed to be base64; decoding errors surface later in the loader.
pub fn detect_format(data: &[u8]) -> Detection {
    if data.starts_with(ELF_MAGIC) {
        return Detection {
            format: CoreFormat::Elf,
            target: None,
        };
    }

    if let Some((chip, _)) = read_u32_le(data, 4).and_then(parse_version_word) {
        return Detection {
            format: CoreFormat::Raw,
            target: Some(chip),
        };
    }

    Detection {
        format: CoreFormat::Base64,
        target: None,
    }
}
