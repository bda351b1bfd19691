//! Supported chips and their per-target constants

use std::fmt;
use std::str::FromStr;

/// ELF machine type for Xtensa cores
pub const EM_XTENSA: u16 = 94;
/// ELF machine type for RISC-V cores
pub const EM_RISCV: u16 = 243;

/// CPU family of a chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchFamily {
    Xtensa,
    RiscV,
}

impl ArchFamily {
    /// ELF `e_machine` value for this family
    pub fn machine(self) -> u16 {
        match self {
            ArchFamily::Xtensa => EM_XTENSA,
            ArchFamily::RiscV => EM_RISCV,
        }
    }

    /// Map an ELF `e_machine` value back to a family
    pub fn from_machine(machine: u16) -> Option<Self> {
        match machine {
            EM_XTENSA => Some(ArchFamily::Xtensa),
            EM_RISCV => Some(ArchFamily::RiscV),
            _ => None,
        }
    }

    /// Name of the GDB executable able to debug this family
    pub fn gdb_name(self) -> &'static str {
        match self {
            // xtensa-esp32s2-elf-gdb misreports some frames, the esp32 build handles every Xtensa chip
            ArchFamily::Xtensa => "xtensa-esp32-elf-gdb",
            ArchFamily::RiscV => "riscv32-esp-elf-gdb",
        }
    }
}

/// Chips whose core dumps can be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chip {
    Esp32,
    Esp32s2,
    Esp32s3,
    Esp32c2,
    Esp32c3,
    Esp32c6,
    Esp32h2,
    Esp32p4,
}

impl Chip {
    pub const ALL: [Chip; 8] = [
        Chip::Esp32,
        Chip::Esp32s2,
        Chip::Esp32s3,
        Chip::Esp32c2,
        Chip::Esp32c3,
        Chip::Esp32c6,
        Chip::Esp32h2,
        Chip::Esp32p4,
    ];

    /// Chip id as stored in the upper half of the core dump version word
    pub fn chip_id(self) -> u16 {
        match self {
            Chip::Esp32 => 0,
            Chip::Esp32s2 => 2,
            Chip::Esp32c3 => 5,
            Chip::Esp32s3 => 9,
            Chip::Esp32c2 => 12,
            Chip::Esp32c6 => 13,
            Chip::Esp32h2 => 16,
            Chip::Esp32p4 => 18,
        }
    }

    pub fn from_chip_id(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.chip_id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Chip::Esp32 => "esp32",
            Chip::Esp32s2 => "esp32s2",
            Chip::Esp32s3 => "esp32s3",
            Chip::Esp32c2 => "esp32c2",
            Chip::Esp32c3 => "esp32c3",
            Chip::Esp32c6 => "esp32c6",
            Chip::Esp32h2 => "esp32h2",
            Chip::Esp32p4 => "esp32p4",
        }
    }

    pub fn family(self) -> ArchFamily {
        match self {
            Chip::Esp32 | Chip::Esp32s2 | Chip::Esp32s3 => ArchFamily::Xtensa,
            _ => ArchFamily::RiscV,
        }
    }

    /// Data RAM address range `[low, high)` where TCBs and stacks live
    pub fn dram_range(self) -> (u32, u32) {
        match self {
            Chip::Esp32 => (0x3ffa_e000, 0x4000_0000),
            Chip::Esp32s2 => (0x3ffb_0000, 0x4000_0000),
            Chip::Esp32s3 => (0x3fc8_8000, 0x3fd0_0000),
            Chip::Esp32c2 => (0x3fca_0000, 0x3fce_0000),
            Chip::Esp32c3 => (0x3fc8_0000, 0x3fce_0000),
            Chip::Esp32c6 => (0x4080_0000, 0x4088_0000),
            Chip::Esp32h2 => (0x4080_0000, 0x4085_0000),
            Chip::Esp32p4 => (0x4ff0_0000, 0x4ffc_0000),
        }
    }

    /// RTC memory ranges `[low, high)` that can also hold task data
    pub fn rtc_ranges(self) -> &'static [(u32, u32)] {
        match self {
            // RTC_DRAM and RTC_DATA
            Chip::Esp32 => &[(0x3ff8_0000, 0x3ff8_2000), (0x5000_0000, 0x5000_2000)],
            Chip::Esp32s2 => &[(0x3ff9_e000, 0x3ffa_0000), (0x5000_0000, 0x5000_2000)],
            Chip::Esp32s3 => &[(0x600f_e000, 0x6010_0000), (0x5000_0000, 0x5000_2000)],
            Chip::Esp32c6 => &[(0x5000_0000, 0x5000_4000)],
            _ => &[],
        }
    }

    /// Whether `[addr, addr + size)` lies in memory that can hold task data
    pub fn is_task_memory(self, addr: u32, size: u32) -> bool {
        let end = addr as u64 + size as u64;
        let within = |&(low, high): &(u32, u32)| addr >= low && end <= high as u64;
        within(&self.dram_range()) || self.rtc_ranges().iter().any(within)
    }

    /// Default ROM ELF file name for this chip
    pub fn rom_elf_name(self) -> String {
        format!("{}_rom.elf", self.name())
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Chip {
    type Err = String;

    /// Accepts `esp32c3`, `ESP32-C3` and similar spellings
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', '_'], "");
        Self::ALL
            .into_iter()
            .find(|c| c.name() == normalized)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|c| c.name()).collect();
                format!("Unsupported chip '{}'. Supported chips: {}", s, names.join(", "))
            })
    }
}
