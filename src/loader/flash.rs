//! Reading core dumps from device flash

use std::process::Command;

use regex::Regex;
use tracing::{debug, info};

use super::{load_from_bytes, LoadOptions, SnapshotMetadata};
use crate::error::{CoreDumpError, LoaderError, Result};
use crate::format::CoreFormat;
use crate::target::Chip;
use crate::utils::{read_u16_le, read_u32_le};

pub const DEFAULT_PARTITION_TABLE_OFFSET: u32 = 0x8000;
/// Bytes read for the partition table
pub const PARTITION_TABLE_SIZE: u32 = 0xC00;

const PARTITION_ENTRY_SIZE: usize = 32;
const PARTITION_MAGIC: u16 = 0x50AA;
const PARTITION_MD5_MAGIC: u16 = 0xEBEB;
const PARTITION_END_MAGIC: u16 = 0xFFFF;

pub const PARTITION_TYPE_DATA: u8 = 0x01;
pub const PARTITION_SUBTYPE_COREDUMP: u8 = 0x03;

/// One partition table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub kind: u8,
    pub subtype: u8,
    pub offset: u32,
    pub size: u32,
    pub label: String,
}

impl PartitionEntry {
    pub fn is_coredump(&self) -> bool {
        self.kind == PARTITION_TYPE_DATA && self.subtype == PARTITION_SUBTYPE_COREDUMP
    }
}

/// Parse a binary partition table.
///
/// Parsing stops at the first erased entry; MD5 checksum entries are skipped.
pub fn parse_partition_table(data: &[u8]) -> std::result::Result<Vec<PartitionEntry>, LoaderError> {
    let mut entries = Vec::new();

    for (i, raw) in data.chunks_exact(PARTITION_ENTRY_SIZE).enumerate() {
        match read_u16_le(raw, 0) {
            Some(PARTITION_END_MAGIC) => break,
            Some(PARTITION_MD5_MAGIC) => continue,
            Some(PARTITION_MAGIC) => {}
            Some(other) => {
                return Err(LoaderError::InvalidPartitionTable(format!(
                    "entry {} has magic 0x{:04x}",
                    i, other
                )))
            }
            None => break,
        }

        let label = String::from_utf8_lossy(&raw[12..28])
            .trim_end_matches('\0')
            .to_string();
        entries.push(PartitionEntry {
            kind: raw[2],
            subtype: raw[3],
            offset: read_u32_le(raw, 4).unwrap_or(0),
            size: read_u32_le(raw, 8).unwrap_or(0),
            label,
        });
    }

    Ok(entries)
}

/// Access to a device's flash
pub trait FlashReader {
    /// Ask the device which chip it is
    fn detect_target(&mut self) -> Result<Chip>;

    fn read_region(&mut self, offset: u32, len: u32) -> Result<Vec<u8>>;

    fn read_partition_table(&mut self, offset: u32) -> Result<Vec<PartitionEntry>> {
        let data = self.read_region(offset, PARTITION_TABLE_SIZE)?;
        Ok(parse_partition_table(&data)?)
    }
}

/// Locate the core dump in flash, read it and reconstruct the ELF core.
pub fn load_from_flash(
    reader: &mut dyn FlashReader,
    options: &LoadOptions,
) -> Result<SnapshotMetadata> {
    let (offset, limit) = match options.flash_offset {
        Some(offset) => (offset, None),
        None => {
            let table_offset = options
                .partition_table_offset
                .unwrap_or(DEFAULT_PARTITION_TABLE_OFFSET);
            let partitions = reader.read_partition_table(table_offset)?;
            let partition = partitions
                .iter()
                .find(|p| p.is_coredump())
                .ok_or(LoaderError::PartitionNotFound)?;
            info!(
                "Core dump partition '{}' at 0x{:x}, size 0x{:x}",
                partition.label, partition.offset, partition.size
            );
            (partition.offset, Some(partition.size))
        }
    };

    let head = reader.read_region(offset, 4)?;
    let total_len = read_u32_le(&head, 0).ok_or(LoaderError::Truncated {
        needed: 4,
        available: head.len(),
    })?;
    if total_len == 0xFFFF_FFFF {
        return Err(LoaderError::EmptyPartition.into());
    }
    if let Some(limit) = limit {
        if total_len > limit {
            return Err(LoaderError::Truncated {
                needed: total_len as usize,
                available: limit as usize,
            }
            .into());
        }
    }

    debug!("Reading {} bytes of core dump at 0x{:x}", total_len, offset);
    let data = reader.read_region(offset, total_len)?;
    Ok(load_from_bytes(&data, CoreFormat::Raw, options)?)
}

/// [`FlashReader`] that runs `esptool.py`
#[derive(Debug, Clone)]
pub struct EsptoolFlashReader {
    pub esptool: String,
    /// `None` lets esptool detect the chip
    pub chip: Option<Chip>,
    pub port: Option<String>,
    pub baud: u32,
}

impl EsptoolFlashReader {
    pub fn new(esptool: impl Into<String>, chip: Option<Chip>, port: Option<String>, baud: u32) -> Self {
        Self {
            esptool: esptool.into(),
            chip,
            port,
            baud,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.esptool);
        let chip = self.chip.map_or("auto", Chip::name);
        cmd.args(["--chip", chip]);
        if let Some(port) = &self.port {
            cmd.args(["--port", port]);
        }
        cmd.args(["--baud", &self.baud.to_string()]);
        cmd
    }

    fn run(&self, mut cmd: Command) -> Result<String> {
        debug!("Running {:?}", cmd);
        let output = cmd.output().map_err(|e| {
            CoreDumpError::Transport(format!(
                "Failed to run {}: {}. Make sure esptool is installed: pip install esptool",
                self.esptool, e
            ))
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreDumpError::Transport(format!(
                "{} failed ({}):\n{}\n{}",
                self.esptool,
                output.status,
                stderr.trim(),
                stdout.trim()
            )));
        }
        Ok(stdout)
    }
}

/// Chip named in esptool's `Chip is ESP32-C3 (QFN32) (revision v0.4)` line.
///
/// Package names such as `ESP32-D0WD-V3` fall back to the family prefix.
pub fn parse_chip_id_output(output: &str) -> Option<Chip> {
    let re = Regex::new(r"Chip is (ESP32(?:-[A-Z0-9]+)?)").ok()?;
    let name = re.captures(output)?.get(1)?.as_str();
    name.parse()
        .ok()
        .or_else(|| name.split('-').next()?.parse().ok())
}

impl FlashReader for EsptoolFlashReader {
    fn detect_target(&mut self) -> Result<Chip> {
        let mut cmd = self.command();
        cmd.arg("chip_id");
        let output = self.run(cmd)?;
        let chip = parse_chip_id_output(&output).ok_or_else(|| {
            CoreDumpError::Transport("Could not determine the chip type from esptool output".to_string())
        })?;
        info!("Detected chip: {}", chip);
        self.chip = Some(chip);
        Ok(chip)
    }

    fn read_region(&mut self, offset: u32, len: u32) -> Result<Vec<u8>> {
        let temp = tempfile::Builder::new()
            .prefix("esp-coredump-flash-")
            .suffix(".bin")
            .tempfile()?
            .into_temp_path();

        let mut cmd = self.command();
        cmd.arg("read_flash")
            .arg(format!("0x{:x}", offset))
            .arg(format!("0x{:x}", len))
            .arg(&*temp);
        self.run(cmd)?;

        let data = std::fs::read(&temp)?;
        if data.len() < len as usize {
            return Err(CoreDumpError::Transport(format!(
                "Short flash read at 0x{:x}: {} of {} bytes",
                offset,
                data.len(),
                len
            )));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: u8, subtype: u8, offset: u32, size: u32, label: &str) -> Vec<u8> {
        let mut raw = PARTITION_MAGIC.to_le_bytes().to_vec();
        raw.push(kind);
        raw.push(subtype);
        raw.extend_from_slice(&offset.to_le_bytes());
        raw.extend_from_slice(&size.to_le_bytes());
        let mut name = [0u8; 16];
        name[..label.len()].copy_from_slice(label.as_bytes());
        raw.extend_from_slice(&name);
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw
    }

    fn sample_table() -> Vec<u8> {
        let mut table = entry(0x01, 0x02, 0x9000, 0x6000, "nvs");
        table.extend(entry(0x00, 0x00, 0x10000, 0x100000, "factory"));
        table.extend(entry(0x01, 0x03, 0x110000, 0x10000, "coredump"));
        let mut md5 = vec![0xEB, 0xEB];
        md5.resize(PARTITION_ENTRY_SIZE, 0xFF);
        table.extend(md5);
        table.resize(PARTITION_TABLE_SIZE as usize, 0xFF);
        table
    }

    #[test]
    fn test_parse_partition_table() {
        let entries = parse_partition_table(&sample_table()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].label, "nvs");
        let coredump = entries.iter().find(|e| e.is_coredump()).unwrap();
        assert_eq!(coredump.offset, 0x110000);
        assert_eq!(coredump.size, 0x10000);
    }

    #[test]
    fn test_invalid_partition_magic() {
        let mut table = sample_table();
        table[32] = 0x12;
        assert!(matches!(
            parse_partition_table(&table),
            Err(LoaderError::InvalidPartitionTable(_))
        ));
    }

    #[test]
    fn test_parse_chip_id_output() {
        let output = "esptool.py v4.7.0\nDetecting chip type... ESP32-C3\nChip is ESP32-C3 (QFN32) (revision v0.4)\n";
        assert_eq!(parse_chip_id_output(output), Some(Chip::Esp32c3));
        assert_eq!(
            parse_chip_id_output("Chip is ESP32-D0WD-V3 (revision v3.0)"),
            Some(Chip::Esp32)
        );
        assert_eq!(parse_chip_id_output("Chip is ESP32 (revision 1)"), Some(Chip::Esp32));
        assert_eq!(parse_chip_id_output("no chip here"), None);
    }

    struct ErasedFlash;

    impl FlashReader for ErasedFlash {
        fn detect_target(&mut self) -> Result<Chip> {
            Ok(Chip::Esp32)
        }

        fn read_region(&mut self, offset: u32, len: u32) -> Result<Vec<u8>> {
            if offset == DEFAULT_PARTITION_TABLE_OFFSET {
                Ok(sample_table())
            } else {
                Ok(vec![0xFF; len as usize])
            }
        }
    }

    #[test]
    fn test_empty_partition() {
        let result = load_from_flash(&mut ErasedFlash, &LoadOptions::default());
        assert!(matches!(
            result,
            Err(CoreDumpError::Snapshot(LoaderError::EmptyPartition))
        ));
    }

    #[test]
    fn test_partition_not_found() {
        let options = LoadOptions {
            partition_table_offset: Some(0x9000),
            ..Default::default()
        };
        // An all-0xFF table has no entries
        let result = load_from_flash(&mut ErasedFlash, &options);
        assert!(matches!(
            result,
            Err(CoreDumpError::Snapshot(LoaderError::PartitionNotFound))
        ));
    }
}
