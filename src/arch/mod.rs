//! Per-CPU-family register extraction and status record layout

pub mod riscv;
pub mod xtensa;

use crate::error::ArchError;
use crate::image::ExtraInfo;
use crate::target::{ArchFamily, Chip};

pub use riscv::RiscvAdapter;
pub use xtensa::XtensaAdapter;

/// `(register number, value)` pairs captured alongside the general registers
pub type ExtraRegisters = Vec<(u32, u32)>;

/// Offset of `pr_cursig` in `elf_prstatus`
pub const PRSTATUS_OFFSET_PR_CURSIG: usize = 12;
/// Offset of `pr_pid` in `elf_prstatus`
pub const PRSTATUS_OFFSET_PR_PID: usize = 24;
/// Offset of `pr_reg` in `elf_prstatus`
pub const PRSTATUS_OFFSET_PR_REG: usize = 72;

/// Knows how one CPU family saves registers on a task stack and how GDB
/// expects them in a core file.
pub trait ArchAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// ELF `e_machine` of cores built by this adapter
    fn machine(&self) -> u16;

    /// Decode the frame saved at the top of `stack`
    fn extract_registers(
        &self,
        stack: &[u8],
        grows_down: bool,
    ) -> Result<(Vec<u32>, Option<ExtraRegisters>), ArchError>;

    /// Size of the `NT_PRSTATUS` descriptor
    fn status_record_size(&self) -> usize;

    /// Build the `NT_PRSTATUS` descriptor for one task
    fn build_status_record(&self, tcb_address: u32, registers: &[u32]) -> Vec<u8> {
        let mut record = vec![0u8; self.status_record_size()];
        // pr_cursig stays 0: the core carries no signal
        record[PRSTATUS_OFFSET_PR_CURSIG..PRSTATUS_OFFSET_PR_CURSIG + 2]
            .copy_from_slice(&0u16.to_le_bytes());
        record[PRSTATUS_OFFSET_PR_PID..PRSTATUS_OFFSET_PR_PID + 4]
            .copy_from_slice(&tcb_address.to_le_bytes());
        let capacity = (record.len() - PRSTATUS_OFFSET_PR_REG) / 4;
        for (i, reg) in registers.iter().take(capacity).enumerate() {
            let off = PRSTATUS_OFFSET_PR_REG + i * 4;
            record[off..off + 4].copy_from_slice(&reg.to_le_bytes());
        }
        record
    }

    /// Words of the `EXTRA_INFO` note for the crashed task
    fn build_extra_info(&self, tcb_address: u32, extra: &[(u32, u32)]) -> ExtraInfo {
        let mut words = vec![tcb_address];
        for &(regno, value) in extra {
            words.push(regno);
            words.push(value);
        }
        ExtraInfo::new(words)
    }

    /// Whether the crash happened in interrupt context, when recorded
    fn isr_context(&self, extra: &ExtraInfo) -> Option<bool>;

    /// Human-readable exception register lines for the report
    fn exception_summary(&self, extra: Option<&ExtraInfo>) -> Option<String>;
}

/// Adapter for a chip's CPU family
pub fn for_chip(chip: Chip) -> Box<dyn ArchAdapter> {
    for_family(chip.family())
}

/// Adapter for an ELF `e_machine`, if the machine is supported
pub fn for_machine(machine: u16) -> Option<Box<dyn ArchAdapter>> {
    ArchFamily::from_machine(machine).map(for_family)
}

fn for_family(family: ArchFamily) -> Box<dyn ArchAdapter> {
    match family {
        ArchFamily::Xtensa => Box::new(XtensaAdapter),
        ArchFamily::RiscV => Box::new(RiscvAdapter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{EM_RISCV, EM_XTENSA};

    #[test]
    fn test_adapter_selection() {
        assert_eq!(for_chip(Chip::Esp32s3).machine(), EM_XTENSA);
        assert_eq!(for_chip(Chip::Esp32c6).machine(), EM_RISCV);
        assert_eq!(for_machine(EM_RISCV).unwrap().name(), "riscv");
        assert!(for_machine(40).is_none());
    }

    #[test]
    fn test_status_record_header_fields() {
        let adapter = for_chip(Chip::Esp32c3);
        let record = adapter.build_status_record(0x3fc8_b2c0, &[0x4200_1234, 0x11]);
        assert_eq!(record.len(), adapter.status_record_size());
        assert_eq!(&record[12..14], &[0, 0]);
        assert_eq!(&record[24..28], &0x3fc8_b2c0u32.to_le_bytes());
        assert_eq!(&record[72..76], &0x4200_1234u32.to_le_bytes());
        assert_eq!(&record[76..80], &0x11u32.to_le_bytes());
    }
}
