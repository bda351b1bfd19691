//! RISC-V adapter: esp32c2, esp32c3, esp32c6, esp32h2, esp32p4

use std::fmt::Write as _;

use super::{ArchAdapter, ExtraRegisters};
use crate::error::ArchError;
use crate::image::ExtraInfo;
use crate::target::EM_RISCV;
use crate::utils::words_le;

pub const GP_REGS_COUNT: usize = 32;
pub const PRSTATUS_SIZE: usize = 204;

pub const MSTATUS_REGNO: u32 = 0x300;
pub const MTVEC_REGNO: u32 = 0x305;
pub const MCAUSE_REGNO: u32 = 0x342;
pub const MTVAL_REGNO: u32 = 0x343;
pub const MHARTID_REGNO: u32 = 0xf14;

/// `EXTRA_INFO` layout: `[tcb, isr_flag, (regno, value)...]`
const ISR_FLAG_WORD: usize = 1;
const FIRST_PAIR_WORD: usize = 2;

/// Load/store architecture adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct RiscvAdapter;

impl ArchAdapter for RiscvAdapter {
    fn name(&self) -> &'static str {
        "riscv"
    }

    fn machine(&self) -> u16 {
        EM_RISCV
    }

    fn extract_registers(
        &self,
        stack: &[u8],
        grows_down: bool,
    ) -> Result<(Vec<u32>, Option<ExtraRegisters>), ArchError> {
        if !grows_down {
            return Err(ArchError::UnsupportedStackGrowth);
        }
        let need = GP_REGS_COUNT * 4;
        if stack.len() < need {
            return Err(ArchError::StackTooSmall {
                have: stack.len(),
                need,
            });
        }
        // The frame is the register file itself, pc in place of x0
        Ok((words_le(&stack[..need]), None))
    }

    fn status_record_size(&self) -> usize {
        PRSTATUS_SIZE
    }

    fn build_extra_info(&self, tcb_address: u32, extra: &[(u32, u32)]) -> ExtraInfo {
        let mut words = vec![tcb_address, 0];
        for &(regno, value) in extra {
            words.push(regno);
            words.push(value);
        }
        ExtraInfo::new(words)
    }

    fn isr_context(&self, extra: &ExtraInfo) -> Option<bool> {
        extra.get(ISR_FLAG_WORD).map(|flag| flag != 0)
    }

    fn exception_summary(&self, extra: Option<&ExtraInfo>) -> Option<String> {
        let extra = extra?;
        let mut out = String::new();
        for (name, regno) in [
            ("mstatus", MSTATUS_REGNO),
            ("mtvec", MTVEC_REGNO),
            ("mcause", MCAUSE_REGNO),
            ("mtval", MTVAL_REGNO),
            ("mhartid", MHARTID_REGNO),
        ] {
            if let Some(value) = extra.register(FIRST_PAIR_WORD, regno) {
                let _ = writeln!(out, "{:<15}0x{:x}", name, value);
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out.trim_end().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_read_directly() {
        let stack: Vec<u8> = (0..40u32).flat_map(|w| (0x100 + w).to_le_bytes()).collect();
        let (regs, extra) = RiscvAdapter.extract_registers(&stack, true).unwrap();
        assert_eq!(regs.len(), GP_REGS_COUNT);
        assert_eq!(regs[0], 0x100); // pc
        assert_eq!(regs[31], 0x11f);
        assert!(extra.is_none());
    }

    #[test]
    fn test_errors() {
        let stack = vec![0u8; 256];
        assert_eq!(
            RiscvAdapter.extract_registers(&stack, false),
            Err(ArchError::UnsupportedStackGrowth)
        );
        assert_eq!(
            RiscvAdapter.extract_registers(&stack[..64], true),
            Err(ArchError::StackTooSmall { have: 64, need: 128 })
        );
    }

    #[test]
    fn test_status_record() {
        let regs: Vec<u32> = (0..32).collect();
        let record = RiscvAdapter.build_status_record(0x3fc8_b2c0, &regs);
        assert_eq!(record.len(), PRSTATUS_SIZE);
        assert_eq!(&record[72 + 31 * 4..72 + 32 * 4], &31u32.to_le_bytes());
        assert!(record[200..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_extra_info_layout_and_summary() {
        let info = RiscvAdapter.build_extra_info(
            0x3fc8_b2c0,
            &[(MCAUSE_REGNO, 7), (MTVAL_REGNO, 0x10)],
        );
        assert_eq!(info.words(), &[0x3fc8_b2c0, 0, MCAUSE_REGNO, 7, MTVAL_REGNO, 0x10]);
        assert_eq!(RiscvAdapter.isr_context(&info), Some(false));

        let summary = RiscvAdapter.exception_summary(Some(&info)).unwrap();
        assert_eq!(summary, "mcause         0x7\nmtval          0x10");
        assert_eq!(RiscvAdapter.exception_summary(None), None);
    }
}
