//! Xtensa (register window) adapter: esp32, esp32s2, esp32s3

use std::fmt::Write as _;

use super::{ArchAdapter, ExtraRegisters, PRSTATUS_OFFSET_PR_REG};
use crate::error::ArchError;
use crate::image::ExtraInfo;
use crate::target::EM_XTENSA;
use crate::utils::words_le;

/// Words in an `XtExcFrame`
pub const EXC_FRAME_WORDS: usize = 25;

/// Words in `xtensa_gregset_t`
pub const GREGSET_WORDS: usize = 128;

pub const REG_PC_IDX: usize = 0;
pub const REG_PS_IDX: usize = 1;
pub const REG_LB_IDX: usize = 2;
pub const REG_LE_IDX: usize = 3;
pub const REG_LC_IDX: usize = 4;
pub const REG_SAR_IDX: usize = 5;
pub const REG_AR_START_IDX: usize = 64;

/// Special register numbers used in `EXTRA_INFO`
pub const EXCCAUSE_REGNO: u32 = 232;
pub const EXCVADDR_REGNO: u32 = 238;
pub const EPC1_REGNO: u32 = 177;
pub const EPC7_REGNO: u32 = 183;
pub const EPS2_REGNO: u32 = 194;
pub const EPS7_REGNO: u32 = 199;

/// Word index of the ISR flag in an `EXTRA_INFO` descriptor
const ISR_FLAG_WORD: usize = 31;

const PS_UM: u32 = 1 << 5;
const PS_EXCM: u32 = 1 << 4;

/// Replaces an EXCCAUSE value that names no known cause
pub const INVALID_CAUSE_VALUE: u32 = 0xffff;
const XCHAL_EXCCAUSE_NUM: u32 = 64;

/// Name of an exception cause, including the ESP panic pseudo-causes
pub fn exception_cause_name(cause: u32) -> Option<&'static str> {
    let name = match cause {
        0 => "IllegalInstructionCause",
        1 => "SyscallCause",
        2 => "InstructionFetchErrorCause",
        3 => "LoadStoreErrorCause",
        4 => "Level1InterruptCause",
        5 => "AllocaCause",
        6 => "IntegerDivideByZeroCause",
        8 => "PrivilegedCause",
        9 => "LoadStoreAlignmentCause",
        12 => "InstrPIFDataErrorCause",
        13 => "LoadStorePIFDataErrorCause",
        14 => "InstrPIFAddrErrorCause",
        15 => "LoadStorePIFAddrErrorCause",
        16 => "InstTLBMissCause",
        17 => "InstTLBMultiHitCause",
        18 => "InstFetchPrivilegeCause",
        20 => "InstFetchProhibitedCause",
        24 => "LoadStoreTLBMissCause",
        25 => "LoadStoreTLBMultiHitCause",
        26 => "LoadStorePrivilegeCause",
        28 => "LoadProhibitedCause",
        29 => "StoreProhibitedCause",
        32 => "Coprocessor0Disabled",
        33 => "Coprocessor1Disabled",
        34 => "Coprocessor2Disabled",
        35 => "Coprocessor3Disabled",
        36 => "Coprocessor4Disabled",
        37 => "Coprocessor5Disabled",
        38 => "Coprocessor6Disabled",
        39 => "Coprocessor7Disabled",
        INVALID_CAUSE_VALUE => "InvalidCauseRegister",
        c if c == XCHAL_EXCCAUSE_NUM => "UnknownException",
        c if c == XCHAL_EXCCAUSE_NUM + 1 => "DebugException",
        c if c == XCHAL_EXCCAUSE_NUM + 2 => "DoubleException",
        c if c == XCHAL_EXCCAUSE_NUM + 3 => "KernelException",
        c if c == XCHAL_EXCCAUSE_NUM + 4 => "CoprocessorException",
        c if c == XCHAL_EXCCAUSE_NUM + 5 || c == XCHAL_EXCCAUSE_NUM + 6 => "InterruptWDTException",
        c if c == XCHAL_EXCCAUSE_NUM + 7 => "CacheError",
        _ => return None,
    };
    Some(name)
}

/// Register window architecture adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct XtensaAdapter;

impl ArchAdapter for XtensaAdapter {
    fn name(&self) -> &'static str {
        "xtensa"
    }

    fn machine(&self) -> u16 {
        EM_XTENSA
    }

    fn extract_registers(
        &self,
        stack: &[u8],
        grows_down: bool,
    ) -> Result<(Vec<u32>, Option<ExtraRegisters>), ArchError> {
        if !grows_down {
            return Err(ArchError::UnsupportedStackGrowth);
        }
        let need = EXC_FRAME_WORDS * 4;
        if stack.len() < need {
            return Err(ArchError::StackTooSmall {
                have: stack.len(),
                need,
            });
        }

        let frame = words_le(&stack[..need]);
        let mut regs = vec![0u32; GREGSET_WORDS];
        regs[REG_PC_IDX] = frame[1];
        regs[REG_PS_IDX] = frame[2];

        // Word 0 is the frame type: non-zero `exit` marks an exception frame
        let extra = if frame[0] != 0 {
            regs[REG_AR_START_IDX..REG_AR_START_IDX + 16].copy_from_slice(&frame[3..19]);
            regs[REG_SAR_IDX] = frame[19];
            regs[REG_LB_IDX] = frame[22];
            regs[REG_LE_IDX] = frame[23];
            regs[REG_LC_IDX] = frame[24];

            let exccause = if exception_cause_name(frame[20]).is_some() {
                frame[20]
            } else {
                INVALID_CAUSE_VALUE
            };
            let mut extra = vec![(EXCCAUSE_REGNO, exccause), (EXCVADDR_REGNO, frame[21])];
            extra.extend((EPC1_REGNO..=EPC7_REGNO).map(|r| (r, 0)));
            extra.extend((EPS2_REGNO..=EPS7_REGNO).map(|r| (r, 0)));
            Some(extra)
        } else {
            // Solicited frame: exit, pc, ps, threadptr, a0..a3
            regs[REG_AR_START_IDX..REG_AR_START_IDX + 4].copy_from_slice(&frame[4..8]);
            None
        };

        if regs[REG_PS_IDX] & PS_UM != 0 {
            regs[REG_PS_IDX] &= !PS_EXCM;
        }

        Ok((regs, extra))
    }

    fn status_record_size(&self) -> usize {
        PRSTATUS_OFFSET_PR_REG + GREGSET_WORDS * 4
    }

    fn isr_context(&self, extra: &ExtraInfo) -> Option<bool> {
        extra.get(ISR_FLAG_WORD).map(|flag| flag != 0)
    }

    fn exception_summary(&self, extra: Option<&ExtraInfo>) -> Option<String> {
        let Some(extra) = extra.filter(|e| e.words().len() > 1) else {
            return Some("Exception registers have not been found!".to_string());
        };

        let mut out = String::new();
        let exccause = extra.register(1, EXCCAUSE_REGNO).unwrap_or(INVALID_CAUSE_VALUE);
        let cause_name = exception_cause_name(exccause).unwrap_or("Invalid EXCCAUSE code");
        let _ = writeln!(out, "exccause       0x{:x} ({})", exccause, cause_name);
        let _ = writeln!(
            out,
            "excvaddr       0x{:x}",
            extra.register(1, EXCVADDR_REGNO).unwrap_or(0)
        );

        let pairs: Vec<(u32, u32)> = extra
            .words()
            .get(1..)
            .unwrap_or_default()
            .chunks_exact(2)
            .map(|p| (p[0], p[1]))
            .collect();
        for &(regno, value) in &pairs {
            if (EPC1_REGNO..=EPC7_REGNO).contains(&regno) {
                let _ = writeln!(out, "epc{}           0x{:x}", regno - EPC1_REGNO + 1, value);
            }
        }
        for &(regno, value) in &pairs {
            if (EPS2_REGNO..=EPS7_REGNO).contains(&regno) {
                let _ = writeln!(out, "eps{}           0x{:x}", regno - EPS2_REGNO + 2, value);
            }
        }

        Some(out.trim_end().to_string())
    }
}
