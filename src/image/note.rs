//! ELF notes and the ESP-specific note payloads

use crate::utils::{align4, read_u32_le, words_le};

/// `elf_prstatus` note carrying one task's registers
pub const NT_PRSTATUS: u32 = 1;
/// Exception registers of the crashed task
pub const NT_ESP_EXTRA_INFO: u32 = 677;
/// Per-task status entry
pub const NT_ESP_TASK_INFO: u32 = 678;
/// Dump version and program SHA-256
pub const NT_ESP_CORE_DUMP_INFO: u32 = 8266;
/// Free-text panic reason
pub const NT_ESP_PANIC_DETAILS: u32 = 8267;
/// Chip revision word
pub const NT_ESP_CHIP_REV: u32 = 8268;

pub const CORE_NOTE_NAME: &str = "CORE";
pub const EXTRA_INFO_NOTE_NAME: &str = "EXTRA_INFO";
pub const TASK_INFO_NOTE_NAME: &str = "TASK_INFO";
pub const CORE_DUMP_INFO_NOTE_NAME: &str = "ESP_CORE_DUMP_INFO";
pub const PANIC_DETAILS_NOTE_NAME: &str = "ESP_PANIC_DETAILS";
pub const CHIP_REV_NOTE_NAME: &str = "ESP_CHIP_REV";

/// Word 0 of the extra info when the crashed task was not captured
pub const CURR_TASK_MARKER: u32 = 0xdead_bee0;

/// A single ELF note: `namesz`, `descsz`, `type`, padded name, padded descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub kind: u32,
    /// Name without the terminating NUL
    pub name: String,
    pub desc: Vec<u8>,
}

impl Note {
    pub fn new(kind: u32, name: &str, desc: Vec<u8>) -> Self {
        Self {
            kind,
            name: name.to_string(),
            desc,
        }
    }

    /// Encoded size including alignment padding
    pub fn encoded_len(&self) -> usize {
        12 + align4(self.name.len() + 1) + align4(self.desc.len())
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let namesz = self.name.len() + 1;
        out.extend_from_slice(&(namesz as u32).to_le_bytes());
        out.extend_from_slice(&(self.desc.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.kind.to_le_bytes());
        out.extend_from_slice(self.name.as_bytes());
        out.resize(out.len() + align4(namesz) - self.name.len(), 0);
        out.extend_from_slice(&self.desc);
        out.resize(out.len() + align4(self.desc.len()) - self.desc.len(), 0);
    }

    /// Decode every note in a PT_NOTE segment body.
    ///
    /// Parsing stops at the first note that does not fit in the remaining bytes.
    pub fn parse_all(data: &[u8]) -> Vec<Note> {
        let mut notes = Vec::new();
        let mut offset = 0;

        while offset + 12 <= data.len() {
            let (Some(namesz), Some(descsz), Some(kind)) = (
                read_u32_le(data, offset),
                read_u32_le(data, offset + 4),
                read_u32_le(data, offset + 8),
            ) else {
                break;
            };
            let name_start = offset + 12;
            let desc_start = name_start + align4(namesz as usize);
            let desc_end = desc_start + descsz as usize;
            if desc_end > data.len() {
                break;
            }

            let raw_name = &data[name_start..name_start + namesz as usize];
            let name = String::from_utf8_lossy(raw_name)
                .trim_end_matches('\0')
                .to_string();
            notes.push(Note {
                kind,
                name,
                desc: data[desc_start..desc_end].to_vec(),
            });
            offset = desc_start + align4(descsz as usize);
        }

        notes
    }
}

/// Task status flag bits
pub const TASK_STATUS_CORRECT: u32 = 0x00;
pub const TASK_STATUS_TCB_CORRUPTED: u32 = 0x01;
pub const TASK_STATUS_STACK_CORRUPTED: u32 = 0x02;

/// Size of the `TASK_INFO` descriptor
pub const TASK_STATUS_SIZE: usize = 36;

/// Status of one captured task, as stored in a `TASK_INFO` note
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub index: u32,
    pub flags: u32,
    pub tcb_address: u32,
    pub stack_start: u32,
    pub stack_len: u32,
    pub name: [u8; 16],
}

impl TaskStatus {
    pub fn is_corrupted(&self) -> bool {
        self.flags != TASK_STATUS_CORRECT
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TASK_STATUS_SIZE);
        for word in [
            self.index,
            self.flags,
            self.tcb_address,
            self.stack_start,
            self.stack_len,
        ] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend_from_slice(&self.name);
        out
    }

    /// Decode a descriptor; older dumps stop after `stack_start`
    pub fn parse(desc: &[u8]) -> Option<Self> {
        let mut name = [0u8; 16];
        if let Some(raw) = desc.get(20..36) {
            name.copy_from_slice(raw);
        }
        Some(Self {
            index: read_u32_le(desc, 0)?,
            flags: read_u32_le(desc, 4)?,
            tcb_address: read_u32_le(desc, 8)?,
            stack_start: read_u32_le(desc, 12)?,
            stack_len: read_u32_le(desc, 16).unwrap_or(0),
            name,
        })
    }
}

/// Words of an `EXTRA_INFO` note; offsets past word 0 are architecture specific
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraInfo {
    words: Vec<u32>,
}

impl ExtraInfo {
    pub fn new(words: Vec<u32>) -> Self {
        Self { words }
    }

    pub fn parse(desc: &[u8]) -> Self {
        Self::new(words_le(desc))
    }

    /// TCB of the crashed task, or [`CURR_TASK_MARKER`]
    pub fn crashed_task(&self) -> Option<u32> {
        self.words.first().copied()
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.words.get(index).copied()
    }

    /// Value of the `(regno, value)` pair with the given register number,
    /// scanning pairs that start at `first_pair`
    pub fn register(&self, first_pair: usize, regno: u32) -> Option<u32> {
        self.words
            .get(first_pair..)?
            .chunks_exact(2)
            .find(|pair| pair[0] == regno)
            .map(|pair| pair[1])
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}
