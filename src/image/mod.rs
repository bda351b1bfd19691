//! In-memory model of an ELF image: sections, loadable segments and notes.
//!
//! Images are parsed with goblin and written back with [`writer`], which only
//! produces 32-bit little-endian files (every supported chip is 32-bit).

pub mod note;
pub mod writer;

use std::path::Path;

use goblin::elf::program_header::{PF_R, PF_W, PF_X, PT_LOAD, PT_NOTE};
use goblin::elf::section_header::{SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE, SHT_NOBITS};
use tracing::debug;

use crate::error::{CoreDumpError, Result};
pub use note::{ExtraInfo, Note, TaskStatus};

pub const ET_EXEC: u16 = 2;
pub const ET_CORE: u16 = 4;

/// A section of the program image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub address: u64,
    pub size: u64,
    /// `SHF_*` flags
    pub flags: u64,
    /// File contents; empty for `SHT_NOBITS` sections
    pub data: Vec<u8>,
}

impl Section {
    pub fn end(&self) -> u64 {
        self.address + self.size
    }

    /// Three-letter attribute string such as `"RW "` or `"R X"`
    pub fn attr_str(&self) -> String {
        attr_string(
            true,
            self.flags & SHF_WRITE as u64 != 0,
            self.flags & SHF_EXECINSTR as u64 != 0,
        )
    }
}

/// A `PT_LOAD` segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSegment {
    pub address: u64,
    /// `PF_*` flags
    pub flags: u32,
    pub data: Vec<u8>,
}

impl LoadSegment {
    pub fn new(address: u64, flags: u32, data: Vec<u8>) -> Self {
        Self {
            address,
            flags,
            data,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn end(&self) -> u64 {
        self.address + self.size()
    }

    pub fn is_executable(&self) -> bool {
        self.flags & PF_X != 0
    }

    pub fn attr_str(&self) -> String {
        attr_string(
            self.flags & PF_R != 0,
            self.flags & PF_W != 0,
            self.flags & PF_X != 0,
        )
    }
}

/// A `PT_NOTE` segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteSegment {
    pub notes: Vec<Note>,
}

fn attr_string(read: bool, write: bool, exec: bool) -> String {
    let mut s = String::with_capacity(3);
    s.push(if read { 'R' } else { ' ' });
    s.push(if write { 'W' } else { ' ' });
    s.push(if exec { 'X' } else { ' ' });
    s
}

/// A parsed (or to-be-written) ELF image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    /// `e_type`
    pub kind: u16,
    /// `e_machine`
    pub machine: u16,
    pub entry: u64,
    pub sections: Vec<Section>,
    pub load_segments: Vec<LoadSegment>,
    pub note_segments: Vec<NoteSegment>,
}

impl BinaryImage {
    /// Empty image of the given type and machine
    pub fn new(kind: u16, machine: u16) -> Self {
        Self {
            kind,
            machine,
            entry: 0,
            sections: Vec::new(),
            load_segments: Vec::new(),
            note_segments: Vec::new(),
        }
    }

    /// Read and parse an ELF file
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Opening ELF image: {}", path.display());
        let data = std::fs::read(path).map_err(|e| {
            CoreDumpError::Image(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_bytes(&data)
            .map_err(|e| CoreDumpError::Image(format!("{}: {}", path.display(), e)))
    }

    /// Parse ELF bytes. Only allocated sections are kept.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let elf = goblin::elf::Elf::parse(data)?;
        let mut image = Self::new(elf.header.e_type, elf.header.e_machine);
        image.entry = elf.header.e_entry;

        for sh in &elf.section_headers {
            if sh.sh_flags & SHF_ALLOC as u64 == 0 || sh.sh_size == 0 {
                continue;
            }
            let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string();
            let contents = if sh.sh_type == SHT_NOBITS {
                Vec::new()
            } else {
                file_range(data, sh.sh_offset, sh.sh_size)?.to_vec()
            };
            image.sections.push(Section {
                name,
                address: sh.sh_addr,
                size: sh.sh_size,
                flags: sh.sh_flags,
                data: contents,
            });
        }

        for ph in &elf.program_headers {
            match ph.p_type {
                PT_LOAD => image.load_segments.push(LoadSegment::new(
                    ph.p_vaddr,
                    ph.p_flags,
                    file_range(data, ph.p_offset, ph.p_filesz)?.to_vec(),
                )),
                PT_NOTE => image.note_segments.push(NoteSegment {
                    notes: Note::parse_all(file_range(data, ph.p_offset, ph.p_filesz)?),
                }),
                _ => {}
            }
        }

        debug!(
            "ELF image: machine={}, {} sections, {} load segments, {} note segments",
            image.machine,
            image.sections.len(),
            image.load_segments.len(),
            image.note_segments.len()
        );
        Ok(image)
    }

    /// All notes across every note segment, in file order
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.note_segments.iter().flat_map(|seg| seg.notes.iter())
    }

    /// First note with the given type whose name contains `name`
    pub fn find_note(&self, kind: u32, name: &str) -> Option<&Note> {
        self.notes().find(|n| n.kind == kind && n.name.contains(name))
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Task status entries from the `TASK_INFO` notes, in capture order
    pub fn task_statuses(&self) -> Vec<TaskStatus> {
        self.notes()
            .filter(|n| n.kind == note::NT_ESP_TASK_INFO && n.name.contains(note::TASK_INFO_NOTE_NAME))
            .filter_map(|n| TaskStatus::parse(&n.desc))
            .collect()
    }

    pub fn extra_info(&self) -> Option<ExtraInfo> {
        self.find_note(note::NT_ESP_EXTRA_INFO, note::EXTRA_INFO_NOTE_NAME)
            .map(|n| ExtraInfo::parse(&n.desc))
    }

    /// Panic reason text, trimmed of trailing NULs
    pub fn panic_details(&self) -> Option<String> {
        self.find_note(note::NT_ESP_PANIC_DETAILS, note::PANIC_DETAILS_NOTE_NAME)
            .map(|n| {
                String::from_utf8_lossy(&n.desc)
                    .trim_end_matches('\0')
                    .trim_end()
                    .to_string()
            })
            .filter(|s| !s.is_empty())
    }

    pub fn chip_revision(&self) -> Option<u32> {
        self.find_note(note::NT_ESP_CHIP_REV, note::CHIP_REV_NOTE_NAME)
            .and_then(|n| crate::utils::read_u32_le(&n.desc, 0))
    }

    /// Dump version word and program SHA-256 prefix from `ESP_CORE_DUMP_INFO`
    pub fn core_dump_info(&self) -> Option<(u32, String)> {
        let n = self.find_note(note::NT_ESP_CORE_DUMP_INFO, note::CORE_DUMP_INFO_NOTE_NAME)?;
        let version = crate::utils::read_u32_le(&n.desc, 0)?;
        let sha = n
            .desc
            .get(4..)
            .map(|raw| String::from_utf8_lossy(raw).trim_end_matches('\0').to_string())
            .unwrap_or_default();
        Some((version, sha))
    }
}

fn file_range(data: &[u8], offset: u64, size: u64) -> Result<&[u8]> {
    let start = offset as usize;
    let end = start
        .checked_add(size as usize)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            CoreDumpError::Image(format!(
                "range 0x{:x}+0x{:x} exceeds file size 0x{:x}",
                offset,
                size,
                data.len()
            ))
        })?;
    Ok(&data[start..end])
}
