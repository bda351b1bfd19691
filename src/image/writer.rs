//! ELF32 little-endian writer for [`BinaryImage`]
//!
//! File layout: ELF header, program headers (notes first, then loads), note
//! data, load data, section data, `.shstrtab`, section headers.

use std::io::Write;
use std::path::Path;

use super::BinaryImage;
use crate::utils::align4;

const ELFMAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;

const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;

const SHT_PROGBITS: u32 = 1;
const SHT_STRTAB: u32 = 3;
const SHT_NOBITS: u32 = 8;

const ELF32_EHDR_SIZE: u16 = 52;
const ELF32_PHDR_SIZE: u16 = 32;
const ELF32_SHDR_SIZE: u16 = 40;

const SHSTRTAB_NAME: &str = ".shstrtab";

/// Offsets computed before anything is written
struct Layout {
    phnum: u16,
    note_offsets: Vec<(u32, u32)>,
    load_offsets: Vec<u32>,
    section_offsets: Vec<u32>,
    shstrtab: Vec<u8>,
    section_names: Vec<u32>,
    shstrtab_offset: u32,
    shoff: u32,
    shnum: u16,
}

impl Layout {
    fn compute(image: &BinaryImage) -> Self {
        let phnum = (image.note_segments.len() + image.load_segments.len()) as u16;
        let mut offset = ELF32_EHDR_SIZE as u32 + phnum as u32 * ELF32_PHDR_SIZE as u32;

        let mut note_offsets = Vec::with_capacity(image.note_segments.len());
        for segment in &image.note_segments {
            let size: usize = segment.notes.iter().map(|n| n.encoded_len()).sum();
            note_offsets.push((offset, size as u32));
            offset += size as u32;
        }

        let mut load_offsets = Vec::with_capacity(image.load_segments.len());
        for segment in &image.load_segments {
            load_offsets.push(offset);
            offset += segment.data.len() as u32;
        }

        let mut section_offsets = Vec::with_capacity(image.sections.len());
        for section in &image.sections {
            offset = align4(offset as usize) as u32;
            section_offsets.push(offset);
            offset += section.data.len() as u32;
        }

        // Index 0 is the empty name of the null section
        let mut shstrtab = vec![0u8];
        let mut section_names = Vec::with_capacity(image.sections.len() + 1);
        for name in image
            .sections
            .iter()
            .map(|s| s.name.as_str())
            .chain(std::iter::once(SHSTRTAB_NAME))
        {
            section_names.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
        }

        let (shstrtab_offset, shoff, shnum) = if image.sections.is_empty() {
            (0, 0, 0)
        } else {
            let strtab_offset = offset;
            offset += shstrtab.len() as u32;
            let shoff = align4(offset as usize) as u32;
            (strtab_offset, shoff, image.sections.len() as u16 + 2)
        };

        Self {
            phnum,
            note_offsets,
            load_offsets,
            section_offsets,
            shstrtab,
            section_names,
            shstrtab_offset,
            shoff,
            shnum,
        }
    }
}

impl BinaryImage {
    /// Serialize the image as an ELF32 little-endian file
    pub fn write(&self, output: &mut impl Write) -> std::io::Result<()> {
        let layout = Layout::compute(self);
        let mut written = 0u32;

        // ELF header
        output.write_all(&ELFMAG)?;
        output.write_all(&[ELFCLASS32])?; // EI_CLASS
        output.write_all(&[ELFDATA2LSB])?; // EI_DATA
        output.write_all(&[EV_CURRENT])?; // EI_VERSION
        output.write_all(&[0; 9])?; // EI_OSABI through EI_PAD
        output.write_all(&self.kind.to_le_bytes())?; // e_type
        output.write_all(&self.machine.to_le_bytes())?; // e_machine
        output.write_all(&1u32.to_le_bytes())?; // e_version
        output.write_all(&(self.entry as u32).to_le_bytes())?; // e_entry
        let phoff = if layout.phnum > 0 { ELF32_EHDR_SIZE as u32 } else { 0 };
        output.write_all(&phoff.to_le_bytes())?; // e_phoff
        output.write_all(&layout.shoff.to_le_bytes())?; // e_shoff
        output.write_all(&0u32.to_le_bytes())?; // e_flags
        output.write_all(&ELF32_EHDR_SIZE.to_le_bytes())?; // e_ehsize
        output.write_all(&ELF32_PHDR_SIZE.to_le_bytes())?; // e_phentsize
        output.write_all(&layout.phnum.to_le_bytes())?; // e_phnum
        let shentsize = if layout.shnum > 0 { ELF32_SHDR_SIZE } else { 0 };
        output.write_all(&shentsize.to_le_bytes())?; // e_shentsize
        output.write_all(&layout.shnum.to_le_bytes())?; // e_shnum
        let shstrndx = layout.shnum.saturating_sub(1);
        output.write_all(&shstrndx.to_le_bytes())?; // e_shstrndx
        written += ELF32_EHDR_SIZE as u32;

        // Program headers
        for &(offset, size) in &layout.note_offsets {
            write_phdr(output, PT_NOTE, offset, 0, size, 0)?;
        }
        for (segment, &offset) in self.load_segments.iter().zip(&layout.load_offsets) {
            write_phdr(
                output,
                PT_LOAD,
                offset,
                segment.address as u32,
                segment.data.len() as u32,
                segment.flags,
            )?;
        }
        written += layout.phnum as u32 * ELF32_PHDR_SIZE as u32;

        // Segment contents
        let mut notes = Vec::new();
        for segment in &self.note_segments {
            for note in &segment.notes {
                note.encode_into(&mut notes);
            }
        }
        output.write_all(&notes)?;
        written += notes.len() as u32;

        for segment in &self.load_segments {
            output.write_all(&segment.data)?;
            written += segment.data.len() as u32;
        }

        if layout.shnum == 0 {
            output.flush()?;
            return Ok(());
        }

        // Section contents, each aligned to 4
        for (section, &offset) in self.sections.iter().zip(&layout.section_offsets) {
            pad_to(output, &mut written, offset)?;
            output.write_all(&section.data)?;
            written += section.data.len() as u32;
        }
        pad_to(output, &mut written, layout.shstrtab_offset)?;
        output.write_all(&layout.shstrtab)?;
        written += layout.shstrtab.len() as u32;
        pad_to(output, &mut written, layout.shoff)?;

        // Section headers: null, image sections, .shstrtab
        output.write_all(&[0u8; ELF32_SHDR_SIZE as usize])?;
        for (i, section) in self.sections.iter().enumerate() {
            let kind = if section.data.is_empty() {
                SHT_NOBITS
            } else {
                SHT_PROGBITS
            };
            write_shdr(
                output,
                layout.section_names[i],
                kind,
                section.flags as u32,
                section.address as u32,
                layout.section_offsets[i],
                section.size as u32,
            )?;
        }
        write_shdr(
            output,
            layout.section_names[self.sections.len()],
            SHT_STRTAB,
            0,
            0,
            layout.shstrtab_offset,
            layout.shstrtab.len() as u32,
        )?;

        output.flush()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write(&mut buf);
        buf
    }

    /// Write the image to `path`, replacing any existing file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_bytes())
    }
}

fn write_phdr(
    output: &mut impl Write,
    p_type: u32,
    offset: u32,
    vaddr: u32,
    size: u32,
    flags: u32,
) -> std::io::Result<()> {
    output.write_all(&p_type.to_le_bytes())?; // p_type
    output.write_all(&offset.to_le_bytes())?; // p_offset
    output.write_all(&vaddr.to_le_bytes())?; // p_vaddr
    output.write_all(&vaddr.to_le_bytes())?; // p_paddr
    output.write_all(&size.to_le_bytes())?; // p_filesz
    output.write_all(&size.to_le_bytes())?; // p_memsz
    output.write_all(&flags.to_le_bytes())?; // p_flags
    output.write_all(&4u32.to_le_bytes())?; // p_align
    Ok(())
}

fn write_shdr(
    output: &mut impl Write,
    name: u32,
    kind: u32,
    flags: u32,
    addr: u32,
    offset: u32,
    size: u32,
) -> std::io::Result<()> {
    output.write_all(&name.to_le_bytes())?; // sh_name
    output.write_all(&kind.to_le_bytes())?; // sh_type
    output.write_all(&flags.to_le_bytes())?; // sh_flags
    output.write_all(&addr.to_le_bytes())?; // sh_addr
    output.write_all(&offset.to_le_bytes())?; // sh_offset
    output.write_all(&size.to_le_bytes())?; // sh_size
    output.write_all(&0u32.to_le_bytes())?; // sh_link
    output.write_all(&0u32.to_le_bytes())?; // sh_info
    output.write_all(&(if kind == SHT_STRTAB { 1u32 } else { 4u32 }).to_le_bytes())?; // sh_addralign
    output.write_all(&0u32.to_le_bytes())?; // sh_entsize
    Ok(())
}

fn pad_to(output: &mut impl Write, written: &mut u32, target: u32) -> std::io::Result<()> {
    if target > *written {
        output.write_all(&vec![0u8; (target - *written) as usize])?;
        *written = target;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::note::{Note, NT_PRSTATUS};
    use crate::image::{LoadSegment, NoteSegment, ET_CORE};
    use crate::target::EM_RISCV;
    use crate::utils::{read_u16_le, read_u32_le};
    use goblin::elf::program_header::{PF_R, PF_W};

    fn sample_core() -> BinaryImage {
        let mut core = BinaryImage::new(ET_CORE, EM_RISCV);
        core.note_segments.push(NoteSegment {
            notes: vec![Note::new(NT_PRSTATUS, "CORE", vec![0x11; 204])],
        });
        core.load_segments
            .push(LoadSegment::new(0x3fc8_a000, PF_R | PF_W, vec![0xAB; 0x150]));
        core.load_segments
            .push(LoadSegment::new(0x3fc8_b000, PF_R | PF_W, vec![0xCD; 0x40]));
        core
    }

    #[test]
    fn test_elf_header_layout() {
        let buf = sample_core().to_bytes();

        assert_eq!(&buf[0..4], &ELFMAG);
        assert_eq!(buf[4], ELFCLASS32);
        assert_eq!(buf[5], ELFDATA2LSB);
        assert_eq!(read_u16_le(&buf, 16), Some(ET_CORE));
        assert_eq!(read_u16_le(&buf, 18), Some(EM_RISCV));
        assert_eq!(read_u32_le(&buf, 28), Some(52)); // e_phoff
        assert_eq!(read_u32_le(&buf, 32), Some(0)); // e_shoff
        assert_eq!(read_u16_le(&buf, 44), Some(3)); // e_phnum
        assert_eq!(read_u16_le(&buf, 48), Some(0)); // e_shnum
    }

    #[test]
    fn test_note_phdr_comes_first() {
        let buf = sample_core().to_bytes();
        let first_phdr = 52;
        assert_eq!(read_u32_le(&buf, first_phdr), Some(PT_NOTE));
        assert_eq!(read_u32_le(&buf, first_phdr + 32), Some(PT_LOAD));
        assert_eq!(read_u32_le(&buf, first_phdr + 32 + 8), Some(0x3fc8_a000));
    }

    #[test]
    fn test_core_parses_back() {
        let core = sample_core();
        let parsed = BinaryImage::from_bytes(&core.to_bytes()).unwrap();
        assert_eq!(parsed.kind, ET_CORE);
        assert_eq!(parsed.load_segments, core.load_segments);
        assert_eq!(parsed.note_segments, core.note_segments);
        assert!(parsed.sections.is_empty());
    }

    #[test]
    fn test_output_is_deterministic() {
        assert_eq!(sample_core().to_bytes(), sample_core().to_bytes());
    }

    #[test]
    fn test_save_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.elf");
        sample_core().save(&path).unwrap();
        let parsed = BinaryImage::open(&path).unwrap();
        assert_eq!(parsed.load_segments.len(), 2);
    }
}
