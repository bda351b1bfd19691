//! Snapshot decoding and ELF core reconstruction
//!
//! A snapshot arrives as an ELF core, a raw binary dump or the base64 text the
//! device prints on its console. Raw dumps start with a small header naming the
//! dump version and chip; BIN versions carry task records that are rebuilt into
//! an ELF core here, ELF versions already embed one.

pub mod flash;

use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use goblin::elf::program_header::{PF_R, PF_W};
use sha2::{Digest, Sha256};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::arch::{self, ArchAdapter};
use crate::error::LoaderError;
use crate::format::{detect_format, CoreFormat};
use crate::image::note::{
    self, Note, TaskStatus, TASK_STATUS_CORRECT, TASK_STATUS_STACK_CORRUPTED,
    TASK_STATUS_TCB_CORRUPTED,
};
use crate::image::{BinaryImage, LoadSegment, NoteSegment, ET_CORE};
use crate::target::Chip;
use crate::utils::{align4, read_u32_le};

pub use flash::{load_from_flash, EsptoolFlashReader, FlashReader, PartitionEntry};

/// Length of the program SHA-256 field in `ESP_CORE_DUMP_INFO`
pub const APP_SHA256_HEX_LEN: usize = 64;

type LoaderResult<T> = std::result::Result<T, LoaderError>;

/// Core dump format versions, the low half of the header version word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpVersion {
    BinV1,
    BinV2,
    ElfCrc32,
    ElfSha256,
    ElfCrc32V2,
    ElfSha256V2,
    ElfCrc32V2_1,
    ElfSha256V2_1,
}

/// Checksum appended to a raw dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Crc32,
    Sha256,
}

impl ChecksumKind {
    pub fn len(self) -> usize {
        match self {
            ChecksumKind::Crc32 => 4,
            ChecksumKind::Sha256 => 32,
        }
    }

    /// Checksum of `data` as stored on the wire
    pub fn compute(self, data: &[u8]) -> Vec<u8> {
        match self {
            ChecksumKind::Crc32 => {
                let crc = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
                crc.checksum(data).to_le_bytes().to_vec()
            }
            ChecksumKind::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

impl DumpVersion {
    pub const ALL: [DumpVersion; 8] = [
        DumpVersion::BinV1,
        DumpVersion::BinV2,
        DumpVersion::ElfCrc32,
        DumpVersion::ElfSha256,
        DumpVersion::ElfCrc32V2,
        DumpVersion::ElfSha256V2,
        DumpVersion::ElfCrc32V2_1,
        DumpVersion::ElfSha256V2_1,
    ];

    pub fn value(self) -> u16 {
        match self {
            DumpVersion::BinV1 => 0x0001,
            DumpVersion::BinV2 => 0x0002,
            DumpVersion::ElfCrc32 => 0x0100,
            DumpVersion::ElfSha256 => 0x0101,
            DumpVersion::ElfCrc32V2 => 0x0102,
            DumpVersion::ElfSha256V2 => 0x0103,
            DumpVersion::ElfCrc32V2_1 => 0x0104,
            DumpVersion::ElfSha256V2_1 => 0x0105,
        }
    }

    pub fn from_value(value: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.value() == value)
    }

    pub fn header_size(self) -> usize {
        match self {
            DumpVersion::BinV1 | DumpVersion::ElfCrc32 | DumpVersion::ElfSha256 => 16,
            DumpVersion::BinV2 | DumpVersion::ElfCrc32V2 | DumpVersion::ElfSha256V2 => 20,
            DumpVersion::ElfCrc32V2_1 | DumpVersion::ElfSha256V2_1 => 24,
        }
    }

    pub fn is_elf(self) -> bool {
        !matches!(self, DumpVersion::BinV1 | DumpVersion::BinV2)
    }

    pub fn checksum(self) -> ChecksumKind {
        match self {
            DumpVersion::ElfSha256 | DumpVersion::ElfSha256V2 | DumpVersion::ElfSha256V2_1 => {
                ChecksumKind::Sha256
            }
            _ => ChecksumKind::Crc32,
        }
    }

    fn has_segments(self) -> bool {
        self.header_size() >= 20
    }

    fn has_chip_rev(self) -> bool {
        self.header_size() >= 24
    }
}

/// Split a header version word into chip and dump version, if both are known
pub fn parse_version_word(word: u32) -> Option<(Chip, DumpVersion)> {
    let chip = Chip::from_chip_id((word >> 16) as u16)?;
    let version = DumpVersion::from_value((word & 0xffff) as u16)?;
    Some((chip, version))
}

/// Raw dump header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    pub total_len: u32,
    /// Whole version word, chip id included
    pub version_word: u32,
    pub chip: Chip,
    pub version: DumpVersion,
    pub task_num: u32,
    pub tcb_size: u32,
    pub segs_num: u32,
    pub chip_rev: Option<u32>,
}

impl RawHeader {
    pub fn parse(data: &[u8]) -> LoaderResult<Self> {
        let (Some(total_len), Some(version_word)) = (read_u32_le(data, 0), read_u32_le(data, 4))
        else {
            return Err(LoaderError::Truncated {
                needed: 8,
                available: data.len(),
            });
        };
        let (chip, version) =
            parse_version_word(version_word).ok_or(LoaderError::UnsupportedVersion(version_word))?;

        let header_size = version.header_size();
        if data.len() < header_size {
            return Err(LoaderError::Truncated {
                needed: header_size,
                available: data.len(),
            });
        }
        let word = |offset: usize| read_u32_le(data, offset).unwrap_or(0);

        Ok(Self {
            total_len,
            version_word,
            chip,
            version,
            task_num: word(8),
            tcb_size: word(12),
            segs_num: if version.has_segments() { word(16) } else { 0 },
            chip_rev: version.has_chip_rev().then(|| word(20)),
        })
    }
}

/// Options shared by the file and flash loaders
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Program ELF; its SHA-256 goes into the `ESP_CORE_DUMP_INFO` note
    pub program: Option<PathBuf>,
    /// Explicit core dump offset in flash, bypassing the partition table
    pub flash_offset: Option<u32>,
    /// Partition table offset in flash
    pub partition_table_offset: Option<u32>,
}

impl LoadOptions {
    fn program_sha256(&self) -> LoaderResult<Option<String>> {
        self.program.as_deref().map(program_sha256).transpose()
    }
}

/// Result of loading a snapshot
///
/// The reconstructed core lives in a temporary file that is removed when this
/// value is dropped.
#[derive(Debug)]
pub struct SnapshotMetadata {
    pub target: Option<Chip>,
    pub chip_rev: Option<u32>,
    pub version: Option<DumpVersion>,
    pub core_path: PathBuf,
    pub temp_files: Vec<TempPath>,
}

/// SHA-256 of a file as lowercase hex
pub fn program_sha256(path: &Path) -> LoaderResult<String> {
    let data = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&data)))
}

/// Decode a snapshot held in memory and write the ELF core to a temporary file
pub fn load_from_bytes(
    data: &[u8],
    format: CoreFormat,
    options: &LoadOptions,
) -> LoaderResult<SnapshotMetadata> {
    let format = match format {
        CoreFormat::Auto => {
            let detection = detect_format(data);
            info!("Detected core dump format: {}", detection.format);
            detection.format
        }
        other => other,
    };

    match format {
        CoreFormat::Elf => {
            let temp = write_temp_core(data)?;
            Ok(SnapshotMetadata {
                target: None,
                chip_rev: None,
                version: None,
                core_path: temp.to_path_buf(),
                temp_files: vec![temp],
            })
        }
        CoreFormat::Base64 => {
            let raw = decode_base64(data)?;
            load_raw(&raw, options)
        }
        CoreFormat::Raw | CoreFormat::Auto => load_raw(data, options),
    }
}

fn load_raw(data: &[u8], options: &LoadOptions) -> LoaderResult<SnapshotMetadata> {
    let program_sha = options.program_sha256()?;
    let (header, core) = reconstruct(data, program_sha.as_deref())?;
    let temp = write_temp_core(&core)?;
    Ok(SnapshotMetadata {
        target: Some(header.chip),
        chip_rev: header.chip_rev,
        version: Some(header.version),
        core_path: temp.to_path_buf(),
        temp_files: vec![temp],
    })
}

fn write_temp_core(data: &[u8]) -> LoaderResult<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("esp-coredump-")
        .suffix(".elf")
        .tempfile()?;
    file.write_all(data)?;
    file.flush()?;
    let path = file.into_temp_path();
    debug!("Core file written to {}", path.display());
    Ok(path)
}

/// Decode the base64 text printed by the device, one line at a time.
///
/// Blank lines and the console banners around the dump are skipped.
pub fn decode_base64(text: &[u8]) -> LoaderResult<Vec<u8>> {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut raw = Vec::new();

    for (lineno, line) in text.split(|&b| b == b'\n').enumerate() {
        let line = trim_ascii(line);
        if line.is_empty() || is_banner(line) {
            continue;
        }
        engine
            .decode_vec(line, &mut raw)
            .map_err(|e| LoaderError::MalformedEncoding {
                details: format!(
                    "line {}: {}: '{}'",
                    lineno + 1,
                    e,
                    String::from_utf8_lossy(line)
                ),
            })?;
    }

    if raw.is_empty() {
        return Err(LoaderError::MalformedEncoding {
            details: "no base64 data found".to_string(),
        });
    }
    Ok(raw)
}

fn trim_ascii(mut line: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = line {
        if first.is_ascii_whitespace() {
            line = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = line {
        if last.is_ascii_whitespace() {
            line = rest;
        } else {
            break;
        }
    }
    line
}

fn is_banner(line: &[u8]) -> bool {
    line.starts_with(b"====") || line.windows(9).any(|w| w == b"CORE DUMP")
}

/// Validate a raw dump and produce the bytes of its ELF core.
///
/// The output depends only on `data` and `program_sha`.
pub fn reconstruct(data: &[u8], program_sha: Option<&str>) -> LoaderResult<(RawHeader, Vec<u8>)> {
    let header = RawHeader::parse(data)?;
    info!(
        "Core dump: {} version 0x{:04x}, {} bytes, {} tasks",
        header.chip,
        header.version.value(),
        header.total_len,
        header.task_num
    );

    let total_len = header.total_len as usize;
    if total_len > data.len() {
        return Err(LoaderError::Truncated {
            needed: total_len,
            available: data.len(),
        });
    }
    let checksum = header.version.checksum();
    let body_end = total_len
        .checked_sub(checksum.len())
        .filter(|&end| end >= header.version.header_size())
        .ok_or_else(|| LoaderError::MalformedEncoding {
            details: format!("declared length {} is shorter than the header", total_len),
        })?;

    let expected = &data[body_end..total_len];
    let computed = checksum.compute(&data[..body_end]);
    if expected != computed.as_slice() {
        return Err(LoaderError::ChecksumMismatch {
            expected: hex::encode(expected),
            computed: hex::encode(&computed),
        });
    }
    if total_len < data.len() {
        debug!("Ignoring {} bytes after the core dump", data.len() - total_len);
    }

    let body = &data[header.version.header_size()..body_end];
    let core = if header.version.is_elf() {
        body.to_vec()
    } else {
        rebuild_bin(&header, body, program_sha)?.to_bytes()
    };
    Ok((header, core))
}

/// Byte cursor over the dump body
struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> LoaderResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(LoaderError::Truncated {
                needed: self.offset.saturating_add(len),
                available: self.data.len(),
            })?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    /// Take `len` bytes and skip the padding up to the next word
    fn take_padded(&mut self, len: usize) -> LoaderResult<&'a [u8]> {
        let bytes = self.take(len)?;
        self.take(align4(len) - len)?;
        Ok(bytes)
    }

    fn u32(&mut self) -> LoaderResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

fn rebuild_bin(
    header: &RawHeader,
    body: &[u8],
    program_sha: Option<&str>,
) -> LoaderResult<BinaryImage> {
    let adapter = arch::for_chip(header.chip);
    let mut core = BinaryImage::new(ET_CORE, adapter.machine());
    let mut cursor = Cursor {
        data: body,
        offset: 0,
    };

    let mut prstatus_notes = Vec::new();
    let mut task_notes = Vec::new();
    let mut extra_note = None;

    for index in 0..header.task_num {
        let tcb_address = cursor.u32()?;
        let stack_top = cursor.u32()?;
        let stack_end = cursor.u32()?;
        let tcb = cursor.take_padded(header.tcb_size as usize)?;
        let stack_len = stack_end.abs_diff(stack_top);
        let stack = cursor.take_padded(stack_len as usize)?;
        let stack_start = stack_top.min(stack_end);
        debug!(
            "Task #{}: tcb 0x{:x}, stack 0x{:x}..0x{:x}",
            index, tcb_address, stack_start, stack_start as u64 + stack_len as u64
        );

        let mut flags = TASK_STATUS_CORRECT;
        if header.chip.is_task_memory(tcb_address, header.tcb_size) {
            core.load_segments
                .push(LoadSegment::new(tcb_address as u64, PF_R | PF_W, tcb.to_vec()));
        } else {
            warn!("Task #{} has a corrupted TCB at 0x{:x}", index, tcb_address);
            flags |= TASK_STATUS_TCB_CORRUPTED;
        }
        if header.chip.is_task_memory(stack_start, stack_len) {
            core.load_segments
                .push(LoadSegment::new(stack_start as u64, PF_R | PF_W, stack.to_vec()));
        } else {
            warn!("Task #{} has a corrupted stack at 0x{:x}", index, stack_start);
            flags |= TASK_STATUS_STACK_CORRUPTED;
        }

        let (registers, extra) = adapter.extract_registers(stack, stack_end > stack_top)?;
        prstatus_notes.push(Note::new(
            note::NT_PRSTATUS,
            note::CORE_NOTE_NAME,
            adapter.build_status_record(tcb_address, &registers),
        ));

        // The first task is the one that crashed
        if index == 0 {
            if let Some(extra) = extra {
                let info = adapter.build_extra_info(tcb_address, &extra);
                extra_note = Some(Note::new(
                    note::NT_ESP_EXTRA_INFO,
                    note::EXTRA_INFO_NOTE_NAME,
                    info.to_bytes(),
                ));
            }
        }

        let status = TaskStatus {
            index,
            flags,
            tcb_address,
            stack_start,
            stack_len,
            name: [0; 16],
        };
        task_notes.push(Note::new(
            note::NT_ESP_TASK_INFO,
            note::TASK_INFO_NOTE_NAME,
            status.to_bytes(),
        ));
    }

    for _ in 0..header.segs_num {
        let mem_start = cursor.u32()?;
        let mem_size = cursor.u32()?;
        let data = cursor.take_padded(mem_size as usize)?;
        debug!("Memory segment 0x{:x}, {} bytes", mem_start, mem_size);
        core.load_segments
            .push(LoadSegment::new(mem_start as u64, PF_R | PF_W, data.to_vec()));
    }

    let mut notes = vec![core_dump_info_note(header.version_word, program_sha)];
    notes.extend(prstatus_notes);
    notes.extend(extra_note);
    notes.extend(task_notes);
    if let Some(rev) = header.chip_rev {
        notes.push(Note::new(
            note::NT_ESP_CHIP_REV,
            note::CHIP_REV_NOTE_NAME,
            rev.to_le_bytes().to_vec(),
        ));
    }
    core.note_segments.push(NoteSegment { notes });

    Ok(core)
}

fn core_dump_info_note(version_word: u32, program_sha: Option<&str>) -> Note {
    let mut desc = version_word.to_le_bytes().to_vec();
    let mut sha = [0u8; APP_SHA256_HEX_LEN];
    if let Some(hex_sha) = program_sha {
        let len = hex_sha.len().min(APP_SHA256_HEX_LEN);
        sha[..len].copy_from_slice(&hex_sha.as_bytes()[..len]);
    }
    desc.extend_from_slice(&sha);
    Note::new(
        note::NT_ESP_CORE_DUMP_INFO,
        note::CORE_DUMP_INFO_NOTE_NAME,
        desc,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// BIN_V2 esp32c3 dump with one task and one memory segment
    fn bin_v2_dump() -> Vec<u8> {
        let tcb_address = 0x3fc8_b000u32;
        let stack_top = 0x3fc8_a000u32;
        let stack_end = 0x3fc8_a100u32;
        let tcb_size = 0x5c;

        let mut body = Vec::new();
        for w in [tcb_address, stack_top, stack_end] {
            body.extend_from_slice(&w.to_le_bytes());
        }
        body.extend(vec![0x11; tcb_size]);
        body.resize(align4(body.len()), 0);
        body.extend((0..0x40u32).flat_map(|w| (0x4200_0000 + w).to_le_bytes()));
        for w in [0x3fc8_c000u32, 8] {
            body.extend_from_slice(&w.to_le_bytes());
        }
        body.extend([0xEE; 8]);

        let version_word = (Chip::Esp32c3.chip_id() as u32) << 16 | 0x0002;
        let total_len = 20 + body.len() + 4;
        let mut dump = Vec::new();
        for w in [total_len as u32, version_word, 1, tcb_size as u32, 1] {
            dump.extend_from_slice(&w.to_le_bytes());
        }
        dump.extend(body);
        let crc = ChecksumKind::Crc32.compute(&dump);
        dump.extend(crc);
        dump
    }

    #[test]
    fn test_version_table() {
        assert_eq!(DumpVersion::from_value(0x0103), Some(DumpVersion::ElfSha256V2));
        assert_eq!(DumpVersion::from_value(0x0003), None);
        assert_eq!(DumpVersion::ElfCrc32V2_1.header_size(), 24);
        assert_eq!(DumpVersion::BinV1.header_size(), 16);
        assert!(DumpVersion::ElfCrc32.is_elf());
        assert!(!DumpVersion::BinV2.is_elf());
        assert_eq!(DumpVersion::ElfSha256.checksum().len(), 32);
    }

    #[test]
    fn test_header_parse() {
        let dump = bin_v2_dump();
        let header = RawHeader::parse(&dump).unwrap();
        assert_eq!(header.chip, Chip::Esp32c3);
        assert_eq!(header.version, DumpVersion::BinV2);
        assert_eq!(header.task_num, 1);
        assert_eq!(header.segs_num, 1);
        assert_eq!(header.chip_rev, None);
        assert_eq!(header.total_len as usize, dump.len());
    }

    #[test]
    fn test_unsupported_version() {
        let mut dump = bin_v2_dump();
        dump[4..8].copy_from_slice(&0x0001_0002u32.to_le_bytes());
        assert!(matches!(
            RawHeader::parse(&dump),
            Err(LoaderError::UnsupportedVersion(0x0001_0002))
        ));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut dump = bin_v2_dump();
        dump[30] ^= 0xff;
        assert!(matches!(
            reconstruct(&dump, None),
            Err(LoaderError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_dump() {
        let dump = bin_v2_dump();
        let result = reconstruct(&dump[..dump.len() - 10], None);
        assert!(matches!(result, Err(LoaderError::Truncated { .. })));
    }

    #[test]
    fn test_reconstruction_layout() {
        let (header, bytes) = reconstruct(&bin_v2_dump(), Some(&"ab".repeat(32))).unwrap();
        assert_eq!(header.version, DumpVersion::BinV2);

        let core = BinaryImage::from_bytes(&bytes).unwrap();
        assert_eq!(core.kind, ET_CORE);
        assert_eq!(core.machine, crate::target::EM_RISCV);

        let addrs: Vec<u64> = core.load_segments.iter().map(|s| s.address).collect();
        assert_eq!(addrs, vec![0x3fc8_b000, 0x3fc8_a000, 0x3fc8_c000]);
        assert_eq!(core.load_segments[1].data.len(), 0x100);

        let kinds: Vec<u32> = core.notes().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![note::NT_ESP_CORE_DUMP_INFO, note::NT_PRSTATUS, note::NT_ESP_TASK_INFO]
        );
        let (version, sha) = core.core_dump_info().unwrap();
        assert_eq!(version, header.version_word);
        assert_eq!(sha, "ab".repeat(32));

        let status = &core.task_statuses()[0];
        assert_eq!(status.tcb_address, 0x3fc8_b000);
        assert_eq!(status.stack_start, 0x3fc8_a000);
        assert!(!status.is_corrupted());
    }

    #[test]
    fn test_reconstruction_is_deterministic() {
        let dump = bin_v2_dump();
        let (_, first) = reconstruct(&dump, None).unwrap();
        let (_, second) = reconstruct(&dump, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_elf_version_passes_body_through() {
        let elf = BinaryImage::new(ET_CORE, crate::target::EM_XTENSA).to_bytes();
        let version_word = (Chip::Esp32.chip_id() as u32) << 16 | 0x0104;
        let total_len = 24 + elf.len() + 4;
        let mut dump = Vec::new();
        for w in [total_len as u32, version_word, 0, 0, 0, 3] {
            dump.extend_from_slice(&w.to_le_bytes());
        }
        dump.extend_from_slice(&elf);
        let crc = ChecksumKind::Crc32.compute(&dump);
        dump.extend(crc);

        let (header, core) = reconstruct(&dump, None).unwrap();
        assert_eq!(header.chip_rev, Some(3));
        assert_eq!(core, elf);
    }

    #[test]
    fn test_base64_decoding() {
        let dump = bin_v2_dump();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&dump);
        let mut text = String::from("================= CORE DUMP START =================\r\n");
        for chunk in encoded.as_bytes().chunks(64) {
            text.push_str(std::str::from_utf8(chunk).unwrap());
            text.push_str("\r\n");
        }
        text.push_str("\n================= CORE DUMP END =================\n");
        assert_eq!(decode_base64(text.as_bytes()).unwrap(), dump);
    }

    #[test]
    fn test_base64_malformed() {
        let err = decode_base64(b"AAAA\n!!!notbase64\n").unwrap_err();
        match err {
            LoaderError::MalformedEncoding { details } => assert!(details.starts_with("line 2")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_load_from_bytes_cleans_up() {
        let metadata = load_from_bytes(&bin_v2_dump(), CoreFormat::Auto, &LoadOptions::default())
            .unwrap();
        assert_eq!(metadata.target, Some(Chip::Esp32c3));
        let path = metadata.core_path.clone();
        assert!(path.exists());
        drop(metadata);
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupted_tcb_flagged() {
        let mut dump = bin_v2_dump();
        dump[20..24].copy_from_slice(&0x1000u32.to_le_bytes());
        let len = dump.len();
        let crc = ChecksumKind::Crc32.compute(&dump[..len - 4]);
        dump[len - 4..].copy_from_slice(&crc);

        let (_, bytes) = reconstruct(&dump, None).unwrap();
        let core = BinaryImage::from_bytes(&bytes).unwrap();
        let status = &core.task_statuses()[0];
        assert_eq!(status.flags, TASK_STATUS_TCB_CORRUPTED);
        // Only the stack and the memory segment remain
        assert_eq!(core.load_segments.len(), 2);
    }
}
