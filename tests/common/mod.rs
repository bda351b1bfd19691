//! Shared fixtures: raw snapshots, program images and scripted GDB sessions

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use base64::Engine;
use goblin::elf::section_header::{SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE};

use esp_coredump::gdb::{ScriptedTransport, HANDSHAKE_COMMAND};
use esp_coredump::image::{BinaryImage, Section, ET_EXEC};
use esp_coredump::loader::ChecksumKind;
use esp_coredump::target::{ArchFamily, Chip};

pub const TCB_SIZE: u32 = 0x5c;
pub const STACK_LEN: u32 = 0x100;
pub const SEGMENT_LEN: u32 = 8;

/// Addresses used by a fixture snapshot
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub chip: Chip,
    pub tcb: u32,
    pub stack_top: u32,
    pub data: u32,
}

impl Layout {
    pub fn new(chip: Chip) -> Self {
        let (dram, _) = chip.dram_range();
        Self {
            chip,
            tcb: dram + 0x3000,
            stack_top: dram + 0x2000,
            data: dram + 0x4000,
        }
    }

    pub fn text_address(&self) -> u32 {
        match self.chip.family() {
            ArchFamily::Xtensa => 0x400d_0000,
            ArchFamily::RiscV => 0x4200_0000,
        }
    }
}

/// Register frame the task stack starts with
fn stack_frame(layout: &Layout) -> Vec<u32> {
    let pc = layout.text_address() + 0x24;
    match layout.chip.family() {
        ArchFamily::Xtensa => {
            let mut frame = vec![0u32; 25];
            frame[0] = 0x4008_1234; // exit: exception frame
            frame[1] = pc;
            frame[2] = 0x0006_0030;
            for (i, word) in frame[3..19].iter_mut().enumerate() {
                *word = 0x1000 + i as u32;
            }
            frame[20] = 29; // StoreProhibited
            frame[21] = 0x0000_0004;
            frame
        }
        ArchFamily::RiscV => {
            let mut frame: Vec<u32> = (0..32).map(|i| 0x100 + i).collect();
            frame[0] = pc;
            frame
        }
    }
}

/// A BIN_V2 snapshot with one task and one memory segment, CRC32 protected
pub fn raw_snapshot(layout: &Layout) -> Vec<u8> {
    raw_snapshot_with_tcb(layout, layout.tcb)
}

pub fn raw_snapshot_with_tcb(layout: &Layout, tcb: u32) -> Vec<u8> {
    let mut body = Vec::new();
    for w in [tcb, layout.stack_top, layout.stack_top + STACK_LEN] {
        body.extend_from_slice(&w.to_le_bytes());
    }
    body.extend(vec![0x5a; TCB_SIZE as usize]);
    body.resize((body.len() + 3) & !3, 0);

    let mut stack: Vec<u8> = stack_frame(layout)
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect();
    stack.resize(STACK_LEN as usize, 0);
    body.extend(stack);

    for w in [layout.data, SEGMENT_LEN] {
        body.extend_from_slice(&w.to_le_bytes());
    }
    body.extend([0xc3; SEGMENT_LEN as usize]);

    let version_word = (layout.chip.chip_id() as u32) << 16 | 0x0002;
    let total_len = 20 + body.len() + 4;
    let mut dump = Vec::new();
    for w in [total_len as u32, version_word, 1, TCB_SIZE, 1] {
        dump.extend_from_slice(&w.to_le_bytes());
    }
    dump.extend(body);
    let crc = ChecksumKind::Crc32.compute(&dump);
    dump.extend(crc);
    dump
}

/// The snapshot as the device prints it on the console
pub fn base64_snapshot(raw: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
    let mut text = String::from("================= CORE DUMP START =================\n");
    for chunk in encoded.as_bytes().chunks(76) {
        text.push_str(&String::from_utf8_lossy(chunk));
        text.push('\n');
    }
    text.push_str("================= CORE DUMP END =================\n");
    text
}

/// Program ELF with a text section and the data section the snapshot covers
pub fn program_image(layout: &Layout) -> BinaryImage {
    let mut program = BinaryImage::new(ET_EXEC, layout.chip.family().machine());
    program.entry = layout.text_address() as u64;
    program.sections.push(Section {
        name: ".flash.text".to_string(),
        address: layout.text_address() as u64,
        size: 0x80,
        flags: (SHF_ALLOC | SHF_EXECINSTR) as u64,
        data: vec![0x13; 0x80],
    });
    program.sections.push(Section {
        name: ".dram0.data".to_string(),
        address: layout.data as u64,
        size: 0x40,
        flags: (SHF_ALLOC | SHF_WRITE) as u64,
        data: vec![0; 0x40],
    });
    program
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).expect("write fixture");
    path
}

/// GDB that knows one task, named `main`
pub fn scripted_gdb(layout: &Layout) -> ScriptedTransport {
    let pc = layout.text_address() + 0x24;
    ScriptedTransport::new()
        .with_banner(&["=thread-group-added,id=\"i1\"", "(gdb) "])
        .on(
            HANDSHAKE_COMMAND,
            &[format!("^done,register-values=[{{number=\"0\",value=\"0x{:x}\"}}]", pc).as_str()],
        )
        .on_expression(
            &format!("(char*)((TCB_t *)0x{:x})->pcTaskName", layout.tcb),
            &format!("0x{:x} \"main\"", layout.tcb + 0x34),
        )
        .on_console(
            "info registers",
            &format!("pc             0x{:x}\t0x{:x} <app_main+36>", pc, pc),
        )
        .on_console("bt", "#0  0x400d0024 in app_main () at main/app.c:12")
        .on_console(
            "info threads",
            &format!(
                "  Id   Target Id          Frame \n* 1    process {} 0x{:x} in app_main ()",
                layout.tcb, pc
            ),
        )
        .on(
            "-thread-info",
            &[format!(
                "^done,threads=[{{id=\"1\",target-id=\"process {}\",state=\"stopped\"}}],current-thread-id=\"1\"",
                layout.tcb
            )
            .as_str()],
        )
        .on("-thread-select 1", &["^done,new-thread-id=\"1\""])
        .on("-gdb-exit", &["^exit"])
}
