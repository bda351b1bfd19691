//! Crash report printing
//!
//! The report layout follows what ESP-IDF users know from `espcoredump.py`:
//! banner-delimited sections for the crashed task, its registers and stack,
//! every thread's backtrace and the memory map.

use std::io::Write;

use tracing::{debug, warn};

use crate::arch::ArchAdapter;
use crate::error::Result;
use crate::gdb::{gdb_thread_to_tcb, GdbSession, GdbTransport};
use crate::image::note::CURR_TASK_MARKER;
use crate::image::{BinaryImage, TaskStatus};
use crate::regions::{reconcile, LeftoverSegment};

const RULE: &str = "===============================================================";

/// Inputs of [`print_report`] besides the GDB session
pub struct ReportContext<'a> {
    pub program: &'a BinaryImage,
    pub core: &'a BinaryImage,
    pub adapter: &'a dyn ArchAdapter,
    pub print_mem: bool,
}

pub fn print_start_banner(out: &mut impl Write) -> Result<()> {
    writeln!(out, "{}", RULE)?;
    writeln!(out, "==================== ESP32 CORE DUMP START ====================")?;
    Ok(())
}

pub fn print_end_banner(out: &mut impl Write) -> Result<()> {
    writeln!(out, "\n===================== ESP32 CORE DUMP END =====================")?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "Done!")?;
    Ok(())
}

/// Everything between the start and end banners
pub async fn print_report<T: GdbTransport>(
    session: &mut GdbSession<T>,
    ctx: &ReportContext<'_>,
    out: &mut impl Write,
) -> Result<()> {
    let tasks = ctx.core.task_statuses();
    let extra = ctx.core.extra_info();

    if let Some(marker) = extra.as_ref().and_then(|e| e.crashed_task()) {
        print_crashed_task_info(session, marker, out).await?;
    }
    if let Some(extra) = &extra {
        if ctx.adapter.isr_context(extra) == Some(true) {
            writeln!(out, "The crash happened in an interrupt handler (ISR context).")?;
        }
    }
    if let Some(reason) = ctx.core.panic_details() {
        writeln!(out, "\nPanic reason: {}", reason)?;
    }
    if let Some(rev) = ctx.core.chip_revision() {
        writeln!(out, "Chip revision: {}", chip_revision_str(rev))?;
    }

    writeln!(out, "\n================== CURRENT THREAD REGISTERS ===================")?;
    if let Some(summary) = ctx.adapter.exception_summary(extra.as_ref()) {
        writeln!(out, "{}", summary)?;
    }
    writeln!(out, "{}", session.run_cmd("info registers").await?)?;

    writeln!(out, "\n==================== CURRENT THREAD STACK =====================")?;
    writeln!(out, "{}", session.run_cmd("bt").await?)?;
    if let Some(task) = tasks.first().filter(|t| t.is_corrupted()) {
        writeln!(out, "The current crashed task is corrupted.")?;
        print_task_status(task, out)?;
    }

    writeln!(out, "\n======================== THREADS INFO =========================")?;
    print_threads_info(session, &tasks, out).await?;

    writeln!(out, "\n\n======================= ALL MEMORY REGIONS ========================")?;
    print_all_memory_regions(ctx.program, ctx.core, out)?;

    if ctx.print_mem {
        writeln!(out, "\n====================== CORE DUMP MEMORY CONTENTS ========================")?;
        print_memory_contents(session, ctx.core, out).await?;
    }
    Ok(())
}

async fn print_crashed_task_info<T: GdbTransport>(
    session: &mut GdbSession<T>,
    marker: u32,
    out: &mut impl Write,
) -> Result<()> {
    if marker == CURR_TASK_MARKER {
        writeln!(out, "\nCrashed task has been skipped.")?;
    } else {
        let name = session.get_freertos_task_name(marker).await;
        writeln!(
            out,
            "\nCrashed task handle: 0x{:x}, name: '{}', GDB name: 'process {}'",
            marker, name, marker
        )?;
    }
    Ok(())
}

fn print_task_status(task: &TaskStatus, out: &mut impl Write) -> Result<()> {
    writeln!(
        out,
        "Task #{} info: flags, tcb, stack ({:x}, {:x}, {:x}).",
        task.index, task.flags, task.tcb_address, task.stack_start
    )?;
    Ok(())
}

async fn print_threads_info<T: GdbTransport>(
    session: &mut GdbSession<T>,
    tasks: &[TaskStatus],
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "{}", session.run_cmd("info threads").await?)?;

    let Some(list) = session.thread_info_with_retry().await else {
        warn!("GDB did not list the threads");
        writeln!(out, "Thread information is not available.")?;
        return Ok(());
    };

    for thread in &list.threads {
        let tcb = match gdb_thread_to_tcb(&thread.target_id) {
            Ok(tcb) => tcb,
            Err(e) => {
                warn!("Skipping thread {}: {}", thread.id, e);
                continue;
            }
        };
        let name = session.get_freertos_task_name(tcb).await;
        session.switch_thread(&thread.id).await?;

        writeln!(
            out,
            "\n==================== THREAD {} (TCB: 0x{:x}, name: '{}') =====================",
            thread.id, tcb, name
        )?;
        writeln!(out, "{}", session.run_cmd("bt").await?)?;

        let task = thread
            .id
            .parse::<usize>()
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|index| tasks.get(index));
        if let Some(task) = task.filter(|t| t.is_corrupted()) {
            writeln!(out, "The task '{}' is corrupted.", thread.id)?;
            print_task_status(task, out)?;
        }
    }
    Ok(())
}

/// Memory map of the program merged with the captured segments
pub fn print_all_memory_regions(
    program: &BinaryImage,
    core: &BinaryImage,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "Name   Address   Size   Attrs")?;
    let reconciled = reconcile(&program.sections, &core.load_segments);
    for region in &reconciled.regions {
        writeln!(
            out,
            "{} 0x{:x} 0x{:x} {}",
            region.name, region.address, region.size, region.attrs
        )?;
    }
    for leftover in &reconciled.leftovers {
        print_segment_line(leftover, out)?;
    }
    Ok(())
}

fn print_segment_line(segment: &LeftoverSegment, out: &mut impl Write) -> Result<()> {
    writeln!(
        out,
        "{} 0x{:x} 0x{:x} {}",
        segment.display_name(),
        segment.address,
        segment.size,
        segment.attrs
    )?;
    Ok(())
}

async fn print_memory_contents<T: GdbTransport>(
    session: &mut GdbSession<T>,
    core: &BinaryImage,
    out: &mut impl Write,
) -> Result<()> {
    for segment in &core.load_segments {
        print_segment_line(&LeftoverSegment::from(segment), out)?;
        let cmd = format!("x/{}x 0x{:x}", segment.size() / 4, segment.address);
        writeln!(out, "{}", session.run_cmd(&cmd).await?)?;
    }
    Ok(())
}

/// `v<major>.<minor>` from the `major * 100 + minor` encoding
pub fn chip_revision_str(rev: u32) -> String {
    format!("v{}.{}", rev / 100, rev % 100)
}

/// Warning text when the core dump was taken from a different build.
///
/// The device stores a prefix of its program's SHA-256 in hex; an empty or
/// all-zero value means it was not recorded.
pub fn sha_mismatch(core: &BinaryImage, program_sha: &str) -> Option<String> {
    let (_, core_sha) = core.core_dump_info()?;
    if core_sha.is_empty() || core_sha.bytes().all(|b| b == b'0') {
        debug!("Core dump does not record the program SHA-256");
        return None;
    }
    if program_sha.starts_with(core_sha.as_str()) {
        return None;
    }
    Some(format!(
        "The core dump was produced by a different program: SHA-256 {} in the core dump, {} for the program ELF",
        core_sha,
        &program_sha[..core_sha.len().min(program_sha.len())]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use goblin::elf::program_header::{PF_R, PF_W, PF_X};
    use goblin::elf::section_header::{SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE};

    use crate::image::note::{self, Note};
    use crate::image::{LoadSegment, NoteSegment, Section, ET_CORE, ET_EXEC};
    use crate::target::EM_RISCV;

    fn program() -> BinaryImage {
        let mut image = BinaryImage::new(ET_EXEC, EM_RISCV);
        image.sections.push(Section {
            name: ".iram0.text".to_string(),
            address: 0x4038_0000,
            size: 0x400,
            flags: (SHF_ALLOC | SHF_EXECINSTR) as u64,
            data: vec![0; 0x400],
        });
        image.sections.push(Section {
            name: ".dram0.bss".to_string(),
            address: 0x3fc8_c000,
            size: 0x100,
            flags: (SHF_ALLOC | SHF_WRITE) as u64,
            data: Vec::new(),
        });
        image
    }

    fn core_with_sha(sha: &str) -> BinaryImage {
        let mut image = BinaryImage::new(ET_CORE, EM_RISCV);
        let mut desc = 0x0005_0002u32.to_le_bytes().to_vec();
        let mut field = [0u8; 64];
        field[..sha.len()].copy_from_slice(sha.as_bytes());
        desc.extend_from_slice(&field);
        image.note_segments.push(NoteSegment {
            notes: vec![Note::new(
                note::NT_ESP_CORE_DUMP_INFO,
                note::CORE_DUMP_INFO_NOTE_NAME,
                desc,
            )],
        });
        image
    }

    #[test]
    fn test_memory_regions_table() {
        let mut core = BinaryImage::new(ET_CORE, EM_RISCV);
        core.load_segments
            .push(LoadSegment::new(0x3fc8_c000, PF_R | PF_W, vec![0; 8]));
        core.load_segments
            .push(LoadSegment::new(0x3fc9_0000, PF_R | PF_W, vec![0; 0x5c]));
        core.load_segments
            .push(LoadSegment::new(0x4000_0000, PF_R | PF_X, vec![0; 0x10]));

        let mut out = Vec::new();
        print_all_memory_regions(&program(), &core, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "Name   Address   Size   Attrs\n\
             .iram0.text 0x40380000 0x400 R X\n\
             .dram0.bss 0x3fc8c000 0x100 RW \n\
             .coredump.tasks.data 0x3fc90000 0x5c RW \n\
             .coredump.rom.text 0x40000000 0x10 R X\n"
        );
    }

    #[test]
    fn test_chip_revision_str() {
        assert_eq!(chip_revision_str(3), "v0.3");
        assert_eq!(chip_revision_str(101), "v1.1");
    }

    #[test]
    fn test_sha_mismatch() {
        let program_sha = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";
        assert_eq!(sha_mismatch(&core_with_sha("a1b2c3d4e"), program_sha), None);
        assert_eq!(sha_mismatch(&core_with_sha(""), program_sha), None);
        assert_eq!(sha_mismatch(&core_with_sha("000000000"), program_sha), None);

        let warning = sha_mismatch(&core_with_sha("ffffffff0"), program_sha).unwrap();
        assert!(warning.contains("ffffffff0"));
        assert!(warning.contains("a1b2c3d4e"));
    }

    #[test]
    fn test_banners() {
        let mut out = Vec::new();
        print_start_banner(&mut out).unwrap();
        print_end_banner(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(RULE));
        assert!(text.ends_with("Done!\n"));
    }
}
