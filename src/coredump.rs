//! Core dump inspection flow: acquire a core, then drive GDB over it

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::arch;
use crate::config::Config;
use crate::error::{CoreDumpError, GdbError, Result};
use crate::format::{detect_format, CoreFormat};
use crate::gdb::{symbol_file_command, GdbSession, GdbTransport, ProcessTransport};
use crate::image::BinaryImage;
use crate::loader::{
    self, load_from_bytes, load_from_flash, parse_version_word, EsptoolFlashReader, FlashReader,
    LoadOptions, SnapshotMetadata,
};
use crate::report::{self, ReportContext};
use crate::target::{ArchFamily, Chip};

/// Per-run options of the `dbg-corefile` and `info-corefile` operations
#[derive(Debug, Clone, Default)]
pub struct CoreDumpOptions {
    /// Program ELF the core dump belongs to
    pub prog: Option<PathBuf>,
    /// Core dump file; `None` reads it from flash
    pub core: Option<PathBuf>,
    pub core_format: Option<CoreFormat>,
    pub save_core: Option<PathBuf>,
    pub rom_elf: Option<PathBuf>,
    pub print_mem: bool,
}

/// A core file ready for GDB
pub struct AcquiredCore {
    pub path: PathBuf,
    /// Present when the core was decoded or reconstructed; owns the temp files
    pub metadata: Option<SnapshotMetadata>,
}

pub struct CoreDump {
    config: Config,
    options: CoreDumpOptions,
    prog: PathBuf,
    flash_reader: Option<Box<dyn FlashReader>>,
}

impl CoreDump {
    pub fn new(config: Config, options: CoreDumpOptions) -> Result<Self> {
        let prog = options.prog.clone().ok_or_else(|| {
            CoreDumpError::Configuration("Path to program's ELF binary is not provided".to_string())
        })?;
        config.validate()?;
        Ok(Self {
            config,
            options,
            prog,
            flash_reader: None,
        })
    }

    /// Use `reader` instead of esptool for flash access and chip detection
    pub fn with_flash_reader(mut self, reader: Box<dyn FlashReader>) -> Self {
        self.flash_reader = Some(reader);
        self
    }

    fn flash_reader(&mut self) -> Result<&mut dyn FlashReader> {
        if self.flash_reader.is_none() {
            let esptool = &self.config.esptool;
            let reader = EsptoolFlashReader::new(
                esptool.path.clone(),
                esptool.chip()?,
                esptool.port.clone(),
                esptool.baud,
            );
            self.flash_reader = Some(Box::new(reader));
        }
        match self.flash_reader.as_deref_mut() {
            Some(reader) => Ok(reader),
            None => Err(CoreDumpError::Transport("No flash reader available".to_string())),
        }
    }

    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            program: Some(self.prog.clone()),
            flash_offset: self.config.flash.coredump_offset,
            partition_table_offset: Some(self.config.flash.partition_table_offset),
        }
    }

    /// Locate or reconstruct the ELF core
    pub fn acquire_core(&mut self) -> Result<AcquiredCore> {
        let options = self.load_options();

        let metadata = match self.options.core.clone() {
            None => {
                info!("No core file given, reading the core dump from flash");
                load_from_flash(self.flash_reader()?, &options)?
            }
            Some(path) => {
                let format = self.options.core_format.unwrap_or(CoreFormat::Auto);
                if format == CoreFormat::Elf {
                    return Ok(AcquiredCore { path, metadata: None });
                }
                let data = std::fs::read(&path).map_err(|e| {
                    CoreDumpError::Configuration(format!(
                        "Cannot read core file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let format = match format {
                    CoreFormat::Auto => {
                        let detected = detect_format(&data).format;
                        info!("Detected core dump format: {}", detected);
                        detected
                    }
                    other => other,
                };
                if format == CoreFormat::Elf {
                    return Ok(AcquiredCore { path, metadata: None });
                }
                load_from_bytes(&data, format, &options)?
            }
        };

        if let Some(save_path) = &self.options.save_core {
            std::fs::copy(&metadata.core_path, save_path)?;
            info!("Core file saved to {}", save_path.display());
        }
        Ok(AcquiredCore {
            path: metadata.core_path.clone(),
            metadata: Some(metadata),
        })
    }

    /// Chip named by the snapshot header, the core's info note, the
    /// configuration or, as a last resort, the device itself
    pub fn resolve_target(&mut self, acquired: &AcquiredCore, core: &BinaryImage) -> Result<Chip> {
        if let Some(chip) = acquired.metadata.as_ref().and_then(|m| m.target) {
            return Ok(chip);
        }
        if let Some((chip, _)) = core
            .core_dump_info()
            .and_then(|(version, _)| parse_version_word(version))
        {
            debug!("Target {} taken from the core dump info note", chip);
            return Ok(chip);
        }
        if let Some(chip) = self.config.esptool.chip()? {
            return Ok(chip);
        }
        self.flash_reader()?.detect_target()
    }

    /// GDB executable for `chip`
    pub fn gdb_path(&self, chip: Chip) -> Result<String> {
        if let Some(path) = &self.config.gdb.path {
            return Ok(path.clone());
        }
        let name = chip.family().gdb_name();
        match which(name) {
            Some(path) => {
                debug!("Found {} at {}", name, path.display());
                Ok(name.to_string())
            }
            None => Err(CoreDumpError::DebuggerUnavailable {
                name: name.to_string(),
                guidance: "Please run: $IDF_PATH/install.sh".to_string(),
            }),
        }
    }

    pub fn rom_elf_path(&self, chip: Chip) -> PathBuf {
        if let Some(path) = &self.options.rom_elf {
            return path.clone();
        }
        let name = chip.rom_elf_name();
        match &self.config.rom.elf_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    /// `add-symbol-file` command for the ROM ELF, if the file exists
    fn rom_symbol_command(&self, chip: Chip) -> Option<String> {
        let path = self.rom_elf_path(chip);
        if !path.exists() {
            debug!("ROM ELF {} not found, ROM symbols not loaded", path.display());
            return None;
        }
        match BinaryImage::open(&path) {
            Ok(rom) => symbol_file_command(&path, &rom),
            Err(e) => {
                warn!("Ignoring ROM ELF: {}", e);
                None
            }
        }
    }

    /// GDB executable and its arguments. Interactive sessions skip the MI
    /// interpreter flags.
    pub fn gdb_args(&self, chip: Chip, core_path: &Path, interactive: bool) -> Result<(String, Vec<String>)> {
        let gdb = self.gdb_path(chip)?;
        let mut args = Vec::new();

        match &self.config.gdb.extra_gdbinit_file {
            Some(init) => {
                if !init.is_file() {
                    return Err(CoreDumpError::Configuration(format!(
                        "{} does not exist",
                        init.display()
                    )));
                }
                args.push(format!("-x={}", init.display()));
            }
            None => args.push("--nx".to_string()),
        }

        if !interactive {
            args.push("--nw".to_string());
            args.push("--quiet".to_string());
            args.push("--interpreter=mi2".to_string());
        }

        args.push(format!("--core={}", core_path.display()));
        if let Some(cmd) = self.rom_symbol_command(chip) {
            args.push("-ex".to_string());
            args.push(cmd);
        }
        args.push(self.prog.display().to_string());
        Ok((gdb, args))
    }

    fn gdb_timeout(&self) -> Duration {
        Duration::from_secs(self.config.gdb.timeout_sec)
    }

    /// Print the crash report, running GDB as a child process
    pub async fn info_corefile(&mut self, out: &mut impl Write) -> Result<()> {
        self.info_corefile_with(
            |program, args| async move { ProcessTransport::spawn(&program, &args) },
            out,
        )
        .await
    }

    /// Print the crash report over the transport returned by `connect`,
    /// which receives the GDB executable and its arguments
    pub async fn info_corefile_with<T, F, Fut>(&mut self, connect: F, out: &mut impl Write) -> Result<()>
    where
        T: GdbTransport,
        F: FnOnce(String, Vec<String>) -> Fut,
        Fut: Future<Output = std::result::Result<T, GdbError>>,
    {
        let program = BinaryImage::open(&self.prog)?;
        let acquired = self.acquire_core()?;
        let core = BinaryImage::open(&acquired.path)?;

        if program.machine != core.machine {
            return Err(CoreDumpError::ArchitectureMismatch {
                program: program.machine,
                core: core.machine,
            });
        }
        let adapter = arch::for_machine(core.machine).ok_or_else(|| {
            CoreDumpError::Image(format!("Unsupported machine type {}", core.machine))
        })?;
        let chip = self.resolve_target(&acquired, &core)?;
        check_family(chip, core.machine)?;

        match loader::program_sha256(&self.prog) {
            Ok(sha) => {
                if let Some(warning) = report::sha_mismatch(&core, &sha) {
                    warn!("{}", warning);
                }
            }
            Err(e) => debug!("Cannot hash program: {}", e),
        }

        report::print_start_banner(out)?;

        let (gdb, args) = self.gdb_args(chip, &acquired.path, false)?;
        let transport = connect(gdb, args).await?;
        let mut session = GdbSession::start(transport, self.gdb_timeout()).await?;

        let ctx = ReportContext {
            program: &program,
            core: &core,
            adapter: adapter.as_ref(),
            print_mem: self.options.print_mem,
        };
        let result = report::print_report(&mut session, &ctx, out).await;
        session.close().await;
        result?;

        report::print_end_banner(out)?;
        Ok(())
    }

    /// Run GDB interactively on the core until the user quits
    pub async fn dbg_corefile(&mut self) -> Result<()> {
        let program = BinaryImage::open(&self.prog)?;
        let acquired = self.acquire_core()?;
        let core = BinaryImage::open(&acquired.path)?;
        if program.machine != core.machine {
            return Err(CoreDumpError::ArchitectureMismatch {
                program: program.machine,
                core: core.machine,
            });
        }
        let chip = self.resolve_target(&acquired, &core)?;
        let (gdb, args) = self.gdb_args(chip, &acquired.path, true)?;

        info!("Starting GDB: {} {}", gdb, args.join(" "));
        let status = tokio::process::Command::new(&gdb)
            .args(&args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| GdbError::LaunchFailed(format!("Failed to spawn {}: {}", gdb, e)))?;
        debug!("GDB exited: {}", status);
        println!("Done!");
        Ok(())
    }
}

/// A chip override must agree with the core's architecture
fn check_family(chip: Chip, machine: u16) -> Result<()> {
    match ArchFamily::from_machine(machine) {
        Some(family) if family != chip.family() => Err(CoreDumpError::ArchitectureMismatch {
            program: chip.family().machine(),
            core: machine,
        }),
        _ => Ok(()),
    }
}

/// Find an executable on PATH
pub fn which(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
