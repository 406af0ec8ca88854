use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use rv32emu::logging::{self, LogLevel};
use rv32emu::Emulator;

#[derive(Debug, Parser)]
#[command(about = "Functional RV32IMA instruction-set simulator")]
struct Cli {
    /// ELF image to execute
    #[arg(required_unless_present = "kernel")]
    elf: Option<PathBuf>,

    /// Raw kernel image loaded at the DRAM base instead of an ELF
    #[arg(long, conflicts_with = "elf")]
    kernel: Option<PathBuf>,

    /// Device tree blob for the kernel, placed at the DTB address
    #[arg(long, requires = "kernel")]
    dtb: Option<PathBuf>,

    /// Cycle budget; 0 runs until the guest exits
    #[arg(long, default_value_t = 0)]
    max_cycles: u64,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _logger_handle = logging::init(cli.log_level);

    let emulator = match (&cli.elf, &cli.kernel) {
        (Some(elf), None) => Emulator::from_elf(elf),
        (None, Some(kernel)) => Emulator::from_kernel(kernel, cli.dtb.as_deref()),
        _ => unreachable!("clap enforces exactly one image source"),
    };

    let mut emulator = match emulator {
        Ok(emulator) => emulator,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let cycles = emulator.run(cli.max_cycles);

    match emulator.exit_status() {
        Some(0) => {
            eprintln!("PASS ({cycles} cycles)");
            ExitCode::SUCCESS
        }
        Some(code) => {
            eprintln!("FAIL: exit code {code} ({cycles} cycles)");
            ExitCode::from(code.min(255) as u8)
        }
        None if emulator.core().is_finished() => {
            // Exited through the ecall path without touching tohost.
            eprintln!("exited ({cycles} cycles)");
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("TIMEOUT: no exit within {cycles} cycles");
            ExitCode::from(2)
        }
    }
}
