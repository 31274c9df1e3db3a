use anyhow::Context;
use clap::{Parser, Subcommand};
use lr35902::{
    Emulator, RunLimits, START_INSTRUCTION,
    cart::Cartridge,
    cpu::{Cpu, opcode::OpcodeTable},
};
use std::path::PathBuf;
use tracing::metadata::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Runs and inspects Game Boy programs on an LR35902 processor core.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Writes logs as JSON lines instead of the pretty format.
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Executes the program in a ROM file.
    Run {
        /// Path to the ROM file to run.
        #[arg(short, long)]
        rom: PathBuf,
        /// Address to start executing at, in hex. Defaults to the cartridge entry point.
        #[arg(long, value_parser = parse_hex)]
        entry: Option<u16>,
        /// Stops after executing this many instructions.
        #[arg(long)]
        max_steps: Option<u64>,
        /// Stops when the program counter reaches the address, in hex. May be repeated.
        #[arg(long = "break", value_parser = parse_hex)]
        breakpoints: Vec<u16>,
        /// Number of executed instructions kept for the report of a failed step.
        #[arg(long, default_value_t = 250)]
        history: usize,
    },
    /// Prints the instructions of a ROM file without executing them.
    Disasm {
        /// Path to the ROM file to disassemble.
        #[arg(short, long)]
        rom: PathBuf,
        /// Address of the first instruction, in hex.
        #[arg(long, value_parser = parse_hex, default_value = "0x0100")]
        start: u16,
        /// Number of instructions to print.
        #[arg(long, default_value_t = 32)]
        count: usize,
    },
    /// Prints the built-in op code table.
    Opcodes {
        /// Prints the table of op codes following the 0xCB prefix.
        #[arg(long)]
        prefixed: bool,
    },
}

/// Parses a 16-bit address written in hex, with or without a `0x` prefix.
fn parse_hex(s: &str) -> Result<u16, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex address `{}`: {}", s, e))
}

/// Installs the global tracing subscriber. Defaults to INFO logs but allows the RUST_LOG env
/// variable to override.
fn init_tracing(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_level(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_env_filter(filter)
            .init();
    }
}

/// Main entry point into the application.
fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.json_logs);

    match args.command {
        Command::Run {
            rom,
            entry,
            max_steps,
            breakpoints,
            history,
        } => run(rom, entry, max_steps, breakpoints, history),
        Command::Disasm { rom, start, count } => disassemble(rom, start, count),
        Command::Opcodes { prefixed } => {
            for line in OpcodeTable::builtin().summary(prefixed) {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

/// Runs the ROM until a limit is reached. A failed step is reported with the most recently
/// executed instructions.
fn run(
    rom: PathBuf,
    entry: Option<u16>,
    max_steps: Option<u64>,
    breakpoints: Vec<u16>,
    history: usize,
) -> anyhow::Result<()> {
    let cartridge = Cartridge::from_rom_file(&rom).context("create Cartridge from ROM file")?;
    let cpu = Cpu::with_max_history(history);

    let mut emulator = match entry {
        Some(entry) => Emulator::load(cpu, cartridge.image(), entry),
        None => Emulator::from_cartridge(cpu, &cartridge),
    };

    let limits = RunLimits {
        max_steps,
        breakpoints: breakpoints.into_iter().collect(),
    };

    match emulator.run(&limits) {
        Ok(summary) => {
            tracing::info!(
                "stopped at {:#06x} after {} steps: {:?}",
                emulator.cpu().registers().pc,
                summary.steps,
                summary.reason
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("{}", e);
            for instruction in emulator.cpu().history() {
                tracing::error!("    {:#06x}: {}", instruction.address, instruction);
            }
            Err(e).context(format!("run {}", rom.to_string_lossy()))
        }
    }
}

/// Prints `count` instructions starting at `start`, stopping early at the first op code which
/// cannot be decoded.
fn disassemble(rom: PathBuf, start: u16, count: usize) -> anyhow::Result<()> {
    let cartridge = Cartridge::from_rom_file(&rom).context("create Cartridge from ROM file")?;

    let mut cpu = Cpu::new();
    cpu.load(cartridge.image(), START_INSTRUCTION);

    for result in cpu.disassemble(start).take(count) {
        match result {
            Ok(instruction) => {
                let bytes = (0..instruction.length)
                    .map(|i| {
                        let address = instruction.address.wrapping_add(i);
                        format!("{:02X}", cpu.memory().read_u8(address))
                    })
                    .collect::<Vec<_>>()
                    .join(" ");

                println!("{:#06x}  {:<9} {}", instruction.address, bytes, instruction);
            }
            Err(e) => {
                tracing::warn!("disassembly stopped: {}", e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(Ok(0x0150), parse_hex("0x0150"));
        assert_eq!(Ok(0x0150), parse_hex("150"));
        assert_eq!(Ok(0xFFFF), parse_hex("0XFFFF"));
        assert!(parse_hex("0x10000").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "lr35902", "run", "--rom", "blue.gb", "--break", "0x150", "--break", "0200",
        ])
        .expect("valid arguments");

        match args.command {
            Command::Run {
                entry,
                breakpoints,
                history,
                ..
            } => {
                assert_eq!(None, entry);
                assert_eq!(vec![0x0150, 0x0200], breakpoints);
                assert_eq!(250, history);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
