pub mod cart;
pub mod cpu;
pub mod error;
pub mod mem;

use crate::{cart::Cartridge, cpu::Cpu, error::StepError};

use std::collections::HashSet;

/// Contains the memory address the program counter should be set to in order to start executing
/// the cartridge instructions.
pub const START_INSTRUCTION: u16 = 0x0100;

/// Conditions which stop [`Emulator::run`] before an error does.
#[derive(Clone, Debug, Default)]
pub struct RunLimits {
    /// Maximum number of instructions to execute.
    pub max_steps: Option<u64>,
    /// Addresses which stop the run once the program counter reaches them.
    pub breakpoints: HashSet<u16>,
}

/// Why [`Emulator::run`] returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopReason {
    /// The maximum number of steps was executed.
    StepLimit,
    /// The program counter reached a breakpoint.
    Breakpoint(u16),
}

/// Outcome of a run which stopped without an error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunSummary {
    /// Why the run stopped.
    pub reason: StopReason,
    /// Number of instructions executed.
    pub steps: u64,
}

/// The [`Emulator`] struct is the container that drives the [`Cpu`] over a loaded program image.
#[derive(Debug)]
pub struct Emulator {
    /// [`Cpu`] that is responsible for reading, decoding and executing instructions.
    cpu: Cpu,
}

impl Emulator {
    /// Creates a new [`Emulator`] which runs the image from the entry address.
    pub fn load(mut cpu: Cpu, image: &[u8], entry: u16) -> Self {
        cpu.load(image, entry);
        Self { cpu }
    }
    /// Creates a new [`Emulator`] which runs the mapped part of the [`Cartridge`].
    pub fn from_cartridge(cpu: Cpu, cartridge: &Cartridge) -> Self {
        tracing::info!(
            "load cartridge '{}' ({})",
            cartridge.name,
            cartridge.header.title
        );

        Self::load(cpu, cartridge.image(), START_INSTRUCTION)
    }
    /// Returns the [`Cpu`].
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }
    /// Returns the [`Cpu`] for modification.
    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }
    /// Executes exactly one instruction.
    pub fn step(&mut self) -> Result<(), StepError> {
        self.cpu.step().map(|_| ())
    }
    /// Runs the emulator until one of the limits is reached or a step fails. Breakpoints are
    /// checked after each step, so a run always executes at least one instruction unless the
    /// step limit is zero.
    pub fn run(&mut self, limits: &RunLimits) -> Result<RunSummary, StepError> {
        let mut steps: u64 = 0;

        let reason = loop {
            if limits.max_steps.is_some_and(|max| steps >= max) {
                break StopReason::StepLimit;
            }

            self.cpu.step()?;
            steps += 1;

            let pc = self.cpu.registers().pc;
            if limits.breakpoints.contains(&pc) {
                break StopReason::Breakpoint(pc);
            }
        };

        tracing::info!("run stopped after {} steps: {:?}", steps, reason);

        Ok(RunSummary { reason, steps })
    }
}
