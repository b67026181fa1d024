//! MIL-STD-1750A CPU core: a software simulator for the airborne-computer
//! instruction set, its Memory Management Unit, interrupt/timer subsystem,
//! and the proprietary 32/48-bit floating-point format.
//!
//! This crate owns all simulator state in one [`SimulatorCore`] value —
//! there are no process-wide globals. Host collaborators (an interactive
//! command interpreter, a breakpoint registry, loadfile parsers) are
//! external to this crate and plug in through [`hooks::HostHooks`] and the
//! plain `peek`/`poke`-shaped memory API; see `DESIGN.md` for the full
//! module-by-module grounding.

pub mod arith;
pub mod backtrace;
pub mod chip;
pub mod decode;
mod execute;
pub mod float;
pub mod hooks;
pub mod interrupt;
pub mod memory;
pub mod mmu;
pub mod registers;
pub mod xio;

use emu_core::{Observable, Value};

use backtrace::Backtrace;
use chip::ChipId;
use decode::Opcode;
use execute::{Dispatched, StepAbort};
use hooks::HostHooks;
use interrupt::TimerCore;
use memory::PhysicalMemory;
use mmu::Mmu;
use registers::{Bank, Registers};

/// Named register/control-register query paths, exposed through
/// [`Observable::query_paths`]. Matches the key set in the specification's
/// external-interfaces section (`r0..r15, pir, mk, ft, ic, sw, ta, tb, go,
/// sys`).
const QUERY_PATHS: &[&str] = &[
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "r13", "r14",
    "r15", "pir", "mk", "ft", "ic", "sw", "ta", "tb", "go", "sys",
];

/// The distinguished outcome of `execute_one`/`execute_until_break_or_error`,
/// replacing the original tool's raw `int` return convention (non-negative
/// cycle count / `-1` BREAKPT / `-2` MEMERR) with an exhaustive enum that
/// also carries the host-cancellation case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The instruction ran to completion in this many processor cycles.
    Completed(u32),
    /// A memory breakpoint fired, or the instruction at IC was the explicit
    /// `BPT` opcode (`0xFFFF`). IC is left pointing at the breakpointed
    /// instruction so the host can retry after disarming it.
    Breakpoint,
    /// A memory-protection fault or addressing error occurred; PIR/FT are
    /// already updated and IC was not advanced past the faulting
    /// instruction.
    MemoryFault,
    /// The host's cancellation check requested a stop between instructions.
    /// 1750A state is fully consistent; IC points at the next instruction.
    Cancelled,
}

/// All MIL-STD-1750A simulator state: register file, physical memory, MMU,
/// interrupt/timer core, chip-variant selection, and the backtrace ring
/// buffer. Owns no threads and no interior mutability; every operation is
/// `&mut self` and runs to completion synchronously (§5).
pub struct SimulatorCore {
    pub regs: Registers,
    pub memory: PhysicalMemory,
    pub mmu: Mmu,
    pub timer: TimerCore,
    pub chip: ChipId,
    pub backtrace: Backtrace,
    /// Latched 4-bit BEX immediate, consumed by the next
    /// `workout_interrupts` call that takes the BEX vector.
    pending_bex: Option<u8>,
    /// The most recent fault `execute_one` raised, if any. Cleared at the
    /// start of every `execute_one` call; the host's logger reads it right
    /// after a `StepOutcome::MemoryFault` result to render the "line
    /// describing the fault, the instruction, operands, and IC" (§7).
    last_fault: Option<hooks::FaultEvent>,
}

impl SimulatorCore {
    /// Construct a fresh simulator for `chip`, with zeroed registers, an
    /// identity-mapped MMU, and empty physical memory.
    #[must_use]
    pub fn new(chip: ChipId) -> Self {
        Self {
            regs: Registers::new(),
            memory: PhysicalMemory::new(),
            mmu: Mmu::new(),
            timer: TimerCore::new(),
            chip,
            backtrace: Backtrace::new(),
            pending_bex: None,
            last_fault: None,
        }
    }

    /// The fault diagnostic from the most recently executed instruction, if
    /// it faulted. `None` after any instruction that didn't.
    #[must_use]
    pub fn last_fault(&self) -> Option<hooks::FaultEvent> {
        self.last_fault
    }

    /// Cold restart: zero every register, reset the MMU to its identity
    /// mapping, clear the timer/backtrace, and wipe physical memory
    /// (clearing every allocated page and its written bits). Matches the
    /// host's `init` command — the expected precursor to loading a fresh
    /// object image.
    pub fn init(&mut self) {
        self.reset();
        self.memory.init();
    }

    /// Warm restart: zero every register (IC included) and reset the MMU
    /// to its identity mapping, but leave physical memory untouched so a
    /// previously loaded program can be re-run from its entry point.
    /// Matches the host's `reset` command.
    pub fn reset(&mut self) {
        self.regs = Registers::new();
        self.mmu = Mmu::new();
        self.timer = TimerCore::new();
        self.pending_bex = None;
        self.last_fault = None;
    }

    /// Enable/disable backtrace collection — the host's `speed on|off`
    /// ("need-speed") command.
    pub fn set_need_speed(&mut self, need_speed: bool) {
        self.backtrace.set_enabled(!need_speed);
    }

    /// Translate a logical address through the current MMU page table,
    /// bypassing access-key/lock enforcement (host `tr` command).
    #[must_use]
    pub fn translate(&self, bank: Bank, address_state: u16, logical: u16) -> u32 {
        self.mmu.translate(bank, address_state, logical)
    }

    /// Read a word by logical address, bypassing access-key enforcement
    /// (host `dmem` command — display must work even across a page the
    /// running program itself couldn't reach).
    #[must_use]
    pub fn peek_logical(&mut self, bank: Bank, address_state: u16, logical: u16) -> (u16, bool) {
        let phys = self.mmu.translate(bank, address_state, logical);
        self.memory.peek(phys)
    }

    /// Write a word by logical address, bypassing access-key enforcement
    /// (host `cmem` command).
    pub fn poke_logical(&mut self, bank: Bank, address_state: u16, logical: u16, value: u16) {
        let phys = self.mmu.translate(bank, address_state, logical);
        self.memory.poke(phys, value);
    }

    /// Read a named register (host `dreg` command). See [`QUERY_PATHS`].
    #[must_use]
    pub fn read_register(&self, name: &str) -> Option<u16> {
        self.regs.read_named(name)
    }

    /// Write a named register (host `creg` command). Returns `false` for an
    /// unrecognised name.
    pub fn set_register(&mut self, name: &str, value: u16) -> bool {
        self.regs.write_named(name, value)
    }

    /// Run exactly one instruction. Takes a backtrace snapshot at entry
    /// (before decode) unless backtrace collection is disabled, then
    /// fetches, decodes, and dispatches the opcode at the current IC.
    ///
    /// Ordering matches §5: arithmetic/flag updates happen inside the
    /// handler, strictly before `timer.advance`, which runs strictly
    /// before `workout_interrupts`. The sole exception is block `MOV`,
    /// which performs that whole pipeline once per word moved (it reports
    /// itself as already having done so via `Dispatched::SelfManaged`).
    pub fn execute_one(&mut self, hooks: &mut HostHooks) -> StepOutcome {
        self.backtrace.push(self.regs);
        self.last_fault = None;

        let ic = self.regs.ic;
        let raw = match self.mem_read(hooks, Bank::Code, ic) {
            Ok(word) => word,
            Err(StepAbort::Breakpoint) => return StepOutcome::Breakpoint,
            Err(StepAbort::Fault) => {
                self.note_fault(ic, 0);
                return StepOutcome::MemoryFault;
            }
        };

        // The explicit BPT opcode is indistinguishable from a breakpoint
        // hit from the host's point of view: the instruction never runs
        // and IC stays put for a retry.
        if raw == 0xFFFF {
            return StepOutcome::Breakpoint;
        }

        let op = Opcode::new(raw);
        let mut next_ic = ic.wrapping_add(1);
        match self.dispatch(hooks, op, ic, &mut next_ic) {
            Ok(Dispatched::Normal(cycles)) => {
                self.regs.ic = next_ic;
                self.timer.advance(cycles, self.chip, &mut self.regs);
                interrupt::workout_interrupts(
                    &mut self.regs,
                    &mut self.memory,
                    &self.mmu,
                    self.pending_bex.take(),
                );
                StepOutcome::Completed(cycles)
            }
            Ok(Dispatched::SelfManaged(cycles)) => StepOutcome::Completed(cycles),
            // Block MOV paused between words because `hooks.cancel` fired.
            // IC still points at the MOV opcode (R1/R2/R3 reflect the words
            // already moved), so a later `execute_one` call simply resumes it.
            Ok(Dispatched::Cancelled(_)) => StepOutcome::Cancelled,
            Err(StepAbort::Breakpoint) => StepOutcome::Breakpoint,
            Err(StepAbort::Fault) => {
                self.note_fault(ic, raw);
                StepOutcome::MemoryFault
            }
        }
    }

    /// Record `last_fault` from whatever FT bit the handler just set.
    fn note_fault(&mut self, ic: u16, opcode: u16) {
        if let Some(kind) = hooks::FaultKind::from_ft_register(self.regs.ft) {
            self.last_fault = Some(hooks::FaultEvent { ic, opcode, kind });
        }
    }

    /// Run instructions until one returns something other than `Completed`.
    /// `hooks.cancel` is polled between instructions here and, for block
    /// `MOV`, between words inside a single `execute_one` call — the same
    /// hook serves both granularities (§5, Scenario F).
    pub fn execute_until_break_or_error(&mut self, hooks: &mut HostHooks) -> StepOutcome {
        loop {
            if hooks.cancel.should_cancel() {
                return StepOutcome::Cancelled;
            }
            match self.execute_one(hooks) {
                StepOutcome::Completed(_) => {}
                other => return other,
            }
        }
    }
}

impl Observable for SimulatorCore {
    fn query(&self, path: &str) -> Option<Value> {
        self.regs.read_named(path).map(Value::U16)
    }

    fn query_paths(&self) -> &'static [&'static str] {
        QUERY_PATHS
    }
}
