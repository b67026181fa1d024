//! Whole-instruction integration tests: assemble a short program directly
//! into code memory and drive it through the public `SimulatorCore` API one
//! instruction at a time, the way `mos-6502/tests/instructions.rs` exercises
//! its CPU through `Bus`/`Cpu` rather than reaching into private state.

use cpu_1750a::chip::ChipId;
use cpu_1750a::hooks::{ConsoleSink, HostHooks, NeverCancel, NoBreakpoints, NoUserXio};
use cpu_1750a::registers::Bank;
use cpu_1750a::xio;
use cpu_1750a::{SimulatorCore, StepOutcome};

/// Collects every byte written through the XIO `CO` console opcode.
#[derive(Default)]
struct CapturingConsole {
    bytes: Vec<u8>,
}

impl ConsoleSink for CapturingConsole {
    fn write_byte(&mut self, byte: u8) {
        self.bytes.push(byte);
    }
}

/// Write a one- or two-word instruction sequence into `(Code, AS=0)`
/// starting at logical address 0.
fn load_program(core: &mut SimulatorCore, words: &[u16]) {
    for (i, &word) in words.iter().enumerate() {
        core.poke_logical(Bank::Code, 0, i as u16, word);
    }
}

fn step(core: &mut SimulatorCore, hooks: &mut HostHooks) -> StepOutcome {
    let outcome = core.execute_one(hooks);
    assert!(
        matches!(outcome, StepOutcome::Completed(_)),
        "expected instruction to complete, got {outcome:?}"
    );
    outcome
}

/// `0x4A` immediate-long: `reg op.lower() <- imm` for `subop` in
/// `{0=Add,1=Sub,2=Cmp,3=Load,4=And,5=Or,6=Xor}`. Returns the two words
/// (opcode, immediate) to splice into a program.
fn imm_long(reg: u8, subop: u8, imm: u16) -> [u16; 2] {
    [0x4A00 | (u16::from(reg) << 4) | u16::from(subop), imm]
}

fn no_cancel_hooks<'a>(
    bp: &'a NoBreakpoints,
    con: &'a mut dyn ConsoleSink,
    ux: &'a mut NoUserXio,
    cancel: &'a mut NeverCancel,
) -> HostHooks<'a> {
    HostHooks::new(bp, con, ux, cancel)
}

#[test]
fn ar_add_then_store_round_trips_through_memory() {
    let mut core = SimulatorCore::new(ChipId::Standard);
    let program = [
        imm_long(1, 3, 10), // R1 = 10
        imm_long(2, 3, 32), // R2 = 32
    ]
    .concat();
    let mut program: Vec<u16> = program;
    program.push(0xA100 | (1 << 4) | 2); // AR R1, R2  (R1 += R2)
    program.push(0x9000 | (1 << 4)); // ST R1, <ext>  (index=0)
    program.push(0x2000); // destination address 0x2000
    load_program(&mut core, &program);

    let bp = NoBreakpoints;
    let mut con = CapturingConsole::default();
    let mut ux = NoUserXio;
    let mut cancel = NeverCancel;
    let mut h = no_cancel_hooks(&bp, &mut con, &mut ux, &mut cancel);

    for _ in 0..4 {
        step(&mut core, &mut h);
    }

    assert_eq!(core.regs.r[1], 42);
    assert_eq!(core.peek_logical(Bank::Data, 0, 0x2000).0, 42);
}

#[test]
fn conditional_branch_skips_the_false_path() {
    let mut core = SimulatorCore::new(ChipId::Standard);
    let mut program = Vec::new();
    program.extend(imm_long(3, 3, 5)); // R3 = 5        (IC 0..1)
    program.extend(imm_long(4, 3, 5)); // R4 = 5        (IC 2..3)
    program.extend(imm_long(8, 3, 0x9999)); // R8 = wrong-path sentinel (IC 4..5)
    program.extend(imm_long(9, 3, 0x8888)); // R9 = right-path sentinel (IC 6..7)
    program.push(0xA600 | (3 << 4) | 4); // CR R3, R4             (IC 8)
    program.push(0x5100 | 1); // BEZ +1 (branch if zero)  (IC 9)
    program.push(0xA700 | (10 << 4) | 8); // MOVE R10, R8 (wrong path) (IC 10)
    program.push(0xA700 | (10 << 4) | 9); // MOVE R10, R9 (right path) (IC 11)
    load_program(&mut core, &program);

    let bp = NoBreakpoints;
    let mut con = CapturingConsole::default();
    let mut ux = NoUserXio;
    let mut cancel = NeverCancel;
    let mut h = no_cancel_hooks(&bp, &mut con, &mut ux, &mut cancel);

    // imm x4, compare, branch, move = 7 executed instructions; IC 10 is
    // skipped entirely.
    for _ in 0..7 {
        step(&mut core, &mut h);
    }

    assert_eq!(core.regs.r[10], 0x8888, "branch should have skipped the wrong-path MOVE");
    assert_eq!(core.regs.ic, 12);
}

#[test]
fn stack_push_then_pop_round_trips() {
    let mut core = SimulatorCore::new(ChipId::Standard);
    let mut program = Vec::new();
    program.extend(imm_long(5, 3, 0x1234)); // R5 = 0x1234     (IC 0..1)
    program.push(0x2300 | (5 << 4)); // LSTI R5 (push)         (IC 2)
    program.extend(imm_long(5, 3, 0)); // R5 = 0 (so pop must restore it) (IC 3..4)
    program.push(0x2200 | (6 << 4)); // LST R6 (pop)           (IC 5)
    load_program(&mut core, &program);

    let bp = NoBreakpoints;
    let mut con = CapturingConsole::default();
    let mut ux = NoUserXio;
    let mut cancel = NeverCancel;
    let mut h = no_cancel_hooks(&bp, &mut con, &mut ux, &mut cancel);

    for _ in 0..4 {
        step(&mut core, &mut h);
    }

    assert_eq!(core.regs.r[6], 0x1234);
    assert_eq!(core.regs.r[15], 0, "stack pointer should be back where it started");
}

#[test]
fn shift_left_by_variable_distance() {
    let mut core = SimulatorCore::new(ChipId::Standard);
    let mut program = Vec::new();
    program.extend(imm_long(7, 3, 1)); // R7 = 1          (IC 0..1)
    program.push(0x6000 | (3 << 4) | 7); // SLL R7, count=4 (upper+1)  (IC 2)
    load_program(&mut core, &program);

    let bp = NoBreakpoints;
    let mut con = CapturingConsole::default();
    let mut ux = NoUserXio;
    let mut cancel = NeverCancel;
    let mut h = no_cancel_hooks(&bp, &mut con, &mut ux, &mut cancel);

    for _ in 0..2 {
        step(&mut core, &mut h);
    }

    assert_eq!(core.regs.r[7], 16);
}

#[test]
fn xio_console_output_reaches_the_host_sink() {
    let mut core = SimulatorCore::new(ChipId::Standard);
    let mut program = Vec::new();
    program.extend(imm_long(2, 3, u16::from(b'A'))); // R2 = 'A'  (IC 0..1)
    program.push(0x2000 | (2 << 4)); // XIO R2, <ext>             (IC 2)
    program.push(xio::addr::CO); // command word                 (IC 3)
    load_program(&mut core, &program);

    let bp = NoBreakpoints;
    let mut con = CapturingConsole::default();
    let mut ux = NoUserXio;
    let mut cancel = NeverCancel;
    let mut h = no_cancel_hooks(&bp, &mut con, &mut ux, &mut cancel);

    for _ in 0..2 {
        step(&mut core, &mut h);
    }

    assert_eq!(con.bytes, vec![b'A']);
}

#[test]
fn bex_vectors_through_the_bex_indexed_service_slot() {
    let mut core = SimulatorCore::new(ChipId::Standard);

    // Vector table (Code, AS=0): LP/SVP for BEX (source index 5).
    core.poke_logical(Bank::Code, 0, 0x20 + 2 * 5, 0x0600); // LP
    core.poke_logical(Bank::Code, 0, 0x20 + 2 * 5 + 1, 0x0700); // SVP

    // Service area (Data, AS=0): new MK, new SW (AS=3), then 16 BEX-index
    // IC slots starting at SVP+2; this program uses BEX index 3.
    core.poke_logical(Bank::Data, 0, 0x0700, 0x0001); // new MK
    core.poke_logical(Bank::Data, 0, 0x0701, 0x0003); // new SW (AS=3)
    core.poke_logical(Bank::Data, 0, 0x0700 + 2 + 3, 0x9000); // new IC

    // BEX opcode with the 4-bit immediate (index) in the low nibble.
    core.poke_logical(Bank::Code, 0, 0, 0x5F00 | 3);

    let bp = NoBreakpoints;
    let mut con = CapturingConsole::default();
    let mut ux = NoUserXio;
    let mut cancel = NeverCancel;
    let mut h = no_cancel_hooks(&bp, &mut con, &mut ux, &mut cancel);

    step(&mut core, &mut h);

    assert_eq!(core.regs.ic, 0x9000);
    assert_eq!(core.regs.mk, 0x0001);
    assert_eq!(core.regs.sw, 0x0003);
    assert_eq!(core.regs.pir & cpu_1750a::registers::pir::BEX, 0, "BEX bit should be cleared by the vector switch");
}
