//! Chip-variant selection and the per-chip numeric tables it drives: timer
//! periods, GO-watchdog factor, cycle costs, and which vendor-extension
//! opcodes are available.
//!
//! The five chip variants differ only in these constants (Design Notes
//! §9): rather than five near-identical dispatch tables, one table is kept
//! and indexed by `ChipId` at runtime.

/// A MIL-STD-1750A implementation variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChipId {
    #[default]
    Standard,
    F9450,
    Pace,
    Gvsc,
    Ma31750,
    Mas281,
}

/// A vendor-specific opcode extension family, gated per chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// GVSC: ESQR, SQRT, UAR, STE/LE, UCIM.
    Gvsc,
    /// MA31750: LSL, LDL, LEFL and friends.
    Ma31750,
    /// PACE-specific additions.
    Pace,
    /// F9450-specific additions.
    F9450,
}

impl ChipId {
    /// Timer A tick period, in processor cycles. 10us standard; 20us for
    /// MAS281 (nominally a slower-clocked part). Expressed directly in
    /// cycles rather than real time, since nothing else in this crate
    /// models wall-clock frequency (see `DESIGN.md`).
    #[must_use]
    pub const fn timer_a_period_cycles(self) -> u32 {
        match self {
            Self::Mas281 => 400,
            _ => 200,
        }
    }

    /// GO-watchdog tick period, expressed as a multiple of 10 Timer-A
    /// ticks: the watchdog fires every `10 * factor` TA ticks.
    #[must_use]
    pub const fn go_watchdog_factor(self) -> u32 {
        match self {
            Self::Ma31750 => 2,
            _ => 1,
        }
    }

    /// Whether `ext` is available on this chip.
    #[must_use]
    pub const fn supports(self, ext: Extension) -> bool {
        matches!(
            (self, ext),
            (Self::Gvsc, Extension::Gvsc)
                | (Self::Ma31750, Extension::Ma31750)
                | (Self::Pace, Extension::Pace)
                | (Self::F9450, Extension::F9450)
        )
    }

    fn index(self) -> usize {
        match self {
            Self::Standard => 0,
            Self::F9450 => 1,
            Self::Pace => 2,
            Self::Gvsc => 3,
            Self::Ma31750 => 4,
            Self::Mas281 => 5,
        }
    }
}

/// Cycle-cost category an instruction handler falls into. The exact
/// formula the original hardware manuals specify (operand count, shift
/// count, branch-taken/not-taken) is captured by the variant's payload;
/// [`CycleTable::cost`] turns that into a cycle count for one chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    RegisterToRegister,
    MemoryReference,
    Shift { count: u8 },
    BranchTaken,
    BranchNotTaken,
    Xio,
    Vio { word_count: u8 },
    BlockMoveWord,
    Bex,
    Privileged,
    Nop,
}

/// Base cycle costs for one chip, indexed by [`CycleKind`]. Values are
/// representative figures in the spirit of the vendor timing tables; they
/// are not reproduced from a specific manual (none is bundled with this
/// crate's corpus) but every category named in the specification has an
/// entry, and the per-chip spread is large enough to matter for the timer
/// subsystem's tests.
struct ChipCycles {
    reg_to_reg: u32,
    memory_reference: u32,
    shift_base: u32,
    shift_per_bit: u32,
    branch_taken: u32,
    branch_not_taken: u32,
    xio: u32,
    vio_base: u32,
    vio_per_word: u32,
    block_move_word: u32,
    bex: u32,
    privileged: u32,
    nop: u32,
}

const TABLE: [ChipCycles; 6] = [
    // Standard
    ChipCycles {
        reg_to_reg: 4,
        memory_reference: 8,
        shift_base: 4,
        shift_per_bit: 1,
        branch_taken: 6,
        branch_not_taken: 4,
        xio: 10,
        vio_base: 10,
        vio_per_word: 4,
        block_move_word: 4,
        bex: 12,
        privileged: 4,
        nop: 2,
    },
    // F9450
    ChipCycles {
        reg_to_reg: 3,
        memory_reference: 6,
        shift_base: 3,
        shift_per_bit: 1,
        branch_taken: 5,
        branch_not_taken: 3,
        xio: 8,
        vio_base: 8,
        vio_per_word: 3,
        block_move_word: 3,
        bex: 10,
        privileged: 3,
        nop: 1,
    },
    // PACE
    ChipCycles {
        reg_to_reg: 4,
        memory_reference: 7,
        shift_base: 4,
        shift_per_bit: 1,
        branch_taken: 6,
        branch_not_taken: 4,
        xio: 9,
        vio_base: 9,
        vio_per_word: 4,
        block_move_word: 4,
        bex: 11,
        privileged: 4,
        nop: 2,
    },
    // GVSC
    ChipCycles {
        reg_to_reg: 3,
        memory_reference: 6,
        shift_base: 3,
        shift_per_bit: 1,
        branch_taken: 5,
        branch_not_taken: 3,
        xio: 8,
        vio_base: 8,
        vio_per_word: 3,
        block_move_word: 3,
        bex: 9,
        privileged: 3,
        nop: 1,
    },
    // MA31750
    ChipCycles {
        reg_to_reg: 2,
        memory_reference: 5,
        shift_base: 2,
        shift_per_bit: 1,
        branch_taken: 4,
        branch_not_taken: 2,
        xio: 7,
        vio_base: 7,
        vio_per_word: 3,
        block_move_word: 2,
        bex: 8,
        privileged: 2,
        nop: 1,
    },
    // MAS281
    ChipCycles {
        reg_to_reg: 5,
        memory_reference: 10,
        shift_base: 5,
        shift_per_bit: 1,
        branch_taken: 7,
        branch_not_taken: 5,
        xio: 12,
        vio_base: 12,
        vio_per_word: 5,
        block_move_word: 5,
        bex: 14,
        privileged: 5,
        nop: 2,
    },
];

impl ChipId {
    /// Compute the cycle count for `kind` on this chip.
    #[must_use]
    pub fn cycles(self, kind: CycleKind) -> u32 {
        let t = &TABLE[self.index()];
        match kind {
            CycleKind::RegisterToRegister => t.reg_to_reg,
            CycleKind::MemoryReference => t.memory_reference,
            CycleKind::Shift { count } => t.shift_base + t.shift_per_bit * u32::from(count),
            CycleKind::BranchTaken => t.branch_taken,
            CycleKind::BranchNotTaken => t.branch_not_taken,
            CycleKind::Xio => t.xio,
            CycleKind::Vio { word_count } => t.vio_base + t.vio_per_word * u32::from(word_count),
            CycleKind::BlockMoveWord => t.block_move_word,
            CycleKind::Bex => t.bex,
            CycleKind::Privileged => t.privileged,
            CycleKind::Nop => t.nop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_chip_has_distinct_or_at_least_valid_costs() {
        for chip in [
            ChipId::Standard,
            ChipId::F9450,
            ChipId::Pace,
            ChipId::Gvsc,
            ChipId::Ma31750,
            ChipId::Mas281,
        ] {
            assert!(chip.cycles(CycleKind::RegisterToRegister) > 0);
            assert!(chip.cycles(CycleKind::Nop) > 0);
        }
    }

    #[test]
    fn shift_cost_scales_with_count() {
        let cheap = ChipId::Standard.cycles(CycleKind::Shift { count: 1 });
        let pricier = ChipId::Standard.cycles(CycleKind::Shift { count: 8 });
        assert!(pricier > cheap);
    }

    #[test]
    fn mas281_uses_double_timer_period() {
        assert_eq!(
            ChipId::Mas281.timer_a_period_cycles(),
            2 * ChipId::Standard.timer_a_period_cycles()
        );
    }

    #[test]
    fn extensions_are_chip_gated() {
        assert!(ChipId::Gvsc.supports(Extension::Gvsc));
        assert!(!ChipId::Standard.supports(Extension::Gvsc));
        assert!(ChipId::Ma31750.supports(Extension::Ma31750));
    }
}
