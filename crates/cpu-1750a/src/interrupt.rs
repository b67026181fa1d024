//! Pending-interrupt register, mask register, Timer A/B, GO watchdog, and
//! the vectored context switch that `workout_interrupts` performs.
//!
//! Sixteen interrupt sources are numbered 0 (highest priority, Power-Down)
//! through 15 (lowest, User-5) in the order listed in MIL-STD-1750A. Source
//! `n` occupies PIR/MK bit `15 - n`, so walking PIR from bit 15 down to bit
//! 0 visits sources in priority order 0..=15.

use crate::chip::ChipId;
use crate::memory::PhysicalMemory;
use crate::mmu::Mmu;
use crate::registers::{pir, sys, Bank, Registers};

/// Interrupt source numbers, in priority order (0 = highest).
pub mod source {
    pub const PWRDWN: u8 = 0;
    pub const MACHERR: u8 = 1;
    pub const USER0: u8 = 2;
    pub const FLTOFL: u8 = 3;
    pub const FIXOFL: u8 = 4;
    pub const BEX: u8 = 5;
    pub const FLTUFL: u8 = 6;
    pub const TIMER_A: u8 = 7;
    pub const USER1: u8 = 8;
    pub const TIMER_B: u8 = 9;
    pub const USER2: u8 = 10;
    pub const USER3: u8 = 11;
    pub const IOLVL1: u8 = 12;
    pub const USER4: u8 = 13;
    pub const IOLVL2: u8 = 14;
    pub const USER5: u8 = 15;
}

fn bit_for_source(n: u8) -> u16 {
    1 << (15 - n)
}

/// Base address of the fixed linkage-pointer/service-pointer table: `LP` for
/// source `n` is `word[(Code, AS=0), 0x20 + 2n]`, `SVP` is the next word.
const VECTOR_TABLE_BASE: u16 = 0x0020;

/// Cycle-driven Timer A / Timer B / GO-watchdog accounting.
///
/// Timer periods are expressed directly in processor cycles (the standard
/// chips' 10us/20us periods, translated into cycle counts via the chip's
/// nominal clock, collapse to a single per-chip constant — see
/// [`ChipId::timer_a_period_cycles`]). This sidesteps carrying a separate
/// wall-clock/frequency model that nothing else in this crate needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerCore {
    cycles_since_ta_tick: u64,
    ta_ticks_since_tb_tick: u32,
    ta_ticks_since_go_tick: u32,
}

impl TimerCore {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cycles_since_ta_tick: 0,
            ta_ticks_since_tb_tick: 0,
            ta_ticks_since_go_tick: 0,
        }
    }

    /// Advance the timers by `cycles` processor cycles, executed by `chip`.
    /// Called after every instruction.
    pub fn advance(&mut self, cycles: u32, chip: ChipId, regs: &mut Registers) {
        if regs.sys & sys::TA == 0 {
            return;
        }
        self.cycles_since_ta_tick += u64::from(cycles);
        let period = u64::from(chip.timer_a_period_cycles());
        while self.cycles_since_ta_tick >= period {
            self.cycles_since_ta_tick -= period;
            self.tick_ta(chip, regs);
        }
    }

    fn tick_ta(&mut self, chip: ChipId, regs: &mut Registers) {
        let (new_ta, wrapped) = regs.ta.overflowing_add(1);
        regs.ta = new_ta;
        if wrapped {
            regs.pir |= pir::TIMER_A;
        }

        if regs.sys & sys::TB != 0 {
            self.ta_ticks_since_tb_tick += 1;
            if self.ta_ticks_since_tb_tick == 10 {
                self.ta_ticks_since_tb_tick = 0;
                let (new_tb, wrapped) = regs.tb.overflowing_add(1);
                regs.tb = new_tb;
                if wrapped {
                    regs.pir |= pir::TIMER_B;
                }
            }
        }

        self.ta_ticks_since_go_tick += 1;
        let go_period = 10 * chip.go_watchdog_factor();
        if self.ta_ticks_since_go_tick >= go_period {
            self.ta_ticks_since_go_tick = 0;
            let (new_go, wrapped) = regs.go.overflowing_add(1);
            regs.go = new_go;
            if wrapped {
                use crate::registers::ft;
                regs.pir |= pir::MACHERR;
                regs.ft |= ft::SYSFAULT0;
            }
        }
    }
}

/// The four-bit BEX immediate, latched by the BEX opcode handler so that a
/// subsequent `workout_interrupts` call can fetch the right service-area
/// slot (`SVP + 2 + bex_index`).
pub type BexIndex = Option<u8>;

/// Walk PIR from the highest-priority source down, taking (at most) one
/// interrupt per call. Returns `true` if a context switch was performed.
pub fn workout_interrupts(
    regs: &mut Registers,
    mem: &mut PhysicalMemory,
    mmu: &Mmu,
    bex_index: BexIndex,
) -> bool {
    for n in 0..16u8 {
        let bit = bit_for_source(n);
        if regs.pir & bit == 0 {
            continue;
        }
        let bypasses_master_enable = matches!(n, source::PWRDWN | source::MACHERR | source::BEX);
        if regs.sys & sys::INT == 0 && !bypasses_master_enable {
            continue;
        }
        let bypasses_mask = matches!(n, source::PWRDWN | source::BEX);
        if regs.mk & bit == 0 && !bypasses_mask {
            continue;
        }

        take_interrupt(regs, mem, mmu, n, bex_index);
        return true;
    }
    false
}

fn fetch_code_as0(mem: &mut PhysicalMemory, mmu: &Mmu, logical: u16) -> u16 {
    // The vector table lives in AS=0 regardless of the running program's
    // current AS, so we address it through a synthetic AK=0 register view.
    let probe = Registers::new();
    mmu.fetch(mem, Bank::Code, &probe, logical)
        .map(|(word, _)| word)
        .unwrap_or(0)
}

fn store_data(mem: &mut PhysicalMemory, mmu: &Mmu, address_state: u16, logical: u16, value: u16) {
    let mut probe = Registers::new();
    probe.set_as(address_state);
    let _ = mmu.store(mem, Bank::Data, &probe, logical, value);
}

fn fetch_data(mem: &mut PhysicalMemory, mmu: &Mmu, address_state: u16, logical: u16) -> u16 {
    let mut probe = Registers::new();
    probe.set_as(address_state);
    mmu.fetch(mem, Bank::Data, &probe, logical)
        .map(|(word, _)| word)
        .unwrap_or(0)
}

fn take_interrupt(
    regs: &mut Registers,
    mem: &mut PhysicalMemory,
    mmu: &Mmu,
    n: u8,
    bex_index: BexIndex,
) {
    let lp = fetch_code_as0(mem, mmu, VECTOR_TABLE_BASE + 2 * u16::from(n));
    let svp = fetch_code_as0(mem, mmu, VECTOR_TABLE_BASE + 2 * u16::from(n) + 1);

    let new_mk = fetch_data(mem, mmu, 0, svp);
    let new_sw = fetch_data(mem, mmu, 0, svp + 1);
    let ic_offset = if n == source::BEX {
        2 + u16::from(bex_index.unwrap_or(0))
    } else {
        2
    };
    let new_ic = fetch_data(mem, mmu, 0, svp + ic_offset);
    let new_as = new_sw & 0xF;

    store_data(mem, mmu, new_as, lp, regs.mk);
    store_data(mem, mmu, new_as, lp + 1, regs.sw);
    store_data(mem, mmu, new_as, lp + 2, regs.ic);

    regs.mk = new_mk;
    regs.sw = new_sw;
    regs.ic = new_ic;
    regs.pir &= !bit_for_source(n);
    regs.sys &= !sys::INT;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::ChipId;

    fn setup_vector(mem: &mut PhysicalMemory, mmu: &Mmu, n: u8, lp: u16, svp: u16) {
        let probe = Registers::new();
        mmu.store(mem, Bank::Code, &probe, VECTOR_TABLE_BASE + 2 * u16::from(n), lp)
            .unwrap();
        mmu.store(
            mem,
            Bank::Code,
            &probe,
            VECTOR_TABLE_BASE + 2 * u16::from(n) + 1,
            svp,
        )
        .unwrap();
    }

    #[test]
    fn scenario_e_interrupt_vectoring() {
        let mut mem = PhysicalMemory::new();
        let mut mmu = Mmu::new();
        let mut regs = Registers::new();

        setup_vector(&mut mem, &mmu, source::TIMER_A, 0x0400, 0x0500);
        // service area at (DATA,0) 0x0500.. = {mk=0xFFFF, sw=0x000B, ic=0x8000}
        let probe0 = Registers::new();
        mmu.store(&mut mem, Bank::Data, &probe0, 0x0500, 0xFFFF).unwrap();
        mmu.store(&mut mem, Bank::Data, &probe0, 0x0501, 0x000B).unwrap();
        mmu.store(&mut mem, Bank::Data, &probe0, 0x0502, 0x8000).unwrap();

        regs.pir |= bit_for_source(source::TIMER_A);
        regs.mk |= bit_for_source(source::TIMER_A);
        regs.sys |= sys::INT;

        let taken = workout_interrupts(&mut regs, &mut mem, &mmu, None);
        assert!(taken);

        assert_eq!(regs.mk, 0xFFFF);
        assert_eq!(regs.sw, 0x000B);
        assert_eq!(regs.ic, 0x8000);
        assert_eq!(regs.pir & bit_for_source(source::TIMER_A), 0);
        assert_eq!(regs.sys & sys::INT, 0);

        let mut new_ctx = Registers::new();
        new_ctx.set_as(0xB);
        let (old_mk, _) = mmu.fetch(&mut mem, Bank::Data, &new_ctx, 0x0400).unwrap();
        let (old_sw, _) = mmu.fetch(&mut mem, Bank::Data, &new_ctx, 0x0401).unwrap();
        let (old_ic, _) = mmu.fetch(&mut mem, Bank::Data, &new_ctx, 0x0402).unwrap();
        assert_eq!(old_mk, 0);
        assert_eq!(old_sw, 0);
        assert_eq!(old_ic, 0);
    }

    #[test]
    fn masked_interrupt_stays_pending() {
        let mut mem = PhysicalMemory::new();
        let mmu = Mmu::new();
        let mut regs = Registers::new();
        regs.pir |= bit_for_source(source::USER0);
        regs.sys |= sys::INT;
        // MK bit left clear.
        let taken = workout_interrupts(&mut regs, &mut mem, &mmu, None);
        assert!(!taken);
        assert_ne!(regs.pir & bit_for_source(source::USER0), 0);
    }

    #[test]
    fn power_down_bypasses_mask_and_master_enable() {
        let mut mem = PhysicalMemory::new();
        let mmu = Mmu::new();
        let mut regs = Registers::new();
        regs.pir |= bit_for_source(source::PWRDWN);
        // SYS.INT clear, MK clear: PWRDWN still fires.
        let taken = workout_interrupts(&mut regs, &mut mem, &mmu, None);
        assert!(taken);
    }

    #[test]
    fn timer_a_wraparound_sets_pir() {
        let mut regs = Registers::new();
        regs.sys |= sys::TA;
        regs.ta = 0xFFFF;
        let mut timer = TimerCore::new();
        let period = ChipId::Standard.timer_a_period_cycles();
        timer.advance(period, ChipId::Standard, &mut regs);
        assert_eq!(regs.ta, 0);
        assert_ne!(regs.pir & pir::TIMER_A, 0);
    }

    #[test]
    fn disabled_timer_a_does_not_tick() {
        let mut regs = Registers::new();
        let mut timer = TimerCore::new();
        let period = ChipId::Standard.timer_a_period_cycles();
        timer.advance(period * 5, ChipId::Standard, &mut regs);
        assert_eq!(regs.ta, 0);
    }
}
