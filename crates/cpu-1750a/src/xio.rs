//! XIO command table and semantics. `VIO` (§4.6) is a thin loop over this
//! same `do_xio` entry point and lives in `execute.rs` alongside the rest of
//! the instruction handlers; this module is just the address -> behaviour
//! mapping.
//!
//! Page-register direct access (`0x51xx`/`0x52xx` write, `0xD1xx`/`0xD2xx`
//! read) packs a [`PageReg`](crate::mmu::PageReg) into the 16-bit XIO value
//! register as `bits[11:8] = AL`, `bit 12 = E/W`, `bits[7:0] = PPA` — a
//! concrete layout the distilled specification leaves unstated.

use crate::hooks::HostHooks;
use crate::mmu::{Mmu, PageReg};
use crate::registers::{ft, pir, sys, Bank, Registers};

pub mod addr {
    pub const SMK: u16 = 0x2000;
    pub const CLIR: u16 = 0x2001;
    pub const ENBL: u16 = 0x2002;
    pub const DSBL: u16 = 0x2003;
    pub const RPI: u16 = 0x2004;
    pub const SPI: u16 = 0x2005;
    pub const WSW: u16 = 0x200E;
    pub const CO: u16 = 0x4000;
    pub const DMAE: u16 = 0x4006;
    pub const DMAD: u16 = 0x4007;
    pub const TAS: u16 = 0x4008;
    pub const TAH: u16 = 0x4009;
    pub const OTA: u16 = 0x400A;
    pub const GO: u16 = 0x400B;
    pub const TBS: u16 = 0x400C;
    pub const TBH: u16 = 0x400D;
    pub const OTB: u16 = 0x400E;
    pub const RMK: u16 = 0xA000;
    pub const RPIR: u16 = 0xA004;
    pub const RSW: u16 = 0xA00E;
    pub const RCFR: u16 = 0xA00F;
    pub const ITA: u16 = 0xC00A;
    pub const ITB: u16 = 0xC00E;
}

fn pack_page_reg(p: PageReg) -> u16 {
    (u16::from(p.e_w) << 12) | (u16::from(p.al) << 8) | u16::from(p.ppa)
}

fn unpack_page_reg(v: u16) -> PageReg {
    PageReg {
        ppa: v as u8,
        al: ((v >> 8) & 0xF) as u8,
        e_w: v & 0x1000 != 0,
    }
}

fn page_reg_location(low_byte: u16) -> (u16, u16) {
    (((low_byte >> 4) & 0xF), low_byte & 0xF)
}

/// Execute one XIO operation. Callers are responsible for the privileged
/// (AK != 0) check; this assumes it already passed.
pub fn do_xio(regs: &mut Registers, mmu: &mut Mmu, hooks: &mut HostHooks, address: u16, value: &mut u16) {
    if address & 0xFF00 == 0x5100 {
        let (as_, hi) = page_reg_location(address & 0xFF);
        mmu.set_page_reg(Bank::Code, as_, hi, unpack_page_reg(*value));
        return;
    }
    if address & 0xFF00 == 0x5200 {
        let (as_, hi) = page_reg_location(address & 0xFF);
        mmu.set_page_reg(Bank::Data, as_, hi, unpack_page_reg(*value));
        return;
    }
    if address & 0xFF00 == 0xD100 {
        let (as_, hi) = page_reg_location(address & 0xFF);
        *value = pack_page_reg(mmu.page_reg(Bank::Code, as_, hi));
        return;
    }
    if address & 0xFF00 == 0xD200 {
        let (as_, hi) = page_reg_location(address & 0xFF);
        *value = pack_page_reg(mmu.page_reg(Bank::Data, as_, hi));
        return;
    }

    match address {
        addr::SMK => regs.mk = *value,
        addr::CLIR => {
            regs.ft = 0;
            regs.pir = 0;
        }
        addr::ENBL => regs.sys |= sys::INT,
        addr::DSBL => regs.sys &= !sys::INT,
        addr::RPI => {
            let index = *value & 0xF;
            regs.pir &= !(1 << (15 - index));
            if index == 1 {
                regs.ft = 0;
            }
        }
        addr::SPI => regs.pir |= *value,
        addr::WSW => regs.sw = *value,
        addr::CO => {
            let byte = (*value & 0xFF) as u8;
            hooks.console.write_byte(byte);
        }
        addr::DMAE => regs.sys |= sys::DMA,
        addr::DMAD => regs.sys &= !sys::DMA,
        addr::TAS => regs.sys |= sys::TA,
        addr::TAH => regs.sys &= !sys::TA,
        addr::OTA => {
            regs.ta = *value;
            regs.sys |= sys::TA;
        }
        addr::GO => regs.go = 0,
        addr::TBS => regs.sys |= sys::TB,
        addr::TBH => regs.sys &= !sys::TB,
        addr::OTB => {
            regs.tb = *value;
            regs.sys |= sys::TB;
        }
        addr::RMK => *value = regs.mk,
        addr::RPIR => *value = regs.pir,
        addr::RSW => *value = regs.sw,
        addr::RCFR => {
            *value = regs.ft;
            regs.ft = 0;
            regs.pir &= !pir::MACHERR;
        }
        addr::ITA => *value = regs.ta,
        addr::ITB => *value = regs.tb,
        _ => hooks.user_xio.handle(address, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HostHooks, NeverCancel, NoBreakpoints, NoUserXio, NullConsole};

    fn hooks<'a>(
        bp: &'a NoBreakpoints,
        con: &'a mut NullConsole,
        ux: &'a mut NoUserXio,
        cancel: &'a mut NeverCancel,
    ) -> HostHooks<'a> {
        HostHooks::new(bp, con, ux, cancel)
    }

    #[test]
    fn enbl_dsbl_toggle_master_enable() {
        let mut regs = Registers::new();
        let mut mmu = Mmu::new();
        let bp = NoBreakpoints;
        let mut con = NullConsole;
        let mut ux = NoUserXio;
        let mut cancel = NeverCancel;
        let mut h = hooks(&bp, &mut con, &mut ux, &mut cancel);
        let mut v = 0;
        do_xio(&mut regs, &mut mmu, &mut h, addr::ENBL, &mut v);
        assert_ne!(regs.sys & sys::INT, 0);
        do_xio(&mut regs, &mut mmu, &mut h, addr::DSBL, &mut v);
        assert_eq!(regs.sys & sys::INT, 0);
    }

    #[test]
    fn rcfr_reads_and_clears_ft_and_macherr() {
        let mut regs = Registers::new();
        regs.ft = ft::MEMPROT;
        regs.pir = pir::MACHERR;
        let mut mmu = Mmu::new();
        let bp = NoBreakpoints;
        let mut con = NullConsole;
        let mut ux = NoUserXio;
        let mut cancel = NeverCancel;
        let mut h = hooks(&bp, &mut con, &mut ux, &mut cancel);
        let mut v = 0;
        do_xio(&mut regs, &mut mmu, &mut h, addr::RCFR, &mut v);
        assert_eq!(v, ft::MEMPROT);
        assert_eq!(regs.ft, 0);
        assert_eq!(regs.pir & pir::MACHERR, 0);
    }

    #[test]
    fn page_reg_write_then_read_round_trips() {
        let mut regs = Registers::new();
        let mut mmu = Mmu::new();
        let bp = NoBreakpoints;
        let mut con = NullConsole;
        let mut ux = NoUserXio;
        let mut cancel = NeverCancel;
        let mut h = hooks(&bp, &mut con, &mut ux, &mut cancel);
        let mut v = pack_page_reg(PageReg {
            ppa: 0x42,
            al: 3,
            e_w: true,
        });
        // AS=1, hi-nibble=2 -> low byte 0x12
        do_xio(&mut regs, &mut mmu, &mut h, 0x5112, &mut v);
        let mut readback = 0;
        do_xio(&mut regs, &mut mmu, &mut h, 0xD112, &mut readback);
        assert_eq!(readback, v);
    }
}
