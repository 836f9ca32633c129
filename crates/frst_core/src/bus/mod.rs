//! The physical memory map of the machine.
//!
//! The bus partitions the flat physical address space into fixed regions
//! (RAM, scratchpad, boot ROM, the media image window and the peripheral
//! register window) and dispatches everything else to registered peripheral
//! handlers. Two policies apply before any region is reached: stores are
//! discarded while the cache isolate bit is set, and an access nobody
//! claims halts the machine rather than fabricating a value.

pub mod media;
pub mod ram;
pub mod rom;
pub mod scratchpad;

use crate::cpu::irq::{Irq, IrqState};
use crate::schedule::{EventFn, Schedule};
use crate::system::Control;
use crate::Cycle;

use std::sync::Arc;

use media::Media;
use ram::Ram;
use rom::Rom;
use scratchpad::ScratchPad;

/// An address range claimed by a type on the bus.
pub trait BusMap {
    /// The first address in the range.
    const BUS_BEGIN: u32;
    /// The last address included in the range.
    const BUS_END: u32;
}

/// The width of a single bus access. The three markers are the only
/// implementors, so the generic load/store functions double as the
/// width-1/2/4 wrappers without duplicating any region logic.
pub trait AddrUnit {
    const WIDTH: usize;

    fn is_aligned(addr: u32) -> bool;
}

pub struct Byte;

impl AddrUnit for Byte {
    const WIDTH: usize = 1;

    fn is_aligned(_: u32) -> bool {
        true
    }
}

pub struct HalfWord;

impl AddrUnit for HalfWord {
    const WIDTH: usize = 2;

    fn is_aligned(addr: u32) -> bool {
        (addr & 0x1) == 0
    }
}

pub struct Word;

impl AddrUnit for Word {
    const WIDTH: usize = 4;

    fn is_aligned(addr: u32) -> bool {
        (addr & 0x3) == 0
    }
}

/// What a peripheral may reach while handling one of its register accesses.
pub struct IoCtx<'a> {
    schedule: &'a mut Schedule,
    irq_state: &'a mut IrqState,
    ctrl: &'a Control,
}

impl IoCtx<'_> {
    /// Latch an interrupt line. The CPU notices before its next instruction.
    pub fn raise_irq(&mut self, irq: Irq) {
        self.irq_state.trigger(irq);
    }

    pub fn cycle(&self) -> Cycle {
        self.schedule.cycle()
    }

    pub fn schedule_in(&mut self, cycles: Cycle, callback: EventFn) {
        self.schedule.schedule_in(cycles, callback);
    }

    pub fn cancel(&mut self, callback: EventFn) {
        self.schedule.cancel(callback);
    }

    pub fn halt(&self, reason: impl Into<String>) {
        self.ctrl.halt(reason);
    }
}

/// A peripheral mapped into the register window. Handlers receive the
/// access width in bytes and the full physical address; returning `None`
/// (or `false` for stores) declares the access unhandled, which halts the
/// machine like any other unmapped address.
pub trait IoDevice: Send {
    fn load(&mut self, ctx: &mut IoCtx, width: usize, addr: u32) -> Option<u32>;

    fn store(&mut self, ctx: &mut IoCtx, width: usize, addr: u32, val: u32) -> bool;
}

struct Mapping {
    begin: u32,
    end: u32,
    device: Box<dyn IoDevice>,
}

/// The peripheral register window. Registers without an in-core handler
/// dispatch to mapped ['IoDevice']s.
const IO_BEGIN: u32 = 0x1f80_1000;
const IO_END: u32 = 0x1f80_2fff;

pub struct Bus {
    pub schedule: Schedule,
    pub irq_state: IrqState,
    ram: Ram,
    scratchpad: ScratchPad,
    rom: Rom,
    media: Option<Media>,
    mem_ctrl: MemCtrl,
    ram_size: RamSize,
    cache_ctrl: CacheCtrl,
    devices: Vec<Mapping>,
    ctrl: Arc<Control>,
    /// Mirror of the cache isolate bit in the CP0 status register, updated
    /// on every status write. While set, stores don't reach any region.
    cache_isolated: bool,
}

impl Bus {
    pub fn new(rom: Rom, media: Option<Media>, ctrl: Arc<Control>) -> Self {
        Self {
            schedule: Schedule::new(),
            irq_state: IrqState::new(),
            ram: Ram::new(),
            scratchpad: ScratchPad::new(),
            rom,
            media,
            mem_ctrl: MemCtrl::new(),
            ram_size: RamSize(0),
            cache_ctrl: CacheCtrl(0),
            devices: Vec::new(),
            ctrl,
            cache_isolated: false,
        }
    }

    /// Clear volatile memory and scheduling. The ROM and media images and
    /// the registered peripherals are preserved.
    pub fn reset(&mut self) {
        self.schedule = Schedule::new();
        self.irq_state = IrqState::new();
        self.ram.clear();
        self.scratchpad.clear();
        self.mem_ctrl = MemCtrl::new();
        self.ram_size = RamSize(0);
        self.cache_ctrl = CacheCtrl(0);
        self.cache_isolated = false;
    }

    /// Map a peripheral over a range of register window addresses.
    pub fn map_device(&mut self, begin: u32, end: u32, device: Box<dyn IoDevice>) {
        debug_assert!((IO_BEGIN..=IO_END).contains(&begin) && end <= IO_END);
        self.devices.push(Mapping { begin, end, device });
    }

    pub fn rom(&self) -> &Rom {
        &self.rom
    }

    pub fn media(&self) -> Option<&Media> {
        self.media.as_ref()
    }

    pub fn set_cache_isolated(&mut self, isolated: bool) {
        self.cache_isolated = isolated;
    }

    pub fn load<T: AddrUnit>(&mut self, addr: u32) -> Option<u32> {
        match addr {
            Ram::BUS_BEGIN..=Ram::BUS_END => Some(self.ram.load::<T>(addr)),
            ScratchPad::BUS_BEGIN..=ScratchPad::BUS_END => {
                Some(self.scratchpad.load::<T>(addr - ScratchPad::BUS_BEGIN))
            }
            Rom::BUS_BEGIN..=Rom::BUS_END => Some(self.rom.load::<T>(addr - Rom::BUS_BEGIN)),
            Media::BUS_BEGIN..=Media::BUS_END => {
                let offset = addr - Media::BUS_BEGIN;
                match &self.media {
                    Some(media) => Some(media.load::<T>(offset)),
                    // No media inserted: open bus.
                    None => Some(u32::MAX >> (32 - 8 * T::WIDTH)),
                }
            }
            MemCtrl::BUS_BEGIN..=MemCtrl::BUS_END => {
                Some(self.mem_ctrl.load(addr - MemCtrl::BUS_BEGIN))
            }
            RamSize::BUS_BEGIN..=RamSize::BUS_END => Some(self.ram_size.0),
            CacheCtrl::BUS_BEGIN..=CacheCtrl::BUS_END => Some(self.cache_ctrl.0),
            IrqState::BUS_BEGIN..=IrqState::BUS_END => {
                Some(self.irq_state.load(addr - IrqState::BUS_BEGIN))
            }
            IO_BEGIN..=IO_END => self.device_load::<T>(addr),
            _ => {
                self.ctrl
                    .halt(format!("load_u{} at 0x{:08x}", 8 * T::WIDTH, addr));
                None
            }
        }
    }

    pub fn store<T: AddrUnit>(&mut self, addr: u32, val: u32) -> Option<()> {
        if self.cache_isolated {
            // Firmware isolates the cache to flush it in the early boot
            // process; the emulation doesn't model the cache, so the stores
            // just vanish.
            return Some(());
        }
        // Sub-word stores only carry their own lanes.
        let val = val & (u32::MAX >> (32 - 8 * T::WIDTH));
        match addr {
            Ram::BUS_BEGIN..=Ram::BUS_END => self.ram.store::<T>(addr, val),
            ScratchPad::BUS_BEGIN..=ScratchPad::BUS_END => {
                self.scratchpad.store::<T>(addr - ScratchPad::BUS_BEGIN, val)
            }
            // The boot ROM is read-only: a store is a bus error, but not a
            // fatal one.
            Rom::BUS_BEGIN..=Rom::BUS_END => return None,
            MemCtrl::BUS_BEGIN..=MemCtrl::BUS_END => {
                self.mem_ctrl.store(addr - MemCtrl::BUS_BEGIN, val)
            }
            RamSize::BUS_BEGIN..=RamSize::BUS_END => self.ram_size.0 = val,
            CacheCtrl::BUS_BEGIN..=CacheCtrl::BUS_END => self.cache_ctrl.0 = val,
            IrqState::BUS_BEGIN..=IrqState::BUS_END => {
                self.irq_state.store(addr - IrqState::BUS_BEGIN, val)
            }
            IO_BEGIN..=IO_END => return self.device_store::<T>(addr, val),
            _ => {
                self.ctrl
                    .halt(format!("store_u{} at 0x{:08x}", 8 * T::WIDTH, addr));
                return None;
            }
        }
        Some(())
    }

    fn device_load<T: AddrUnit>(&mut self, addr: u32) -> Option<u32> {
        let ctrl = self.ctrl.clone();
        let mut ctx = IoCtx {
            schedule: &mut self.schedule,
            irq_state: &mut self.irq_state,
            ctrl: &ctrl,
        };
        let val = self
            .devices
            .iter_mut()
            .find(|mapping| (mapping.begin..=mapping.end).contains(&addr))
            .and_then(|mapping| mapping.device.load(&mut ctx, T::WIDTH, addr));
        if val.is_none() {
            ctrl.halt(format!("load_u{} at 0x{:08x}", 8 * T::WIDTH, addr));
        }
        val
    }

    fn device_store<T: AddrUnit>(&mut self, addr: u32, val: u32) -> Option<()> {
        let ctrl = self.ctrl.clone();
        let mut ctx = IoCtx {
            schedule: &mut self.schedule,
            irq_state: &mut self.irq_state,
            ctrl: &ctrl,
        };
        let handled = self
            .devices
            .iter_mut()
            .find(|mapping| (mapping.begin..=mapping.end).contains(&addr))
            .map_or(false, |mapping| {
                mapping.device.store(&mut ctx, T::WIDTH, addr, val)
            });
        if handled {
            Some(())
        } else {
            ctrl.halt(format!("store_u{} at 0x{:08x}", 8 * T::WIDTH, addr));
            None
        }
    }

    /// Side effect free read of the raw memory regions, for the debugger
    /// and tests. Peripheral registers can't be peeked.
    pub fn peek<T: AddrUnit>(&self, addr: u32) -> Option<u32> {
        match addr {
            Ram::BUS_BEGIN..=Ram::BUS_END => Some(self.ram.load::<T>(addr)),
            ScratchPad::BUS_BEGIN..=ScratchPad::BUS_END => {
                Some(self.scratchpad.load::<T>(addr - ScratchPad::BUS_BEGIN))
            }
            Rom::BUS_BEGIN..=Rom::BUS_END => Some(self.rom.load::<T>(addr - Rom::BUS_BEGIN)),
            Media::BUS_BEGIN..=Media::BUS_END => self
                .media
                .as_ref()
                .map(|media| media.load::<T>(addr - Media::BUS_BEGIN)),
            _ => None,
        }
    }
}

/// The memory controller's delay and base address registers. Firmware
/// programs these early in boot; nothing in the emulation depends on them,
/// so they are raw storage.
struct MemCtrl {
    regs: [u32; 9],
}

impl MemCtrl {
    fn new() -> Self {
        Self { regs: [0x0; 9] }
    }

    fn store(&mut self, offset: u32, val: u32) {
        match offset {
            0 if val != 0x1f00_0000 => {
                warn!("expansion 1 base address set to 0x{val:08x}");
            }
            4 if val != 0x1f80_2000 => {
                warn!("expansion 2 base address set to 0x{val:08x}");
            }
            _ => {}
        }
        self.regs[(offset >> 2) as usize] = val;
    }

    fn load(&self, offset: u32) -> u32 {
        self.regs[(offset >> 2) as usize]
    }
}

impl BusMap for MemCtrl {
    const BUS_BEGIN: u32 = 0x1f80_1000;
    const BUS_END: u32 = Self::BUS_BEGIN + 36 - 1;
}

struct RamSize(u32);

impl BusMap for RamSize {
    const BUS_BEGIN: u32 = 0x1f80_1060;
    const BUS_END: u32 = Self::BUS_BEGIN + 4 - 1;
}

struct CacheCtrl(u32);

impl BusMap for CacheCtrl {
    const BUS_BEGIN: u32 = 0xfffe_0130;
    const BUS_END: u32 = Self::BUS_BEGIN + 4 - 1;
}
