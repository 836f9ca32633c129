//! The machine execution core: CPU interpreter, address translation,
//! exceptions and interrupts, the event scheduler, the physical bus and
//! the worker thread controller. Peripherals (GPU, DMA, media controller,
//! timers) live outside this crate and hook in through the bus and the
//! scheduler.

#[macro_use]
extern crate log;

#[cfg(test)]
mod test;

pub mod bus;
pub mod cpu;
pub mod schedule;
pub mod system;

pub use bus::media::Media;
pub use bus::rom::Rom;
pub use cpu::Cpu;
pub use system::System;

/// An absolute CPU cycle number. It will not overflow unless the machine
/// runs for tens of thousands of years, but every comparison made on it is
/// wraparound safe anyway (see ['schedule']).
pub type Cycle = u64;

/// Per-access hooks for an external debugger. Breakpoint and watchpoint
/// evaluation is not the core's job; these expose the fetch address and
/// the address and width of every data access before side effects commit,
/// which is all a debugger needs to intercept.
pub trait Debugger {
    /// Called when fetching an instruction.
    fn instruction_load(&mut self, addr: u32);
    /// Called before loading data.
    fn data_load(&mut self, addr: u32, width: usize);
    /// Called before storing data.
    fn data_store(&mut self, addr: u32, width: usize);
}

/// Implement debugger for the unit type to easily run with no debugger.
impl Debugger for () {
    fn instruction_load(&mut self, _: u32) {}

    fn data_load(&mut self, _: u32, _: usize) {}

    fn data_store(&mut self, _: u32, _: usize) {}
}
