//! The execution thread controller.
//!
//! Exactly one worker thread interprets instructions; everything else (the
//! debugger, a GUI, tests) is the control thread. The two coordinate
//! through a pair of flags and a condvar: `halted` parks the worker,
//! `stopped` makes it exit. Machine state itself sits behind a mutex the
//! worker holds only while running, so the control thread's accesses
//! serialize against execution instead of racing it.

use crate::bus::media::Media;
use crate::bus::rom::Rom;
use crate::cpu::Cpu;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// Flags shared between the worker and the control thread. Peripherals
/// hold a handle too, so the bus can halt the machine from anywhere.
pub struct Control {
    halted: AtomicBool,
    stopped: AtomicBool,
    reason: Mutex<String>,
    park: Mutex<()>,
    wakeup: Condvar,
}

impl Control {
    pub fn new() -> Arc<Self> {
        Arc::new(Control {
            halted: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            reason: Mutex::new(String::new()),
            park: Mutex::new(()),
            wakeup: Condvar::new(),
        })
    }

    /// Halt the machine. The first reason wins: repeated halts are no-ops,
    /// so the original cause of a stop is preserved.
    pub fn halt(&self, reason: impl Into<String>) {
        let was_running = self
            .halted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if was_running {
            *self.reason.lock().unwrap() = reason.into();
        }
    }

    pub fn halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub fn halted_reason(&self) -> String {
        self.reason.lock().unwrap().clone()
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn resume(&self) {
        if self.halted() {
            // Flip the flag under the park lock so the wakeup can't slip
            // between the worker's predicate check and its sleep.
            let _guard = self.park.lock().unwrap();
            self.halted.store(false, Ordering::Release);
            self.wakeup.notify_one();
        }
    }

    /// Park until the machine is resumed or told to stop.
    fn wait_for_resume(&self) {
        let guard = self.park.lock().unwrap();
        let _guard = self
            .wakeup
            .wait_while(guard, |_| self.halted() && !self.stopped())
            .unwrap();
    }
}

/// The machine, seen from the control thread.
pub struct System {
    cpu: Arc<Mutex<Box<Cpu>>>,
    ctrl: Arc<Control>,
    worker: Option<JoinHandle<()>>,
}

impl System {
    /// Create a machine with the boot ROM and, optionally, a media image
    /// loaded. Both are copied into place once, before anything runs.
    pub fn new(rom: Rom, media: Option<Media>) -> Self {
        let ctrl = Control::new();
        let cpu = Arc::new(Mutex::new(Cpu::new(rom, media, ctrl.clone())));
        Self {
            cpu,
            ctrl,
            worker: None,
        }
    }

    /// Spawn the worker thread. It starts halted with reason "reset" and
    /// runs nothing until ['System::resume'] is called.
    pub fn start(&mut self) {
        if self.worker.is_none() {
            self.ctrl.halted.store(true, Ordering::Release);
            *self.ctrl.reason.lock().unwrap() = String::from("reset");

            let cpu = self.cpu.clone();
            let ctrl = self.ctrl.clone();
            self.worker = Some(thread::spawn(move || worker_routine(cpu, ctrl)));
        }
    }

    /// Stop and join the worker thread. Terminal: the halted flag is set
    /// first so the worker leaves its current block and parks, where it
    /// observes the stop flag.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.ctrl.halted.store(true, Ordering::Release);
            {
                let _guard = self.ctrl.park.lock().unwrap();
                self.ctrl.stopped.store(true, Ordering::Release);
                self.ctrl.wakeup.notify_one();
            }
            worker.join().expect("interpreter thread panicked");
        }
    }

    /// Reset the machine state. Leaves the machine halted.
    pub fn reset(&self) {
        self.cpu.lock().unwrap().reset();
    }

    pub fn halt(&self, reason: impl Into<String>) {
        self.ctrl.halt(reason);
    }

    pub fn halted(&self) -> bool {
        self.ctrl.halted()
    }

    pub fn halted_reason(&self) -> String {
        self.ctrl.halted_reason()
    }

    /// Resume execution. Does nothing unless started and halted.
    pub fn resume(&self) {
        if self.worker.is_some() {
            self.ctrl.resume();
        }
    }

    /// Advance the machine one block on the calling thread. Only
    /// meaningful while halted.
    pub fn step(&self) {
        if self.worker.is_some() && self.ctrl.halted() {
            self.cpu.lock().unwrap().step_block(&mut ());
        }
    }

    /// Exclusive access to the machine state, for inspection or poking.
    /// Blocks until the worker releases the state, which it only does
    /// while halted; halt first if the machine may be running.
    pub fn with_cpu<R>(&self, f: impl FnOnce(&mut Cpu) -> R) -> R {
        f(&mut self.cpu.lock().unwrap())
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The worker thread: wait to be resumed, then run blocks and pump events
/// until halted, then park again. Exits when the stop flag is raised.
fn worker_routine(cpu: Arc<Mutex<Box<Cpu>>>, ctrl: Arc<Control>) {
    info!("interpreter thread starting");

    loop {
        ctrl.wait_for_resume();

        if ctrl.stopped() {
            info!("interpreter thread exiting");
            return;
        }

        debug!("interpreter thread resuming");

        let mut cpu = cpu.lock().unwrap();

        // Make sure the pipeline sits at a block boundary before the first
        // event pump.
        cpu.run_blocks(&mut (), 0);

        while !ctrl.halted() {
            cpu.handle_event();
            cpu.run_blocks(&mut (), 1);
        }

        debug!("interpreter thread halting");
    }
}
