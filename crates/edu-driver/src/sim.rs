//! Simulated edu device
//!
//! A full software model of the card behind the same [`RegisterBus`] seam
//! the hardware sits behind: bit-inversion liveness, a factorial unit
//! running on its own worker thread, a busy bit, and an interrupt line.
//! Everything above the bus — the control core, the interrupt handler, the
//! CLI — runs unmodified against it, which is what makes the whole stack
//! exercisable without a QEMU guest.
//!
//! One deliberate difference from a naive model: the completion interrupt
//! is *latched*. If the computation finishes before the caller has set the
//! interrupt-enable bit, enabling it afterwards still raises the line. The
//! hardware's enable window makes the distinction unobservable; latching
//! makes the simulator deterministic under any scheduling.

use crate::bus::RegisterBus;
use crate::error::{EduError, Result};
use crate::irq::InterruptSource;
use edu_chip::regs;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Condvar-backed interrupt line for the simulated card.
///
/// The card raises it; an [`InterruptSource`] consumer (normally the
/// device's interrupt service thread) blocks on it.
#[derive(Debug, Default)]
pub struct IrqLine {
    state: Mutex<LineState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct LineState {
    pending: u32,
    shutdown: bool,
}

impl IrqLine {
    /// Raise the line: one more event for the consumer to collect.
    ///
    /// The simulated card calls this on completion; tests standing in for
    /// the hardware may call it directly.
    pub fn raise(&self) {
        let mut state = self.lock();
        state.pending += 1;
        self.cond.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, LineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InterruptSource for IrqLine {
    fn wait(&self) -> Result<bool> {
        let mut state = self.lock();
        loop {
            if state.pending > 0 {
                state.pending -= 1;
                return Ok(true);
            }
            if state.shutdown {
                return Ok(false);
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn shutdown(&self) {
        let mut state = self.lock();
        state.shutdown = true;
        self.cond.notify_all();
    }
}

#[derive(Debug, Default)]
struct SimRegs {
    liveness: u32,
    factorial: u32,
    busy: bool,
    irq_enable: bool,
    irq_status: u32,
    /// Completion that happened while the interrupt was disabled; raised
    /// retroactively if the enable bit arrives later.
    done_unreported: bool,
}

/// In-process model of the edu card.
#[derive(Debug)]
pub struct SimulatedEdu {
    regs: Arc<Mutex<SimRegs>>,
    line: Arc<IrqLine>,
    jobs: Mutex<Option<mpsc::Sender<u32>>>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedEdu {
    /// Create a simulated card with an idle factorial unit.
    #[must_use]
    pub fn new() -> Self {
        let regs = Arc::new(Mutex::new(SimRegs::default()));
        let line = Arc::new(IrqLine::default());
        let (tx, rx) = mpsc::channel::<u32>();

        let worker_regs = Arc::clone(&regs);
        let worker_line = Arc::clone(&line);
        let worker = std::thread::Builder::new()
            .name("edu-sim".into())
            .spawn(move || {
                while let Ok(operand) = rx.recv() {
                    let result = factorial(operand);
                    let mut state = lock_regs(&worker_regs);
                    state.factorial = result;
                    state.busy = false;
                    if state.irq_enable {
                        state.irq_status |= regs::irq::FACTORIAL_DONE;
                        drop(state);
                        worker_line.raise();
                    } else {
                        state.done_unreported = true;
                    }
                }
            })
            .ok();

        if worker.is_none() {
            tracing::error!("could not spawn simulated factorial unit; card will not compute");
        }

        Self {
            regs,
            line,
            jobs: Mutex::new(Some(tx)),
            worker,
        }
    }

    /// The card's interrupt line, for wiring up an interrupt service.
    #[must_use]
    pub fn interrupt_source(&self) -> Arc<IrqLine> {
        Arc::clone(&self.line)
    }

    fn lock(&self) -> MutexGuard<'_, SimRegs> {
        lock_regs(&self.regs)
    }

    fn check(offset: usize) -> Result<()> {
        if offset + 4 > regs::BAR0_SIZE {
            return Err(EduError::transfer_fault(format!(
                "Out of bounds access: offset={offset:#x}, limit={:#x}",
                regs::BAR0_SIZE
            )));
        }
        Ok(())
    }
}

impl Default for SimulatedEdu {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_regs(regs: &Mutex<SimRegs>) -> MutexGuard<'_, SimRegs> {
    regs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wrapping 32-bit factorial, as computed by the silicon.
fn factorial(n: u32) -> u32 {
    (2..=n).fold(1u32, u32::wrapping_mul)
}

impl RegisterBus for SimulatedEdu {
    fn read32(&self, offset: usize) -> Result<u32> {
        Self::check(offset)?;
        let regs_state = self.lock();
        let value = match offset {
            regs::IDENTITY => regs::identity::RESET_VALUE,
            regs::LIVENESS => regs_state.liveness,
            regs::FACTORIAL => regs_state.factorial,
            regs::STATUS => {
                let mut status = 0;
                if regs_state.busy {
                    status |= regs::status::RUN;
                }
                if regs_state.irq_enable {
                    status |= regs::status::IRQ_ENABLE;
                }
                status
            }
            regs::IRQ_STATUS => regs_state.irq_status,
            // Write-only and unassigned offsets read as zero.
            _ => 0,
        };
        Ok(value)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        Self::check(offset)?;
        match offset {
            regs::LIVENESS => {
                self.lock().liveness = !value;
            }
            regs::FACTORIAL => {
                {
                    let mut regs_state = self.lock();
                    regs_state.factorial = value;
                    regs_state.busy = true;
                    regs_state.done_unreported = false;
                }
                let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(tx) = jobs.as_ref() {
                    if tx.send(value).is_err() {
                        self.lock().busy = false;
                        return Err(EduError::transfer_fault(
                            "simulated factorial unit is gone",
                        ));
                    }
                }
            }
            regs::STATUS => {
                let mut regs_state = self.lock();
                regs_state.irq_enable = value & regs::status::IRQ_ENABLE != 0;
                // The busy bit is owned by the factorial unit; written bit 0
                // is part of the start ritual and carries no extra state.
                if regs_state.irq_enable && regs_state.done_unreported {
                    regs_state.done_unreported = false;
                    regs_state.irq_status |= regs::irq::FACTORIAL_DONE;
                    drop(regs_state);
                    self.line.raise();
                }
            }
            regs::IRQ_ACK => {
                if value & regs::irq::FACTORIAL_DONE != 0 {
                    self.lock().irq_status &= !regs::irq::FACTORIAL_DONE;
                }
            }
            // Read-only and unassigned offsets swallow writes, as the
            // silicon does.
            _ => {
                tracing::trace!("simulated write to inert offset {offset:#x} ignored");
            }
        }
        Ok(())
    }
}

impl Drop for SimulatedEdu {
    fn drop(&mut self) {
        // Closing the job channel stops the factorial unit; the line is
        // shut down so any service still blocked on it can exit.
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("simulated factorial unit panicked");
            }
        }
        self.line.shutdown();
    }
}
