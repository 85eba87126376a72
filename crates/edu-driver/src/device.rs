//! edu device handle and operations
//!
//! One handle owns one register window for its lifetime and is the only
//! path to it. Commands are exclusive: the card's registers hold at most
//! one in-flight request, so a second command while one is running is
//! rejected up front, before any register is touched.

use crate::bus::RegisterBus;
use crate::completion::CompletionSignal;
use crate::error::{EduError, Result};
use crate::irq::{InterruptSource, IrqService};
use crate::sim::SimulatedEdu;
use edu_chip::regs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

/// One command against the card.
///
/// Transient — constructed per call, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Read the identity word.
    Identify,
    /// Liveness probe: write a value, read back the card's inversion.
    SetLiveness(u32),
    /// Factorial with busy-polled completion.
    FactorialPolled(u32),
    /// Factorial with interrupt-driven completion.
    FactorialIrq(u32),
}

/// Handle to one edu card.
///
/// Created over a register bus (hardware BAR or simulator); torn down by
/// drop, which quiesces interrupt delivery before the completion signal
/// goes away.
#[derive(Debug)]
pub struct EduDevice {
    bus: Arc<dyn RegisterBus>,
    completion: Arc<CompletionSignal>,
    /// Held for the duration of one command; taken with `try_lock` so a
    /// concurrent caller fails fast instead of queueing.
    command: Mutex<()>,
    /// An interrupt-driven command was issued and its interrupt has not
    /// been consumed yet (set across a cancelled wait).
    awaiting_irq: AtomicBool,
    irq: Option<IrqService>,
}

impl EduDevice {
    /// Attach to a card without interrupt delivery. The interrupt-driven
    /// factorial path is unavailable; everything else works.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity word cannot be read.
    pub fn attach(bus: Arc<dyn RegisterBus>) -> Result<Self> {
        Self::attach_inner(bus, None)
    }

    /// Attach to a card with interrupt-line events from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity word cannot be read or the
    /// interrupt service thread cannot be spawned.
    pub fn attach_with_interrupts(
        bus: Arc<dyn RegisterBus>,
        source: Arc<dyn InterruptSource>,
    ) -> Result<Self> {
        Self::attach_inner(bus, Some(source))
    }

    /// Attach to a fresh in-process simulated card, interrupts wired up.
    ///
    /// # Errors
    ///
    /// Returns an error if the interrupt service thread cannot be spawned.
    pub fn simulated() -> Result<Self> {
        let sim = Arc::new(SimulatedEdu::new());
        let source = sim.interrupt_source();
        Self::attach_with_interrupts(sim, source)
    }

    fn attach_inner(
        bus: Arc<dyn RegisterBus>,
        source: Option<Arc<dyn InterruptSource>>,
    ) -> Result<Self> {
        let completion = Arc::new(CompletionSignal::new());

        let irq = match source {
            Some(source) => Some(IrqService::spawn(
                Arc::clone(&bus),
                Arc::clone(&completion),
                source,
            )?),
            None => {
                tracing::debug!("no interrupt source; interrupt-driven path unavailable");
                None
            }
        };

        let identity = bus.read32(regs::IDENTITY)?;
        tracing::info!("edu: identity reads {identity:#010x}");
        if !regs::identity::is_edu(identity) {
            tracing::warn!("identity word {identity:#010x} lacks the edu magic halfword");
        }

        Ok(Self {
            bus,
            completion,
            command: Mutex::new(()),
            awaiting_irq: AtomicBool::new(false),
            irq,
        })
    }

    /// Run one command.
    ///
    /// # Errors
    ///
    /// See the per-operation methods.
    pub fn execute(&self, command: Command) -> Result<u32> {
        match command {
            Command::Identify => self.identify(),
            Command::SetLiveness(value) => self.set_liveness(value),
            Command::FactorialPolled(n) => self.factorial_polled(n),
            Command::FactorialIrq(n) => self.factorial_irq(n),
        }
    }

    /// Read the card's identity word.
    ///
    /// # Errors
    ///
    /// Transfer fault if the read fails; invalid operation if another
    /// command is in flight.
    pub fn identify(&self) -> Result<u32> {
        let _command = self.begin()?;
        self.bus.read32(regs::IDENTITY)
    }

    /// Liveness probe: write a value, return the card's transformation.
    ///
    /// The card inverts every bit; the caller decides liveness by comparing
    /// against the expected inversion. Whatever comes back is returned.
    ///
    /// # Errors
    ///
    /// Transfer fault if an access fails; invalid operation if another
    /// command is in flight.
    pub fn set_liveness(&self, value: u32) -> Result<u32> {
        let _command = self.begin()?;
        self.bus.write32(regs::LIVENESS, value)?;
        self.bus.read32(regs::LIVENESS)
    }

    /// Compute a factorial, busy-polling the status register until the
    /// card goes idle.
    ///
    /// There is deliberately no timeout: an unresponsive card hangs the
    /// caller rather than masking a hardware fault behind a made-up error.
    /// The processor is yielded between status reads.
    ///
    /// # Errors
    ///
    /// Transfer fault if an access fails; invalid operation if another
    /// command is in flight.
    pub fn factorial_polled(&self, n: u32) -> Result<u32> {
        let _command = self.begin()?;

        self.bus.write32(regs::FACTORIAL, n)?;

        let status = self.bus.read32(regs::STATUS)?;
        self.bus.write32(regs::STATUS, status & regs::status::RUN)?;

        while self.bus.read32(regs::STATUS)? & regs::status::RUN != 0 {
            std::thread::yield_now();
        }

        self.bus.read32(regs::FACTORIAL)
    }

    /// Compute a factorial, sleeping until the card's completion interrupt.
    ///
    /// # Errors
    ///
    /// - Invalid operation if another command is in flight, if interrupt
    ///   delivery is not configured (or has failed), or if a previous
    ///   interrupt-driven command is still pending.
    /// - [`EduError::InterruptedWait`] if the wait is cancelled; the card
    ///   is then mid-computation and the handle refuses further
    ///   interrupt-driven commands until that interrupt is observed or
    ///   [`reset`](Self::reset) is called.
    /// - Transfer fault if a register access fails.
    pub fn factorial_irq(&self, n: u32) -> Result<u32> {
        let _command = self.begin()?;

        match &self.irq {
            None => {
                return Err(EduError::invalid_operation(
                    "interrupt delivery is not configured for this handle",
                ))
            }
            Some(service) if !service.is_running() => {
                return Err(EduError::invalid_operation(
                    "interrupt service stopped after a fault; interrupt-driven path disabled",
                ))
            }
            Some(_) => {}
        }

        if self.awaiting_irq.load(Ordering::Acquire) {
            // A previous interrupt-driven command was cancelled mid-flight.
            // If its interrupt has since been observed the handle is usable
            // again; otherwise the card is still working on the old request.
            if self.completion.try_consume() {
                tracing::debug!("stale completion interrupt consumed; handle recovered");
                self.awaiting_irq.store(false, Ordering::Release);
            } else {
                return Err(EduError::invalid_operation(
                    "a previous interrupt-driven command is still pending; reset the handle",
                ));
            }
        }

        self.bus.write32(regs::FACTORIAL, n)?;

        self.awaiting_irq.store(true, Ordering::Release);
        if let Err(e) = self
            .bus
            .write32(regs::STATUS, regs::status::RUN | regs::status::IRQ_ENABLE)
        {
            // The start bit never reached the card; nothing is pending.
            self.awaiting_irq.store(false, Ordering::Release);
            return Err(e);
        }

        self.completion.wait()?;
        self.awaiting_irq.store(false, Ordering::Release);

        self.bus.read32(regs::FACTORIAL)
    }

    /// Raw read of the card's data channel (offset 0x00).
    ///
    /// # Errors
    ///
    /// Transfer fault if the read fails; invalid operation if another
    /// command is in flight.
    pub fn read_raw(&self) -> Result<u32> {
        let _command = self.begin()?;
        self.bus.read32(regs::IDENTITY)
    }

    /// Raw writes to the data channel are always rejected; the channel is
    /// read-only and the card is never touched.
    ///
    /// # Errors
    ///
    /// Always returns [`EduError::InvalidOperation`].
    pub fn write_raw(&self, _data: &[u8]) -> Result<usize> {
        tracing::warn!("edu: write attempt on read-only data channel denied");
        Err(EduError::invalid_operation("data channel is read-only"))
    }

    /// Cancel a blocked interrupt-driven wait from another thread.
    ///
    /// The cancelled caller gets [`EduError::InterruptedWait`] and the card
    /// is left in an undefined in-flight state; see
    /// [`factorial_irq`](Self::factorial_irq) for the recovery rules.
    pub fn cancel_wait(&self) {
        self.completion.cancel();
    }

    /// Reset the handle after an abandoned interrupt-driven command:
    /// acknowledge any pending interrupt at the card and drain the
    /// completion state.
    ///
    /// # Errors
    ///
    /// Transfer fault if the acknowledge write fails; invalid operation if
    /// another command is in flight.
    pub fn reset(&self) -> Result<()> {
        let _command = self.begin()?;
        self.bus.write32(regs::IRQ_ACK, regs::irq::FACTORIAL_DONE)?;
        self.completion.drain();
        self.awaiting_irq.store(false, Ordering::Release);
        tracing::debug!("edu device handle reset");
        Ok(())
    }

    /// Whether the interrupt-driven path is currently usable.
    #[must_use]
    pub fn interrupts_available(&self) -> bool {
        self.irq.as_ref().is_some_and(IrqService::is_running)
    }

    /// Whether an interrupt-driven command is pending (issued but its
    /// interrupt not yet consumed).
    #[must_use]
    pub fn irq_pending(&self) -> bool {
        self.awaiting_irq.load(Ordering::Acquire)
    }

    /// Whether the completion flag is currently set (diagnostic).
    #[must_use]
    pub fn completion_ready(&self) -> bool {
        self.completion.is_ready()
    }

    fn begin(&self) -> Result<MutexGuard<'_, ()>> {
        match self.command.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(EduError::invalid_operation(
                "another command is in flight on this handle",
            )),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }
}

impl Drop for EduDevice {
    fn drop(&mut self) {
        // Quiesce interrupt delivery before the completion signal goes
        // away: close the signal, then stop and join the service thread.
        self.completion.close();
        self.irq.take();
        tracing::info!("edu device handle closed");
    }
}
