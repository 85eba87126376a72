//! Interrupt handling
//!
//! The handler itself is a plain function over the register bus and the
//! completion signal — the core never assumes how the platform invokes it.
//! [`IrqService`] is the glue for environments where interrupt-line events
//! arrive as blocking reads: a dedicated thread turns each event into one
//! handler invocation.

use crate::bus::RegisterBus;
use crate::completion::CompletionSignal;
use crate::error::Result;
use edu_chip::regs;
use rustix::event::{poll, PollFd, PollFlags};
use std::fmt::Debug;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Outcome of one interrupt handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqDisposition {
    /// The event was this device's factorial completion; it was
    /// acknowledged and the waiter was woken.
    Handled,
    /// The event was not caused by this device's completion source; the
    /// platform must check other candidates. No register was written.
    NotHandled,
}

/// Service one interrupt-line event.
///
/// Reads `IRQ_STATUS`; if the factorial-done bit is clear the event belongs
/// to another source and nothing is touched. Otherwise the pending
/// condition is acknowledged at the device *before* any waiter is woken, so
/// a woken caller re-reading interrupt status never observes a stale
/// pending bit.
///
/// Runs in interrupt context: no blocking, no allocation, bounded work.
///
/// # Errors
///
/// A register fault here is fatal to interrupt-driven operation — the
/// caller must stop servicing the line rather than retry.
pub fn handle_interrupt(
    bus: &dyn RegisterBus,
    signal: &CompletionSignal,
) -> Result<IrqDisposition> {
    let pending = bus.read32(regs::IRQ_STATUS)?;
    if pending & regs::irq::FACTORIAL_DONE == 0 {
        return Ok(IrqDisposition::NotHandled);
    }

    bus.write32(regs::IRQ_ACK, regs::irq::FACTORIAL_DONE)?;
    signal.signal();
    Ok(IrqDisposition::Handled)
}

/// Source of interrupt-line events.
///
/// Implementations block until the line fires. The simulator exposes its
/// own line; on hardware the events come from a UIO node.
pub trait InterruptSource: Debug + Send + Sync {
    /// Block until the line fires.
    ///
    /// Returns `Ok(true)` for a line event and `Ok(false)` once the source
    /// has been shut down and no more events will arrive.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying event channel fails; the service
    /// treats this the same as a handler fault.
    fn wait(&self) -> Result<bool>;

    /// Ask the source to stop; a blocked [`wait`](Self::wait) returns
    /// `Ok(false)` as soon as it can observe the request.
    fn shutdown(&self);
}

/// Thread that turns interrupt-line events into handler invocations.
///
/// Any handler fault permanently stops the service and closes the
/// completion signal so blocked callers fail out instead of hanging —
/// interrupt-driven operation is disabled rather than retried. Polled
/// operation is unaffected.
#[derive(Debug)]
pub struct IrqService {
    thread: Option<JoinHandle<()>>,
    source: Arc<dyn InterruptSource>,
}

impl IrqService {
    /// Spawn the service thread for one device.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(
        bus: Arc<dyn RegisterBus>,
        signal: Arc<CompletionSignal>,
        source: Arc<dyn InterruptSource>,
    ) -> Result<Self> {
        let thread_source = Arc::clone(&source);
        let thread = std::thread::Builder::new()
            .name("edu-irq".into())
            .spawn(move || Self::run(&*bus, &signal, &*thread_source))?;

        Ok(Self {
            thread: Some(thread),
            source,
        })
    }

    /// Whether the service thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    fn run(bus: &dyn RegisterBus, signal: &CompletionSignal, source: &dyn InterruptSource) {
        loop {
            match source.wait() {
                Ok(true) => match handle_interrupt(bus, signal) {
                    Ok(IrqDisposition::Handled) => {
                        tracing::trace!("factorial completion interrupt handled");
                    }
                    Ok(IrqDisposition::NotHandled) => {
                        tracing::debug!("interrupt-line event from another source, ignored");
                    }
                    Err(e) => {
                        tracing::error!(
                            "interrupt handler fault: {e}; interrupt-driven operation disabled"
                        );
                        signal.close();
                        return;
                    }
                },
                Ok(false) => {
                    tracing::debug!("interrupt source shut down");
                    return;
                }
                Err(e) => {
                    tracing::error!("interrupt source failed: {e}; interrupt-driven operation disabled");
                    signal.close();
                    return;
                }
            }
        }
    }

    fn stop(&mut self) {
        self.source.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("interrupt service thread panicked");
            }
        }
    }
}

impl Drop for IrqService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poll interval for shutdown-request checks while idle on the line.
const UIO_POLL_MS: i32 = 100;

/// Interrupt-line events delivered through a UIO node (`/dev/uio*`).
///
/// The generic PCI UIO driver reports each line event as a 4-byte interrupt
/// count readable from the node, and masks the line after delivering it; a
/// 4-byte write of `1` re-arms it.
#[derive(Debug)]
pub struct UioSource {
    file: File,
    stop: AtomicBool,
}

impl UioSource {
    /// Open a UIO node and arm the interrupt line.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::options().read(true).write(true).open(path)?;

        let source = Self {
            file,
            stop: AtomicBool::new(false),
        };
        if let Err(e) = source.rearm() {
            // Older UIO drivers have no irqcontrol and arm unconditionally.
            tracing::warn!("could not arm interrupt line via {}: {e}", path.display());
        }

        tracing::info!("interrupt delivery via {}", path.display());
        Ok(source)
    }

    fn rearm(&self) -> std::io::Result<()> {
        (&self.file).write_all(&1u32.to_ne_bytes())
    }
}

impl InterruptSource for UioSource {
    fn wait(&self) -> Result<bool> {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return Ok(false);
            }

            let mut fds = [PollFd::new(&self.file, PollFlags::IN)];
            let ready = poll(&mut fds, UIO_POLL_MS).map_err(std::io::Error::from)?;
            if ready == 0 {
                continue;
            }

            // The count of line events so far; the value itself is unused.
            let mut count = [0u8; 4];
            (&self.file).read_exact(&mut count)?;
            self.rearm()?;
            return Ok(true);
        }
    }

    fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EduError;
    use std::sync::Mutex;

    /// Register map double that records every access and lets the test
    /// script the interrupt status word.
    #[derive(Debug, Default)]
    struct RecordingBus {
        irq_status: Mutex<u32>,
        fail_status_read: AtomicBool,
        writes: Mutex<Vec<(usize, u32)>>,
        /// Snapshot of the completion flag at each write, for ordering
        /// assertions.
        ready_at_write: Mutex<Vec<bool>>,
        observed: Mutex<Option<Arc<CompletionSignal>>>,
    }

    impl RecordingBus {
        fn observing(signal: &Arc<CompletionSignal>) -> Self {
            let bus = Self::default();
            *bus.observed.lock().unwrap() = Some(Arc::clone(signal));
            bus
        }

        fn set_irq_status(&self, value: u32) {
            *self.irq_status.lock().unwrap() = value;
        }

        fn writes(&self) -> Vec<(usize, u32)> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl RegisterBus for RecordingBus {
        fn read32(&self, offset: usize) -> Result<u32> {
            if offset == regs::IRQ_STATUS {
                if self.fail_status_read.load(Ordering::Acquire) {
                    return Err(EduError::transfer_fault("injected fault"));
                }
                return Ok(*self.irq_status.lock().unwrap());
            }
            Ok(0)
        }

        fn write32(&self, offset: usize, value: u32) -> Result<()> {
            if let Some(signal) = self.observed.lock().unwrap().as_ref() {
                self.ready_at_write.lock().unwrap().push(signal.is_ready());
            }
            self.writes.lock().unwrap().push((offset, value));
            Ok(())
        }
    }

    #[test]
    fn foreign_interrupt_is_not_handled_and_writes_nothing() {
        let bus = RecordingBus::default();
        let signal = CompletionSignal::new();
        bus.set_irq_status(0);

        let disposition = handle_interrupt(&bus, &signal).unwrap();

        assert_eq!(disposition, IrqDisposition::NotHandled);
        assert!(bus.writes().is_empty(), "no register writes on a foreign event");
        assert!(!signal.is_ready(), "no wakeup on a foreign event");
    }

    #[test]
    fn pending_interrupt_is_acked_then_signalled() {
        let signal = Arc::new(CompletionSignal::new());
        let bus = RecordingBus::observing(&signal);
        bus.set_irq_status(regs::irq::FACTORIAL_DONE);

        let disposition = handle_interrupt(&bus, &signal).unwrap();

        assert_eq!(disposition, IrqDisposition::Handled);
        assert_eq!(bus.writes(), vec![(regs::IRQ_ACK, regs::irq::FACTORIAL_DONE)]);
        assert!(signal.is_ready());
        // Acknowledge completes before the waiter is woken.
        assert_eq!(*bus.ready_at_write.lock().unwrap(), vec![false]);
    }

    #[test]
    fn handler_surfaces_bus_faults() {
        let bus = RecordingBus::default();
        bus.fail_status_read.store(true, Ordering::Release);
        let signal = CompletionSignal::new();

        let err = handle_interrupt(&bus, &signal).unwrap_err();
        assert!(matches!(err, EduError::TransferFault { .. }));
        assert!(!signal.is_ready());
    }
}
