//! Interrupt-path state machine tests.
//!
//! These use a scripted register map where the test itself plays the
//! hardware: it decides when the completion interrupt fires by setting the
//! interrupt status word and raising the line. That makes the awkward
//! windows — command in flight, cancelled wait, late interrupt, handler
//! fault — fully deterministic.

use edu_driver::{
    EduDevice, EduError, InterruptSource, IrqLine, RegisterBus, Result,
};
use edu_chip::regs;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Register map double driven by the test. Status always reads idle, the
/// factorial register echoes the last operand, and interrupts fire only
/// when the test says so.
#[derive(Debug, Default)]
struct ManualBus {
    store: Mutex<HashMap<usize, u32>>,
    writes: Mutex<Vec<(usize, u32)>>,
    /// Every driver-initiated register access (reads and writes).
    ops: AtomicUsize,
    fail_irq_status: AtomicBool,
}

impl ManualBus {
    /// The test playing the hardware: set the pending-interrupt word
    /// without it counting as a driver access.
    fn set_irq_status(&self, value: u32) {
        self.store.lock().unwrap().insert(regs::IRQ_STATUS, value);
    }

    fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    fn op_count(&self) -> usize {
        self.ops.load(Ordering::Acquire)
    }
}

impl RegisterBus for ManualBus {
    fn read32(&self, offset: usize) -> Result<u32> {
        self.ops.fetch_add(1, Ordering::AcqRel);
        if offset == regs::IRQ_STATUS && self.fail_irq_status.load(Ordering::Acquire) {
            return Err(EduError::transfer_fault("injected interrupt-status fault"));
        }
        Ok(match offset {
            regs::IDENTITY => regs::identity::RESET_VALUE,
            // Idle: the polled loop terminates immediately.
            regs::STATUS => 0,
            _ => *self.store.lock().unwrap().get(&offset).unwrap_or(&0),
        })
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        self.ops.fetch_add(1, Ordering::AcqRel);
        self.writes.lock().unwrap().push((offset, value));
        let mut store = self.store.lock().unwrap();
        if offset == regs::IRQ_ACK {
            let pending = store.entry(regs::IRQ_STATUS).or_insert(0);
            *pending &= !value;
        } else {
            store.insert(offset, value);
        }
        Ok(())
    }
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn manual_device() -> (Arc<ManualBus>, Arc<IrqLine>, EduDevice) {
    let bus = Arc::new(ManualBus::default());
    let line = Arc::new(IrqLine::default());
    let dev = EduDevice::attach_with_interrupts(
        Arc::clone(&bus) as Arc<dyn RegisterBus>,
        Arc::clone(&line) as Arc<dyn InterruptSource>,
    )
    .unwrap();
    (bus, line, dev)
}

const START_IRQ: u32 = regs::status::RUN | regs::status::IRQ_ENABLE;

#[test]
fn in_flight_command_rejects_concurrent_commands_without_register_access() {
    let (bus, line, dev) = manual_device();

    std::thread::scope(|s| {
        let waiter = s.spawn(|| dev.factorial_irq(5));
        wait_until("start bit", || bus.writes_to(regs::STATUS) == vec![START_IRQ]);

        let ops_before = bus.op_count();
        assert!(matches!(
            dev.factorial_irq(1),
            Err(EduError::InvalidOperation { .. })
        ));
        assert!(matches!(
            dev.identify(),
            Err(EduError::InvalidOperation { .. })
        ));
        assert_eq!(
            bus.op_count(),
            ops_before,
            "rejected commands must never reach the register map"
        );

        // Let the card finish so the waiter comes home.
        bus.set_irq_status(regs::irq::FACTORIAL_DONE);
        line.raise();
        assert_eq!(waiter.join().unwrap().unwrap(), 5);
    });

    assert!(!dev.irq_pending());
    assert!(!dev.completion_ready());
}

#[test]
fn cancelled_wait_blocks_reuse_until_the_interrupt_is_observed() {
    let (bus, line, dev) = manual_device();

    std::thread::scope(|s| {
        let waiter = s.spawn(|| dev.factorial_irq(5));
        wait_until("start bit", || !bus.writes_to(regs::STATUS).is_empty());
        dev.cancel_wait();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(EduError::InterruptedWait)
        ));
    });

    // The card is mid-computation as far as the handle knows.
    assert!(dev.irq_pending());
    assert!(matches!(
        dev.factorial_irq(1),
        Err(EduError::InvalidOperation { .. })
    ));

    // The abandoned command's interrupt finally arrives.
    bus.set_irq_status(regs::irq::FACTORIAL_DONE);
    line.raise();
    wait_until("acknowledged completion", || dev.completion_ready());
    assert_eq!(bus.writes_to(regs::IRQ_ACK), vec![regs::irq::FACTORIAL_DONE]);

    // Observing it returns the handle to idle; the next command runs.
    std::thread::scope(|s| {
        let waiter = s.spawn(|| dev.factorial_irq(7));
        wait_until("second start bit", || {
            bus.writes_to(regs::STATUS).len() == 2
        });
        bus.set_irq_status(regs::irq::FACTORIAL_DONE);
        line.raise();
        assert_eq!(waiter.join().unwrap().unwrap(), 7);
    });

    assert!(!dev.irq_pending());
    assert!(!dev.completion_ready());
}

#[test]
fn reset_recovers_an_abandoned_handle() {
    let (bus, line, dev) = manual_device();

    std::thread::scope(|s| {
        let waiter = s.spawn(|| dev.factorial_irq(9));
        wait_until("start bit", || !bus.writes_to(regs::STATUS).is_empty());
        dev.cancel_wait();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(EduError::InterruptedWait)
        ));
    });
    assert!(dev.irq_pending());

    dev.reset().unwrap();
    assert!(!dev.irq_pending());
    assert!(!dev.completion_ready());
    // Reset acknowledges at the card, defensively clearing any pending bit.
    assert_eq!(bus.writes_to(regs::IRQ_ACK), vec![regs::irq::FACTORIAL_DONE]);

    // Handle is serviceable again.
    std::thread::scope(|s| {
        let waiter = s.spawn(|| dev.factorial_irq(4));
        wait_until("post-reset start bit", || {
            bus.writes_to(regs::STATUS).len() == 2
        });
        bus.set_irq_status(regs::irq::FACTORIAL_DONE);
        line.raise();
        assert_eq!(waiter.join().unwrap().unwrap(), 4);
    });
}

#[test]
fn handler_fault_disables_the_interrupt_path_and_unblocks_the_waiter() {
    let (bus, line, dev) = manual_device();
    bus.fail_irq_status.store(true, Ordering::Release);

    std::thread::scope(|s| {
        let waiter = s.spawn(|| dev.factorial_irq(5));
        wait_until("start bit", || !bus.writes_to(regs::STATUS).is_empty());

        // The line fires, the handler faults reading interrupt status, and
        // the blocked caller must fail out instead of hanging.
        line.raise();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(EduError::InterruptedWait)
        ));
    });

    wait_until("interrupt service shutdown", || !dev.interrupts_available());
    assert!(matches!(
        dev.factorial_irq(1),
        Err(EduError::InvalidOperation { .. })
    ));

    // Polled operation is unaffected by losing the interrupt path.
    assert_eq!(dev.factorial_polled(5).unwrap(), 5);
}

#[test]
fn interrupt_commands_need_an_interrupt_source() {
    let bus = Arc::new(ManualBus::default());
    let dev = EduDevice::attach(Arc::clone(&bus) as Arc<dyn RegisterBus>).unwrap();

    assert!(!dev.interrupts_available());
    assert!(matches!(
        dev.factorial_irq(5),
        Err(EduError::InvalidOperation { .. })
    ));
    // No part of the rejected command reached the card (only the attach-time
    // identity read-back has).
    assert!(bus.writes_to(regs::STATUS).is_empty());
    assert!(bus.writes_to(regs::FACTORIAL).is_empty());

    assert_eq!(dev.factorial_polled(6).unwrap(), 6);
}
