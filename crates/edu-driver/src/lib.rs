//! Userspace driver for the QEMU `edu` educational PCI device.
//!
//! The card is a register-mapped accelerator with two functions: a
//! bit-inversion liveness probe and a 32-bit factorial unit. The factorial
//! unit completes under two strategies — busy-polling the status register,
//! or sleeping until the card raises its completion interrupt — and the
//! point of this crate is getting that second path right: interrupt
//! delivery and consumer wake-up never race, never deadlock, and never
//! leave a stale "ready" behind.
//!
//! # Quick start
//!
//! ```
//! use edu_driver::EduDevice;
//!
//! # fn main() -> edu_driver::Result<()> {
//! // Simulated card; on hardware use `DeviceManager::discover()?.open_first()?`.
//! let dev = EduDevice::simulated()?;
//!
//! assert_eq!(dev.identify()?, 0x010000ed);
//! assert_eq!(dev.set_liveness(0xFFFF_FFFF)?, 0);
//! assert_eq!(dev.factorial_polled(5)?, 120);
//! assert_eq!(dev.factorial_irq(5)?, 120);
//! # Ok(())
//! # }
//! ```
//!
//! # Structure
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`bus`] | The [`RegisterBus`] seam everything above sits on |
//! | [`mmio`] | Hardware bus: BAR0 mapped from PCI sysfs, volatile access |
//! | [`sim`] | Software model of the card, same seam, own worker thread |
//! | [`completion`] | Single-slot handoff between handler and waiter |
//! | [`irq`] | The interrupt handler and the thread that drives it |
//! | [`device`] | The command surface |
//! | [`discovery`] | PCI sysfs scan for `1234:11e8` |

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod bus;
pub mod completion;
mod device;
mod discovery;
mod error;
pub mod irq;
pub mod mmio;
pub mod sim;

pub use bus::RegisterBus;
pub use completion::CompletionSignal;
pub use device::{Command, EduDevice};
pub use discovery::{DeviceInfo, DeviceManager};
pub use error::{EduError, Result};
pub use irq::{handle_interrupt, InterruptSource, IrqDisposition, IrqService, UioSource};
pub use mmio::MmioBar;
pub use sim::{IrqLine, SimulatedEdu};
