//! `edu` — command-line interface for the QEMU edu PCI device.
//!
//! ```text
//! USAGE:
//!   edu identify                  Read the card's identity word
//!   edu set-liveness <u32>        Liveness probe (returns the bit inversion)
//!   edu factorial <u32>           Factorial, busy-polled completion
//!   edu factorial-irq <u32>       Factorial, interrupt-driven completion
//!   edu read-raw                  Raw read of the data channel
//!   edu enumerate                 List edu devices on the PCI bus
//!
//! Pass --sim to run any command against the in-process simulated card.
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use edu_driver::{Command, DeviceManager, EduDevice};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "edu", about = "QEMU edu device CLI", version)]
struct Cli {
    /// Run against the in-process simulated card instead of hardware.
    #[arg(long, global = true)]
    sim: bool,

    /// Device index when more than one card is present.
    #[arg(long, global = true, default_value_t = 0)]
    device: usize,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Read the card's identity word.
    Identify,
    /// Liveness probe: the card returns the bitwise inversion of the value.
    SetLiveness {
        /// Value to write (decimal or 0x-prefixed hex).
        #[arg(value_parser = parse_u32)]
        value: u32,
    },
    /// Compute a factorial, busy-polling for completion.
    Factorial {
        /// Operand (decimal or 0x-prefixed hex).
        #[arg(value_parser = parse_u32)]
        n: u32,
    },
    /// Compute a factorial, sleeping until the completion interrupt.
    FactorialIrq {
        /// Operand (decimal or 0x-prefixed hex).
        #[arg(value_parser = parse_u32)]
        n: u32,
    },
    /// Raw read of the card's data channel (writes are always rejected).
    ReadRaw,
    /// List all edu devices found on the PCI bus.
    Enumerate,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    if matches!(cli.command, Cmd::Enumerate) {
        return cmd_enumerate(cli.sim);
    }

    let dev = open_device(&cli)?;

    match cli.command {
        Cmd::Identify => {
            let id = dev.execute(Command::Identify)?;
            print_identity(id);
        }
        Cmd::SetLiveness { value } => {
            let inverted = dev.execute(Command::SetLiveness(value))?;
            println!("Inverted: {inverted:#010x}");
        }
        Cmd::Factorial { n } => {
            let result = dev.execute(Command::FactorialPolled(n))?;
            println!("Factorial: {result} ({result:#010x})");
        }
        Cmd::FactorialIrq { n } => {
            let result = dev.execute(Command::FactorialIrq(n))?;
            println!("Factorial: {result} ({result:#010x})");
        }
        Cmd::ReadRaw => {
            let word = dev.read_raw()?;
            println!("{word:#010x}");
        }
        Cmd::Enumerate => unreachable!("handled above"),
    }

    Ok(())
}

fn open_device(cli: &Cli) -> Result<EduDevice> {
    if cli.sim {
        return Ok(EduDevice::simulated()?);
    }
    let manager = DeviceManager::discover()?;
    Ok(manager.open(cli.device)?)
}

fn cmd_enumerate(sim: bool) -> Result<()> {
    if sim {
        println!("edu devices: 1 (simulated)");
        println!();
        println!("[0] in-process simulator");
        println!("     identity   {:#010x}", edu_chip::regs::identity::RESET_VALUE);
        println!("     interrupts available");
        return Ok(());
    }

    let manager = DeviceManager::discover()?;

    println!("edu devices: {}", manager.device_count());
    println!();

    for info in manager.devices() {
        println!("[{}] {}", info.index(), info.pcie_address());
        match manager.open(info.index()) {
            Ok(dev) => {
                let id = dev.identify()?;
                println!(
                    "     identity   {id:#010x} (hardware v{}.{})",
                    edu_chip::regs::identity::major(id),
                    edu_chip::regs::identity::minor(id)
                );
                println!(
                    "     interrupts {}",
                    match info.uio() {
                        Some(node) => format!("via {}", node.display()),
                        None => "unavailable (polled only)".to_string(),
                    }
                );
            }
            Err(e) => {
                println!("     (cannot open: {e})");
            }
        }
        println!();
    }

    Ok(())
}

fn print_identity(id: u32) {
    println!("Card ID: {id:#010x}");
    println!(
        "Hardware version: {}.{}",
        edu_chip::regs::identity::major(id),
        edu_chip::regs::identity::minor(id)
    );
}

/// Parse a u32 operand, accepting decimal or `0x`-prefixed hex.
fn parse_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    u32::from_str_radix(digits, radix).map_err(|e| format!("invalid u32 '{s}': {e}"))
}
