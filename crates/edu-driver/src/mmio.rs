//! Memory-mapped BAR0 access
//!
//! Maps the card's register window from PCI sysfs and provides
//! bounds-checked volatile register access. Unsafe is confined to this
//! module and limited to the mmap lifecycle and the volatile accesses
//! themselves.

use crate::bus::RegisterBus;
use crate::error::{EduError, Result};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::ptr::NonNull;

/// Memory-mapped BAR0 register window.
///
/// Mapped from `/sys/bus/pci/devices/<addr>/resource0`. All register
/// accesses are volatile: the hardware can change values behind the
/// compiler's back, and writes have side effects that must not be
/// reordered, cached, or elided.
#[derive(Debug)]
pub struct MmioBar {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    pcie_address: String,
}

impl MmioBar {
    /// Map BAR0 of the device at the given PCI address.
    ///
    /// # Errors
    ///
    /// Returns a mapping fault if the resource file cannot be opened, has
    /// zero size (device not enabled), or cannot be mapped. Mapping faults
    /// are fatal — the device is unusable and no retry is attempted.
    pub fn map(pcie_address: &str) -> Result<Self> {
        let path = format!("/sys/bus/pci/devices/{pcie_address}/resource0");

        tracing::debug!("Mapping BAR0: {path}");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                EduError::mapping_fault(format!("Cannot open {path}: {e}. Is the device enabled?"))
            })?;

        // Truncation acceptable: BAR sizes fit in usize on 64-bit (our only target)
        #[allow(clippy::cast_possible_truncation)]
        let size = file
            .metadata()
            .map_err(|e| EduError::mapping_fault(format!("Cannot stat BAR0: {e}")))?
            .len() as usize;

        if size == 0 {
            return Err(EduError::mapping_fault(
                "BAR0 size is 0 (device not enabled?)",
            ));
        }

        // SAFETY: mmap maps the BAR region into the process address space.
        // Invariants: (1) the fd is valid, just opened above; (2) size is
        // non-zero, checked above; (3) PROT_READ|PROT_WRITE and MAP_SHARED
        // are what device memory requires; (4) the file is stored in the
        // struct so the fd outlives the mapping; (5) the region is unmapped
        // exactly once, in Drop.
        let ptr = unsafe {
            let addr = mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
            .map_err(|e| EduError::mapping_fault(format!("mmap of BAR0 failed: {e}")))?;

            NonNull::new(addr.cast::<u8>())
                .ok_or_else(|| EduError::mapping_fault("mmap returned a null mapping"))?
        };

        tracing::info!("Mapped BAR0 for {pcie_address} ({size:#x} bytes at {ptr:p})");

        Ok(Self {
            ptr,
            size,
            _file: file,
            pcie_address: pcie_address.to_string(),
        })
    }

    /// Get the PCI address this window belongs to.
    #[must_use]
    pub fn pcie_address(&self) -> &str {
        &self.pcie_address
    }

    /// Get the window size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    fn check(&self, offset: usize, what: &str) -> Result<()> {
        if offset + 4 > self.size {
            return Err(EduError::transfer_fault(format!(
                "Out of bounds {what}: offset={offset:#x}, limit={:#x}",
                self.size
            )));
        }
        Ok(())
    }
}

impl RegisterBus for MmioBar {
    fn read32(&self, offset: usize) -> Result<u32> {
        self.check(offset, "read")?;

        // SAFETY: Volatile read from a memory-mapped hardware register.
        // Bounds validated above; ptr is from a successful mmap and valid
        // for self.size bytes; BAR registers are 4-byte aligned. Volatile is
        // required — the hardware can change the value and the compiler
        // must not cache or reorder the access.
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };

        tracing::trace!("read32  @ {offset:#04x} = {value:#010x}");
        Ok(value)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        self.check(offset, "write")?;

        tracing::trace!("write32 @ {offset:#04x} = {value:#010x}");

        // SAFETY: Volatile write to a memory-mapped hardware register.
        // Bounds validated above; ptr is from a successful mmap and valid
        // for self.size bytes; BAR registers are 4-byte aligned. Volatile is
        // required — the write triggers hardware side effects and must not
        // be reordered or elided.
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }

        Ok(())
    }
}

impl Drop for MmioBar {
    fn drop(&mut self) {
        // SAFETY: ptr/size are exactly what mmap returned in map(); Drop
        // runs at most once and no references into the mapping survive it.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap of BAR0 failed during drop: {e}");
            }
        }
        tracing::debug!("Unmapped BAR0 for {}", self.pcie_address);
    }
}

// SAFETY: MmioBar owns the mapping exclusively; mmap'd memory is
// process-wide and moving the handle between threads does not invalidate it.
unsafe impl Send for MmioBar {}

// SAFETY: Register accesses are single volatile 32-bit loads/stores to
// aligned device memory; the device serialises them. Which registers may be
// touched concurrently (the interrupt handler's status/ack pair vs. the
// command path's operand/result pair) is disjoint by the command protocol.
unsafe impl Sync for MmioBar {}
