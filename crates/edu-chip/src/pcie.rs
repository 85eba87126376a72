//! PCI identifiers for the edu device.
//!
//! Source: QEMU `hw/misc/edu.c` (the card enumerates with QEMU's
//! educational vendor/device pair).

/// QEMU educational vendor ID (`lspci: 1234:11e8`).
pub const EDU_VENDOR_ID: u16 = 0x1234;

/// edu device ID.
pub const EDU_DEVICE_ID: u16 = 0x11E8;

/// Format a `vendor:device` string for use with `lspci -d`.
#[must_use]
pub fn lspci_filter() -> String {
    format!("{EDU_VENDOR_ID:04x}:{EDU_DEVICE_ID:04x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lspci_filter_matches_qemu_ids() {
        assert_eq!(lspci_filter(), "1234:11e8");
    }
}
