pub use orangecart::{Device, OrangeCart, Revision};

use crate::programmer::DfuProg;

pub mod orangecart;

/// This is a helper struct, which allows you to iterate over every board revision defined
pub struct BoardIter {
    inner: std::slice::Iter<'static, Revision>,
}

impl BoardIter {
    /// Creates a new BoardIter
    pub fn new() -> Self {
        Self {
            inner: Revision::ALL.iter(),
        }
    }

    /// Finds the revision whose programmer identifiers match a connected device
    pub fn find_by_device(device: &UsbDevice) -> Option<Revision> {
        Self::new().find(|revision| revision.programmer().matches(device))
    }
}

impl Default for BoardIter {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for BoardIter {
    type Item = Revision;
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().copied()
    }
}

/// This is the version of the firmware on the usb device, as reported in bcd
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbVersion(pub u8, pub u8);

/// A DFU-capable usb device, as listed by `dfu-util --list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub version: UsbVersion,
    pub devnum: u8,
    pub alt: u8,
    pub path: String,
}

/// This trait helps by allowing for definitions of multiple different boards.
pub trait BoardInfo {
    /// Check if the board is connected as the specified UsbDevice
    fn is_device_board(&self, device: &UsbDevice) -> bool {
        self.create_programmer().matches(device)
    }

    /// Name of the clock input the platform constrains by default
    fn default_clk_name(&self) -> &'static str;

    /// Period of the default clock, in ns
    fn default_clk_period(&self) -> f64;

    /// Full FPGA part name as passed to the toolchain
    fn device_name(&self) -> String;

    fn create_programmer(&self) -> DfuProg;

    /// Get the board's name
    fn board_name(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(vendor_id: u16, product_id: u16) -> UsbDevice {
        UsbDevice {
            vendor_id,
            product_id,
            version: UsbVersion(1, 1),
            devnum: 4,
            alt: 0,
            path: "1-2".to_string(),
        }
    }

    #[test]
    fn iterates_every_revision() {
        let revisions: Vec<_> = BoardIter::new().collect();
        assert_eq!(revisions, [Revision::V1_0, Revision::V1_2]);
    }

    #[test]
    fn detects_revision_from_device() {
        assert_eq!(
            BoardIter::find_by_device(&device(0x1209, 0x5a0c)),
            Some(Revision::V1_0)
        );
        assert_eq!(
            BoardIter::find_by_device(&device(0x1209, 0x5a0d)),
            Some(Revision::V1_2)
        );
        assert_eq!(BoardIter::find_by_device(&device(0x1209, 0x0003)), None);
        assert_eq!(BoardIter::find_by_device(&device(0x2e8a, 0x5a0c)), None);
    }
}
