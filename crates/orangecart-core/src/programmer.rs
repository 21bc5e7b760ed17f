use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::{info, warn};

use crate::{
    OrangeCartError,
    boards::{UsbDevice, UsbVersion},
    dfu::{parse_suffix, write_with_suffix},
    tool::ToolInvocation,
};

/// Programmer for boards running a DFU bootloader, driven through `dfu-util`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuProg {
    pub vid: u16,
    pub pid: u16,
    pub alt: u8,
}

impl DfuProg {
    pub const fn new(vid: u16, pid: u16, alt: u8) -> Self {
        Self { vid, pid, alt }
    }

    pub fn matches(&self, device: &UsbDevice) -> bool {
        device.vendor_id == self.vid && device.product_id == self.pid
    }

    /// Path of the suffixed image written next to `bitstream`
    pub fn image_path(bitstream: &Path) -> PathBuf {
        let mut path = bitstream.as_os_str().to_owned();
        path.push(".dfu");
        PathBuf::from(path)
    }

    /// Writes `bitstream` with a DFU suffix for this board. A bitstream that
    /// already carries a valid suffix is written unchanged.
    pub fn write_image(&self, bitstream: &[u8], mut output: impl Write) -> io::Result<()> {
        if let Some(suffix) = parse_suffix(bitstream) {
            if (suffix.id_vendor.get(), suffix.id_product.get()) != (self.vid, self.pid) {
                warn!(
                    "Bitstream already carries a DFU suffix for {:04x}:{:04x}",
                    suffix.id_vendor.get(),
                    suffix.id_product.get()
                );
            }
            return output.write_all(bitstream);
        }

        write_with_suffix(bitstream, self.vid, self.pid, output)?;
        Ok(())
    }

    /// Writes the suffixed image to `image_path`, removing it again on failure.
    pub fn write_image_file(&self, bitstream: &[u8], image_path: &Path) -> Result<(), OrangeCartError> {
        let write_error = |source: io::Error| OrangeCartError::FailedToWrite {
            path: image_path.to_owned(),
            source,
        };

        let image = fs::File::create(image_path).map_err(write_error)?;
        if let Err(source) = self.write_image(bitstream, image) {
            fs::remove_file(image_path).ok();
            return Err(write_error(source));
        }
        Ok(())
    }

    pub fn download_command(&self, image: &Path) -> ToolInvocation {
        ToolInvocation::new("dfu-util")
            .arg("-d")
            .arg(format!("{:04x}:{:04x}", self.vid, self.pid))
            .arg("-a")
            .arg(self.alt.to_string())
            .arg("-D")
            .arg(image.to_string_lossy())
            .arg("-R")
    }

    /// Suffixes `bitstream` into `<bitstream>.dfu` and downloads it.
    pub fn load_bitstream(&self, bitstream: &Path) -> Result<(), OrangeCartError> {
        let data = fs::read(bitstream).map_err(|source| OrangeCartError::FailedToRead {
            path: bitstream.to_owned(),
            source,
        })?;

        let image_path = Self::image_path(bitstream);
        self.write_image_file(&data, &image_path)?;

        info!("Loading {}", image_path.display());
        self.download_command(&image_path).run()
    }
}

/// Lists DFU devices currently attached.
pub fn list_devices() -> Result<Vec<UsbDevice>, OrangeCartError> {
    let output = ToolInvocation::new("dfu-util").arg("--list").output()?;
    Ok(parse_device_list(&output))
}

/// Parses the `Found DFU: [vvvv:pppp] key=value, ...` lines of `dfu-util --list`.
/// Runtime-mode interfaces and malformed lines are skipped.
pub fn parse_device_list(output: &str) -> Vec<UsbDevice> {
    output.lines().filter_map(parse_device_line).collect()
}

fn parse_device_line(line: &str) -> Option<UsbDevice> {
    let rest = line.trim().strip_prefix("Found DFU: [")?;
    let (ids, rest) = rest.split_once(']')?;
    let (vid, pid) = ids.split_once(':')?;

    let mut device = UsbDevice {
        vendor_id: u16::from_str_radix(vid, 16).ok()?,
        product_id: u16::from_str_radix(pid, 16).ok()?,
        version: UsbVersion(0, 0),
        devnum: 0,
        alt: 0,
        path: String::new(),
    };

    for field in rest.split(',') {
        let Some((key, value)) = field.trim().split_once('=') else {
            continue;
        };
        let value = value.trim_matches('"');
        match key {
            "ver" => {
                let bcd = u16::from_str_radix(value, 16).ok()?;
                device.version = UsbVersion((bcd >> 8) as u8, (bcd & 0xff) as u8);
            }
            "devnum" => device.devnum = value.parse().ok()?,
            "alt" => device.alt = value.parse().ok()?,
            "path" => device.path = value.to_string(),
            _ => (),
        }
    }

    Some(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfu::DFU_SUFFIX_LENGTH;

    const LISTING: &str = r#"dfu-util 0.11

Copyright 2005-2009 Weston Schmidt, Harald Welte and OpenMoko Inc.

Found Runtime: [1d50:614e] ver=0100, devnum=7, cfg=1, intf=2, path="1-1", alt=0, name="UNKNOWN", serial="UNKNOWN"
Found DFU: [1209:5a0c] ver=0101, devnum=12, cfg=1, intf=0, path="1-2", alt=0, name="0x00000000", serial="UNKNOWN"
Found DFU: [1209:5a0d] ver=0102, devnum=13, cfg=1, intf=0, path="1-3.1", alt=1, name="bootloader", serial="UNKNOWN"
Found DFU: [zzzz:5a0d] ver=0102, devnum=13
"#;

    #[test]
    fn parses_dfu_listing() {
        let devices = parse_device_list(LISTING);
        assert_eq!(devices.len(), 2);

        assert_eq!(
            devices[0],
            UsbDevice {
                vendor_id: 0x1209,
                product_id: 0x5a0c,
                version: UsbVersion(1, 1),
                devnum: 12,
                alt: 0,
                path: "1-2".to_string(),
            }
        );
        assert_eq!(devices[1].product_id, 0x5a0d);
        assert_eq!(devices[1].alt, 1);
        assert_eq!(devices[1].path, "1-3.1");
    }

    #[test]
    fn download_command_names_device() {
        let prog = DfuProg::new(0x1209, 0x5a0c, 0);
        let cmd = prog.download_command(Path::new("build/gateware/orangecart.bit.dfu"));
        assert_eq!(cmd.program, "dfu-util");
        assert_eq!(
            cmd.args,
            ["-d", "1209:5a0c", "-a", "0", "-D", "build/gateware/orangecart.bit.dfu", "-R"]
        );
    }

    #[test]
    fn image_path_appends_extension() {
        assert_eq!(
            DfuProg::image_path(Path::new("gateware/orangecart.bit")),
            Path::new("gateware/orangecart.bit.dfu")
        );
    }

    #[test]
    fn suffix_is_added_once() {
        let prog = DfuProg::new(0x1209, 0x5a0d, 0);

        let mut once = Vec::new();
        prog.write_image(b"bitstream", &mut once).unwrap();
        assert_eq!(once.len(), 9 + DFU_SUFFIX_LENGTH);

        let mut twice = Vec::new();
        prog.write_image(&once, &mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn image_write_failure_names_the_image() {
        let not_a_dir = tempfile::NamedTempFile::new().unwrap();
        let image_path = not_a_dir.path().join("orangecart.bit.dfu");
        let prog = DfuProg::new(0x1209, 0x5a0c, 0);

        match prog.write_image_file(b"bitstream", &image_path) {
            Err(OrangeCartError::FailedToWrite { path, .. }) => assert_eq!(path, image_path),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn image_file_carries_suffix() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let image_path = temp_dir.path().join("orangecart.bit.dfu");
        let prog = DfuProg::new(0x1209, 0x5a0c, 0);

        prog.write_image_file(b"bitstream", &image_path).unwrap();

        let image = fs::read(&image_path).unwrap();
        let suffix = parse_suffix(&image).unwrap();
        assert_eq!(suffix.id_product.get(), 0x5a0c);
    }
}
