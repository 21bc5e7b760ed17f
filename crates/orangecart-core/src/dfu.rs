//! DFU 1.0 file suffix, as appended by `dfu-suffix`.

use std::{io::Write, mem};

use static_assertions::const_assert_eq;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::little_endian::{U16, U32},
};

pub const DFU_SUFFIX_LENGTH: usize = 16;
pub const DFU_SIGNATURE: [u8; 3] = *b"UFD";
pub const DFU_BCD_1_0: u16 = 0x0100;
pub const DFU_ANY_DEVICE: u16 = 0xffff;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct DfuSuffix {
    pub bcd_device: U16,
    pub id_product: U16,
    pub id_vendor: U16,
    pub bcd_dfu: U16,
    pub signature: [u8; 3],
    pub length: u8,
    pub crc: U32,
}

const_assert_eq!(mem::size_of::<DfuSuffix>(), DFU_SUFFIX_LENGTH);

impl DfuSuffix {
    pub fn new(vid: u16, pid: u16) -> Self {
        Self {
            bcd_device: U16::new(DFU_ANY_DEVICE),
            id_product: U16::new(pid),
            id_vendor: U16::new(vid),
            bcd_dfu: U16::new(DFU_BCD_1_0),
            signature: DFU_SIGNATURE,
            length: DFU_SUFFIX_LENGTH as u8,
            crc: U32::new(0),
        }
    }
}

const CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                0xedb88320 ^ (crc >> 1)
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// CRC-32 as used by DFU: reflected, without the final inversion.
pub fn crc32(crc: u32, data: &[u8]) -> u32 {
    data.iter().fold(crc, |crc, byte| {
        CRC_TABLE[((crc ^ *byte as u32) & 0xff) as usize] ^ (crc >> 8)
    })
}

pub const CRC_INIT: u32 = 0xffffffff;

/// Writes `image` followed by a suffix naming `vid`:`pid`.
pub fn write_with_suffix(
    image: &[u8],
    vid: u16,
    pid: u16,
    mut output: impl Write,
) -> std::io::Result<DfuSuffix> {
    let mut suffix = DfuSuffix::new(vid, pid);

    let crc = crc32(CRC_INIT, image);
    let crc = crc32(crc, &suffix.as_bytes()[..DFU_SUFFIX_LENGTH - 4]);
    suffix.crc = U32::new(crc);

    output.write_all(image)?;
    output.write_all(suffix.as_bytes())?;
    output.flush()?;

    Ok(suffix)
}

/// Returns the suffix of `data` if it carries a valid one.
pub fn parse_suffix(data: &[u8]) -> Option<DfuSuffix> {
    let start = data.len().checked_sub(DFU_SUFFIX_LENGTH)?;
    let suffix = DfuSuffix::read_from_bytes(&data[start..]).ok()?;

    if suffix.signature != DFU_SIGNATURE || suffix.length as usize != DFU_SUFFIX_LENGTH {
        return None;
    }

    if crc32(CRC_INIT, &data[..data.len() - 4]) != suffix.crc.get() {
        return None;
    }

    Some(suffix)
}
