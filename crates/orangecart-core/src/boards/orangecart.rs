// Pin tables for the OrangeCart, a C64 expansion port cartridge built around
// an ECP5 in the CABGA256 package.

use std::{fmt, str::FromStr};

use log::debug;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::{
    OrangeCartError,
    boards::BoardInfo,
    builder::Toolchain,
    io::{Connector, Constraint, IoEntry, IoStandard, IoStandard::*, PinTable, Subsignal},
    platform::Platform,
    programmer::DfuProg,
    transform::{RevisionTransform, StandardMap, SubsignalInsertion},
};

pub const DEFAULT_CLK_NAME: &str = "clk48";
pub const DEFAULT_CLK_FREQ: f64 = 48e6;
pub const DEFAULT_CLK_PERIOD: f64 = 1e9 / DEFAULT_CLK_FREQ;

static IO_V1_0: OnceCell<PinTable> = OnceCell::new();
static IO_V1_2: OnceCell<PinTable> = OnceCell::new();

const DFU_VID: u16 = 0x1209;
const DFU_PID_V1_0: u16 = 0x5a0c;
const DFU_PID_V1_2: u16 = 0x5a0d;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Revision {
    #[default]
    V1_0,
    V1_2,
}

impl Revision {
    pub const ALL: &'static [Revision] = &[Revision::V1_0, Revision::V1_2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Revision::V1_0 => "1.0",
            Revision::V1_2 => "1.2",
        }
    }

    pub fn programmer(&self) -> DfuProg {
        match self {
            Revision::V1_0 => DfuProg::new(DFU_VID, DFU_PID_V1_0, 0),
            Revision::V1_2 => DfuProg::new(DFU_VID, DFU_PID_V1_2, 0),
        }
    }

    /// Whether the user button also holds the PLL in reset
    pub fn button_gates_reset(&self) -> bool {
        matches!(self, Revision::V1_2)
    }

    /// The revision's pin table, built on first use
    pub fn io(&self) -> Result<&'static PinTable, OrangeCartError> {
        match self {
            Revision::V1_0 => IO_V1_0.get_or_try_init(|| PinTable::new(io_v1_0())),
            Revision::V1_2 => IO_V1_2.get_or_try_init(|| {
                debug!("Deriving OrangeCart 1.2 pin table");
                PinTable::new(V1_2_TRANSFORM.apply(&io_v1_0())?)
            }),
        }
    }

    pub fn connectors(&self) -> Vec<Connector> {
        match self {
            // Same header on both revisions
            Revision::V1_0 | Revision::V1_2 => connectors_v1_0(),
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Revision {
    type Err = OrangeCartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Revision::ALL
            .iter()
            .copied()
            .find(|rev| rev.as_str() == s)
            .ok_or_else(|| OrangeCartError::UnknownRevision(s.to_string()))
    }
}

impl TryFrom<String> for Revision {
    type Error = OrangeCartError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Revision> for String {
    fn from(rev: Revision) -> Self {
        rev.as_str().to_string()
    }
}

/// ECP5 die size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    Size12F,
    #[default]
    Size25F,
    Size45F,
    Size85F,
}

impl Device {
    pub const ALL: &'static [Device] = &[
        Device::Size12F,
        Device::Size25F,
        Device::Size45F,
        Device::Size85F,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Size12F => "12F",
            Device::Size25F => "25F",
            Device::Size45F => "45F",
            Device::Size85F => "85F",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = OrangeCartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Device::ALL
            .iter()
            .copied()
            .find(|dev| dev.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| OrangeCartError::UnknownDevice(s.to_string()))
    }
}

impl TryFrom<String> for Device {
    type Error = OrangeCartError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Device> for String {
    fn from(dev: Device) -> Self {
        dev.as_str().to_string()
    }
}

/// Board configuration for one OrangeCart revision. Built once and handed to
/// the platform/SoC layers, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct OrangeCart {
    revision: Revision,
    device: Device,
    toolchain: Toolchain,
    io: PinTable,
    connectors: Vec<Connector>,
}

impl OrangeCart {
    pub fn new(
        revision: Revision,
        device: Device,
        toolchain: Toolchain,
    ) -> Result<Self, OrangeCartError> {
        debug!("Loading pin tables for OrangeCart {}", revision);

        Ok(Self {
            revision,
            device,
            toolchain,
            io: revision.io()?.clone(),
            connectors: revision.connectors(),
        })
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn toolchain(&self) -> Toolchain {
        self.toolchain
    }

    pub fn io(&self) -> &PinTable {
        &self.io
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    /// Hardware-build handle holding this revision's tables
    pub fn platform(&self) -> Platform {
        Platform::new(
            self.device_name(),
            self.toolchain,
            self.io.clone(),
            self.connectors.clone(),
            self.default_clk_name(),
            self.default_clk_period(),
        )
    }
}

impl BoardInfo for OrangeCart {
    fn default_clk_name(&self) -> &'static str {
        DEFAULT_CLK_NAME
    }

    fn default_clk_period(&self) -> f64 {
        DEFAULT_CLK_PERIOD
    }

    fn device_name(&self) -> String {
        format!("LFE5U-{}-6BG256C", self.device)
    }

    fn create_programmer(&self) -> DfuProg {
        self.revision.programmer()
    }

    fn board_name(&self) -> String {
        format!("orangecart-{}", self.revision)
    }
}

// IOs ----------------------------------------------------------------------------------------------

fn pins(pads: &str) -> Constraint {
    Constraint::pins(pads)
}

fn misc(value: &str) -> Constraint {
    Constraint::misc(value)
}

fn io_standard(std: IoStandard) -> Constraint {
    Constraint::Standard(std)
}

fn sub(name: &str, constraints: Vec<Constraint>) -> Constraint {
    Constraint::Subsignal(Subsignal::new(name, constraints))
}

fn entry(name: &str, index: u32, constraints: Vec<Constraint>) -> IoEntry {
    IoEntry::new(name, index, constraints)
}

pub fn io_v1_0() -> Vec<IoEntry> {
    vec![
        entry("clk48", 0, vec![pins("C8"), io_standard(LVCMOS33)]),
        entry("rst_n", 0, vec![pins("M8"), io_standard(LVCMOS33)]),
        // F12 sits on a 1.8V bank on this revision
        entry("usr_btn", 0, vec![pins("F12"), io_standard(LVCMOS18), misc("PULLMODE=UP")]),
        entry(
            "rgb_led",
            0,
            vec![
                sub("r", vec![pins("T6"), io_standard(LVCMOS33)]),
                sub("g", vec![pins("R6"), io_standard(LVCMOS33)]),
                sub("b", vec![pins("R8"), io_standard(LVCMOS33)]),
            ],
        ),
        entry("user_led", 0, vec![pins("T6"), io_standard(LVCMOS33)]), // rgb_led.r
        entry("user_led", 1, vec![pins("R6"), io_standard(LVCMOS33)]), // rgb_led.g
        entry("user_led", 2, vec![pins("R8"), io_standard(LVCMOS33)]), // rgb_led.b
        entry(
            "hyperram",
            0,
            vec![
                sub("dq", vec![pins("G15 B16 C15 D16 C16 F15 F16 E15"), io_standard(LVCMOS18)]),
                sub("rwds", vec![pins("F14"), io_standard(LVCMOS18)]),
                sub("reset_n", vec![pins("J13"), io_standard(LVCMOS18)]),
                sub("cs_n", vec![pins("K14"), io_standard(LVCMOS18)]),
                sub("ck_p", vec![pins("J16"), io_standard(SSTL18D_II)]),
                sub("psc_p", vec![pins("G16"), io_standard(SSTL18D_II)]),
                misc("SLEWRATE=FAST"),
            ],
        ),
        entry(
            "usb",
            0,
            vec![
                sub("d_p", vec![pins("R5"), misc("PULLMODE=DOWN")]),
                sub("d_n", vec![pins("T4"), misc("PULLMODE=DOWN")]),
                sub("pullup", vec![pins("N6")]),
                io_standard(LVCMOS33),
            ],
        ),
        // Flash clock goes through the USRMCLK primitive, so it has no pad here
        entry(
            "spiflash4x",
            0,
            vec![
                sub("cs_n", vec![pins("N8"), io_standard(LVCMOS33)]),
                sub("dq", vec![pins("T8 T7 M7 N7"), io_standard(LVCMOS33)]),
            ],
        ),
        entry(
            "spiflash",
            0,
            vec![
                sub("cs_n", vec![pins("N8"), io_standard(LVCMOS33)]),
                sub("miso", vec![pins("T7"), io_standard(LVCMOS33)]),
                sub("mosi", vec![pins("T8"), io_standard(LVCMOS33)]),
                sub("wp", vec![pins("M7"), io_standard(LVCMOS33)]),
                sub("hold", vec![pins("N7"), io_standard(LVCMOS33)]),
            ],
        ),
        entry(
            "spisdcard",
            0,
            vec![
                sub("clk", vec![pins("A10")]),
                sub("mosi", vec![pins("E11"), misc("PULLMODE=UP")]),
                sub("cs_n", vec![pins("B11"), misc("PULLMODE=UP")]),
                sub("miso", vec![pins("C9"), misc("PULLMODE=UP")]),
                misc("SLEWRATE=FAST"),
                io_standard(LVCMOS33),
            ],
        ),
        entry(
            "sdcard",
            0,
            vec![
                sub("clk", vec![pins("A10")]),
                sub("cmd", vec![pins("E11"), misc("PULLMODE=UP")]),
                sub("data", vec![pins("C9 E9 C11 B11"), misc("PULLMODE=UP")]),
                sub("cd", vec![pins("A11"), misc("PULLMODE=UP")]),
                io_standard(LVCMOS33),
                misc("SLEWRATE=FAST"),
            ],
        ),
        entry(
            "serial",
            0,
            vec![
                sub("tx", vec![pins("D8"), io_standard(LVCMOS33)]),
                sub("rx", vec![pins("E8"), io_standard(LVCMOS33)]),
            ],
        ),
        entry(
            "c64expansionport",
            0,
            vec![
                sub("d_en_n", vec![pins("T3")]),
                sub("d_dir", vec![pins("T2")]),
                sub("a_en_n", vec![pins("L1 E2")]),
                sub("a_dir", vec![pins("L5 E1")]),
                sub("a", vec![pins("M6 R4 P4 N4 N5 M5 M3 L4 H5 G4 J1 J2 G1 G2 F1 F2")]),
                sub("d", vec![pins("M1 N3 P2 N1 R3 P1 R2 R1")]),
                sub("phi2", vec![pins("C2")]),
                sub("nmi_out", vec![pins("G5")]),
                sub("reset_in_n", vec![pins("B1")]),
                sub("reset_out", vec![pins("C1")]),
                sub("romh_n", vec![pins("C3")]),
                sub("dma_out", vec![pins("M2")]),
                sub("ba", vec![pins("K2")]),
                sub("roml_n", vec![pins("L2")]),
                sub("io2_n", vec![pins("K1")]),
                sub("exrom", vec![pins("D1")]),
                sub("game", vec![pins("D3")]),
                sub("io1_n", vec![pins("F5")]),
                sub("dotclk", vec![pins("B2")]),
                sub("rw_in", vec![pins("E3")]),
                sub("rw_out_n", vec![pins("F3")]),
                sub("irq_out", vec![pins("F4")]),
                io_standard(LVCMOS33),
                misc("SLEWRATE=SLOW"),
            ],
        ),
        entry(
            "clockport",
            0,
            vec![
                sub("iowr_n", vec![pins("G3")]),
                sub("iord_n", vec![pins("H3")]),
                sub("rtc_cs_n", vec![pins("H4")]),
                sub("spare_cs_n", vec![pins("J5")]),
                io_standard(LVCMOS33),
                misc("SLEWRATE=SLOW"),
            ],
        ),
    ]
}

/// 1.2 moved the 1.8V banks to 3.3V and routed the NMI/IRQ inputs of the
/// expansion port.
pub const V1_2_TRANSFORM: RevisionTransform = RevisionTransform {
    standards: StandardMap(&[
        (LVCMOS18, LVCMOS33),
        (SSTL18D_II, LVCMOS33D),
        (LVCMOS33, LVCMOS33),
        (LVCMOS33D, LVCMOS33D),
    ]),
    target: "c64expansionport",
    insertions: &[
        SubsignalInsertion {
            after: "nmi_out",
            name: "nmi_in_n",
            pads: "H2",
        },
        SubsignalInsertion {
            after: "irq_out",
            name: "irq_in_n",
            pads: "P3",
        },
    ],
};

// Connectors ---------------------------------------------------------------------------------------

pub fn connectors_v1_0() -> Vec<Connector> {
    vec![
        // "Pmod" connector
        Connector::new("GPIO", "- B9 B10 C10 A9"),
    ]
}
