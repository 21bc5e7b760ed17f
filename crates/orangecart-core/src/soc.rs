//! Composition of the OrangeCart SoC: clocking, reset, and the peripheral
//! blocks whose cores come from the external framework.

use std::{fmt, str::FromStr};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    OrangeCartError,
    boards::{BoardInfo, OrangeCart, Revision, orangecart::DEFAULT_CLK_FREQ},
    io::{Constraint, IoEntry, IoStandard},
    platform::{Platform, Resource},
};

pub const DEFAULT_SYS_CLK_FREQ: u32 = 48_000_000;
pub const POR_COUNTER_WIDTH: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdCardMode {
    /// SPI-mode core on the `spisdcard` pads
    #[default]
    Spi,
    /// 4-bit native core on the `sdcard` pads
    Native,
    None,
}

impl FromStr for SdCardMode {
    type Err = OrangeCartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spi" => Ok(SdCardMode::Spi),
            "native" => Ok(SdCardMode::Native),
            "none" => Ok(SdCardMode::None),
            _ => Err(OrangeCartError::InvalidConfigValue {
                key: "sdcard",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SdCardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SdCardMode::Spi => "spi",
            SdCardMode::Native => "native",
            SdCardMode::None => "none",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpiFlashMode {
    #[serde(rename = "1x")]
    X1,
    #[serde(rename = "4x")]
    X4,
}

/// User-selectable SoC parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocSettings {
    pub sys_clk_freq: u32,
    pub cpu_type: String,
    pub integrated_rom_size: u32,
    pub integrated_sram_size: u32,
    pub integrated_main_ram_size: u32,
    pub uart_name: String,
    pub hyperram_device: String,
    pub sdcard: SdCardMode,
    pub with_pmod_gpio: bool,
}

impl Default for SocSettings {
    fn default() -> Self {
        Self {
            sys_clk_freq: DEFAULT_SYS_CLK_FREQ,
            cpu_type: "vexriscv".to_string(),
            integrated_rom_size: 0x20000,
            integrated_sram_size: 0x2000,
            integrated_main_ram_size: 0,
            uart_name: "serial".to_string(),
            hyperram_device: "S70KS1281".to_string(),
            sdcard: SdCardMode::default(),
            with_pmod_gpio: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PorCounter {
    pub width: u32,
    pub reset: u64,
    /// Raw clock port driving the counter
    pub clock: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClkOut {
    pub domain: String,
    pub freq: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pll {
    pub kind: &'static str,
    pub clkin: String,
    pub clkin_freq: u32,
    pub clkouts: Vec<ClkOut>,
}

/// A condition holding the PLL in reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResetGate {
    /// Power-on-reset counter has not reached zero
    PorPending,
    /// Active-low button is held down
    ButtonPressed { port: String },
}

/// Clock and reset generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Crg {
    pub por: PorCounter,
    pub pll: Pll,
    pub pll_reset: Vec<ResetGate>,
}

impl Crg {
    fn new(
        platform: &mut Platform,
        revision: Revision,
        sys_clk_freq: u32,
    ) -> Result<Self, OrangeCartError> {
        let clk48 = platform.request("clk48", 0)?;
        let clkin = first_port(&clk48)?;

        let mut pll_reset = vec![ResetGate::PorPending];
        if revision.button_gates_reset() {
            let btn = platform.request("usr_btn", 0)?;
            pll_reset.push(ResetGate::ButtonPressed {
                port: first_port(&btn)?,
            });
        }

        Ok(Self {
            por: PorCounter {
                width: POR_COUNTER_WIDTH,
                reset: (1 << POR_COUNTER_WIDTH) - 1,
                clock: clkin.clone(),
            },
            pll: Pll {
                kind: "ECP5PLL",
                clkin,
                clkin_freq: DEFAULT_CLK_FREQ as u32,
                clkouts: vec![ClkOut {
                    domain: "sys".to_string(),
                    freq: sys_clk_freq,
                }],
            },
            pll_reset,
        })
    }
}

fn first_port(resource: &Resource) -> Result<String, OrangeCartError> {
    resource
        .ports
        .first()
        .map(|p| p.name.clone())
        .ok_or_else(|| OrangeCartError::ResourceNotFound {
            name: resource.name.clone(),
            index: resource.index,
        })
}

/// A peripheral attached to the SoC. The core logic is supplied externally;
/// this only records what to instantiate and which resources it drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    SpiFlash {
        resource: String,
        mode: SpiFlashMode,
        dummy_cycles: u32,
    },
    SpiSdCard {
        resource: String,
    },
    SdCard {
        resource: String,
    },
    LedChaser {
        resources: Vec<String>,
        sys_clk_freq: u32,
    },
    Gpio {
        resource: String,
    },
    Uart {
        name: String,
        resource: Option<String>,
    },
}

const UART_NAMES: &[&str] = &["serial", "usb_acm", "crossover", "stub"];

/// Everything the external framework needs to generate the SoC's top level.
#[derive(Debug, Clone, Serialize)]
pub struct SocManifest {
    pub ident: String,
    pub build_name: String,
    pub board: String,
    pub revision: Revision,
    pub device: String,
    pub toolchain: String,
    pub sys_clk_freq: u32,
    pub cpu_type: String,
    pub integrated_rom_size: u32,
    pub integrated_sram_size: u32,
    pub integrated_main_ram_size: u32,
    pub hyperram_device: String,
    pub crg: Crg,
    pub blocks: Vec<Block>,
    pub csrs: Vec<String>,
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone)]
pub struct Soc {
    board: String,
    revision: Revision,
    settings: SocSettings,
    platform: Platform,
    crg: Crg,
    blocks: Vec<Block>,
    csrs: Vec<String>,
}

impl Soc {
    pub fn new(board: &OrangeCart, settings: SocSettings) -> Result<Self, OrangeCartError> {
        if settings.sys_clk_freq == 0 {
            return Err(OrangeCartError::InvalidSysClkFreq(
                settings.sys_clk_freq.to_string(),
            ));
        }

        if !UART_NAMES.contains(&settings.uart_name.as_str()) {
            return Err(OrangeCartError::InvalidConfigValue {
                key: "uart_name",
                value: settings.uart_name.clone(),
            });
        }

        // No HyperRAM controller yet, main RAM has to be integrated
        if settings.integrated_main_ram_size == 0 {
            return Err(OrangeCartError::MissingMainRam {
                hyperram_device: settings.hyperram_device.clone(),
            });
        }

        info!(
            "Assembling SoC on {} ({}) at {} Hz",
            board.board_name(),
            board.device_name(),
            settings.sys_clk_freq
        );

        let mut platform = board.platform();
        let crg = Crg::new(&mut platform, board.revision(), settings.sys_clk_freq)?;

        let mut soc = Self {
            board: board.board_name(),
            revision: board.revision(),
            settings,
            platform,
            crg,
            blocks: Vec::new(),
            csrs: Vec::new(),
        };

        soc.add_uart()?;
        soc.add_spi_flash(SpiFlashMode::X4, 8)?;
        soc.add_sdcard(soc.settings.sdcard)?;
        soc.add_leds()?;
        if soc.settings.with_pmod_gpio {
            soc.add_pmod_gpio()?;
        }

        Ok(soc)
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut Platform {
        &mut self.platform
    }

    pub fn settings(&self) -> &SocSettings {
        &self.settings
    }

    pub fn crg(&self) -> &Crg {
        &self.crg
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn csrs(&self) -> &[String] {
        &self.csrs
    }

    fn add_csr(&mut self, name: &str) {
        self.csrs.push(name.to_string());
    }

    fn add_uart(&mut self) -> Result<(), OrangeCartError> {
        let name = self.settings.uart_name.clone();
        let resource = match name.as_str() {
            "serial" => Some(self.platform.request("serial", 0)?.id()),
            "usb_acm" => Some(self.platform.request("usb", 0)?.id()),
            _ => None,
        };
        self.blocks.push(Block::Uart { name, resource });
        self.add_csr("uart");
        Ok(())
    }

    pub fn add_spi_flash(
        &mut self,
        mode: SpiFlashMode,
        dummy_cycles: u32,
    ) -> Result<(), OrangeCartError> {
        let name = match mode {
            SpiFlashMode::X1 => "spiflash",
            SpiFlashMode::X4 => "spiflash4x",
        };
        let resource = self.platform.request(name, 0)?.id();
        self.blocks.push(Block::SpiFlash {
            resource,
            mode,
            dummy_cycles,
        });
        self.add_csr("spiflash_core");
        self.add_csr("spiflash_phy");
        Ok(())
    }

    /// Attaches the SD card interface. Asking for the mode already attached is
    /// a no-op.
    pub fn add_sdcard(&mut self, mode: SdCardMode) -> Result<(), OrangeCartError> {
        let attached = self.blocks.iter().any(|b| match (b, mode) {
            (Block::SpiSdCard { .. }, SdCardMode::Spi) => true,
            (Block::SdCard { .. }, SdCardMode::Native) => true,
            _ => false,
        });
        if attached {
            debug!("SD card ({}) already attached", mode);
            return Ok(());
        }

        match mode {
            SdCardMode::Spi => {
                let resource = self.platform.request("spisdcard", 0)?.id();
                self.blocks.push(Block::SpiSdCard { resource });
                self.add_csr("spisdcard");
            }
            SdCardMode::Native => {
                let resource = self.platform.request("sdcard", 0)?.id();
                self.blocks.push(Block::SdCard { resource });
                for csr in ["sdphy", "sdcore", "sdblock2mem", "sdmem2block"] {
                    self.add_csr(csr);
                }
            }
            SdCardMode::None => (),
        }
        Ok(())
    }

    fn add_leds(&mut self) -> Result<(), OrangeCartError> {
        let resources = (0..3)
            .map(|i| self.platform.request("user_led", i).map(|r| r.id()))
            .collect::<Result<Vec<_>, _>>()?;
        self.blocks.push(Block::LedChaser {
            resources,
            sys_clk_freq: self.settings.sys_clk_freq,
        });
        self.add_csr("leds");
        Ok(())
    }

    fn add_pmod_gpio(&mut self) -> Result<(), OrangeCartError> {
        self.platform.add_extension(vec![IoEntry::new(
            "gpio",
            0,
            vec![
                Constraint::pins("GPIO:1 GPIO:2 GPIO:3 GPIO:4"),
                IoStandard::LVCMOS33.into(),
            ],
        )])?;
        let resource = self.platform.request("gpio", 0)?.id();
        self.blocks.push(Block::Gpio { resource });
        self.add_csr("gpio");
        Ok(())
    }

    pub fn manifest(&self, build_name: &str) -> SocManifest {
        SocManifest {
            ident: format!("LiteX SoC on OrangeCart {}", self.revision),
            build_name: build_name.to_string(),
            board: self.board.clone(),
            revision: self.revision,
            device: self.platform.device().to_string(),
            toolchain: self.platform.toolchain().to_string(),
            sys_clk_freq: self.settings.sys_clk_freq,
            cpu_type: self.settings.cpu_type.clone(),
            integrated_rom_size: self.settings.integrated_rom_size,
            integrated_sram_size: self.settings.integrated_sram_size,
            integrated_main_ram_size: self.settings.integrated_main_ram_size,
            hyperram_device: self.settings.hyperram_device.clone(),
            crg: self.crg.clone(),
            blocks: self.blocks.clone(),
            csrs: self.csrs.clone(),
            resources: self.platform.requested().to_vec(),
        }
    }
}
