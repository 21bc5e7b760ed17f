use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    OrangeCartError,
    boards::{Device, Revision},
    builder::{Toolchain, TrellisArgs},
    soc::SocSettings,
};

pub const DEFAULT_BUILD_NAME: &str = "orangecart";
pub const DEFAULT_OUTPUT_DIR: &str = "build/orangecart";

/// Build configuration, as read from a TOML file.
///
/// ```toml
/// revision = "1.2"
/// device = "25F"
///
/// [soc]
/// sys_clk_freq = 48_000_000
/// integrated_main_ram_size = 0x4000
/// sdcard = "native"
///
/// [trellis]
/// nextpnr_seed = 3
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Left unset to auto-detect from a connected board when loading
    pub revision: Option<Revision>,
    pub device: Device,
    pub toolchain: Toolchain,
    pub output_dir: PathBuf,
    pub build_name: String,
    /// Extra HDL sources passed to synthesis
    pub sources: Vec<PathBuf>,
    pub soc: SocSettings,
    pub trellis: TrellisArgs,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            revision: None,
            device: Device::default(),
            toolchain: Toolchain::default(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            build_name: DEFAULT_BUILD_NAME.to_string(),
            sources: Vec::new(),
            soc: SocSettings::default(),
            trellis: TrellisArgs::default(),
        }
    }
}

impl BuildConfig {
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn load(path: &Path) -> Result<Self, OrangeCartError> {
        debug!("Reading config {}", path.display());
        let contents = fs::read_to_string(path).map_err(|source| OrangeCartError::FailedToRead {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| OrangeCartError::InvalidConfig {
            path: path.to_owned(),
            source,
        })
    }

    pub fn revision(&self) -> Revision {
        self.revision.unwrap_or_default()
    }
}
