use std::{path::PathBuf, process::ExitStatus};

use thiserror::Error;

use crate::io::IoStandard;

pub mod boards;
pub mod builder;
pub mod config;
pub mod dfu;
pub mod io;
pub mod platform;
pub mod programmer;
pub mod soc;
pub mod tool;
pub mod transform;

pub use boards::{BoardInfo, BoardIter, Device, OrangeCart, Revision};
pub use builder::{Builder, Toolchain, TrellisArgs};
pub use config::BuildConfig;
pub use programmer::DfuProg;
pub use soc::{SdCardMode, Soc, SocSettings};

#[derive(Error, Debug)]
pub enum OrangeCartError {
    #[error("Unknown board revision '{0}' (expected 1.0 or 1.2)")]
    UnknownRevision(String),
    #[error("Unknown ECP5 device '{0}' (expected 12F, 25F, 45F or 85F)")]
    UnknownDevice(String),
    #[error("Unknown toolchain '{0}' (expected trellis or diamond)")]
    UnknownToolchain(String),
    #[error("Unknown IO standard '{0}'")]
    UnknownIoStandard(String),
    #[error("IO standard {0} has no mapping for this revision")]
    UnmappedIoStandard(IoStandard),
    #[error("Malformed ECP5 part name '{0}'")]
    InvalidDevice(String),
    #[error("Invalid system clock frequency '{0}'")]
    InvalidSysClkFreq(String),
    #[error("Invalid value '{value}' for {key}")]
    InvalidConfigValue { key: &'static str, value: String },

    #[error("Resource {name}:{index} is defined more than once")]
    DuplicateResource { name: String, index: u32 },
    #[error("Resource {name} is not defined")]
    MissingResource { name: String },
    #[error("Subsignal {entry}.{subsignal} is already defined")]
    DuplicateSubsignal { entry: String, subsignal: String },
    #[error("Subsignal {entry}.{subsignal} is not defined")]
    MissingSubsignal { entry: String, subsignal: String },
    #[error("Unknown connector '{0}'")]
    UnknownConnector(String),
    #[error("Connector {connector} has no pad at position {pin}")]
    BadConnectorPin { connector: String, pin: String },

    #[error("Resource {name}:{index} not found")]
    ResourceNotFound { name: String, index: u32 },
    #[error("Resource {name}:{index} has already been requested")]
    ResourceAlreadyRequested { name: String, index: u32 },
    #[error("Pad {pad} of {requested} is already used by {held_by}")]
    PadConflict {
        pad: String,
        requested: String,
        held_by: String,
    },

    #[error(
        "No main RAM: the {hyperram_device} HyperRAM controller is not available, set an integrated main RAM size"
    )]
    MissingMainRam { hyperram_device: String },

    #[error("Failed to read {path}")]
    FailedToRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}")]
    FailedToWrite {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}")]
    InvalidConfig {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize SoC manifest")]
    FailedToSerialize(#[source] serde_json::Error),
    #[error("HDL source {0} does not exist, generate it from the SoC manifest first")]
    MissingSource(PathBuf),
    #[error("Failed to run {program}")]
    FailedToSpawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} failed with {status}")]
    ToolFailed { program: String, status: ExitStatus },
}
