use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::OrangeCartError;

/// IO standards supported by ECP5 IO banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum IoStandard {
    LVCMOS33,
    LVCMOS25,
    LVCMOS18,
    LVCMOS15,
    LVCMOS12,
    LVCMOS33D,
    LVCMOS25D,
    SSTL18_I,
    SSTL18_II,
    SSTL18D_I,
    SSTL18D_II,
    SSTL135_I,
    SSTL135D_I,
    LVDS,
}

impl IoStandard {
    pub const ALL: &'static [IoStandard] = &[
        IoStandard::LVCMOS33,
        IoStandard::LVCMOS25,
        IoStandard::LVCMOS18,
        IoStandard::LVCMOS15,
        IoStandard::LVCMOS12,
        IoStandard::LVCMOS33D,
        IoStandard::LVCMOS25D,
        IoStandard::SSTL18_I,
        IoStandard::SSTL18_II,
        IoStandard::SSTL18D_I,
        IoStandard::SSTL18D_II,
        IoStandard::SSTL135_I,
        IoStandard::SSTL135D_I,
        IoStandard::LVDS,
    ];

    /// Name as written in constraint files
    pub fn as_str(&self) -> &'static str {
        match self {
            IoStandard::LVCMOS33 => "LVCMOS33",
            IoStandard::LVCMOS25 => "LVCMOS25",
            IoStandard::LVCMOS18 => "LVCMOS18",
            IoStandard::LVCMOS15 => "LVCMOS15",
            IoStandard::LVCMOS12 => "LVCMOS12",
            IoStandard::LVCMOS33D => "LVCMOS33D",
            IoStandard::LVCMOS25D => "LVCMOS25D",
            IoStandard::SSTL18_I => "SSTL18_I",
            IoStandard::SSTL18_II => "SSTL18_II",
            IoStandard::SSTL18D_I => "SSTL18D_I",
            IoStandard::SSTL18D_II => "SSTL18D_II",
            IoStandard::SSTL135_I => "SSTL135_I",
            IoStandard::SSTL135D_I => "SSTL135D_I",
            IoStandard::LVDS => "LVDS",
        }
    }

    pub fn is_differential(&self) -> bool {
        matches!(
            self,
            IoStandard::LVCMOS33D
                | IoStandard::LVCMOS25D
                | IoStandard::SSTL18D_I
                | IoStandard::SSTL18D_II
                | IoStandard::SSTL135D_I
                | IoStandard::LVDS
        )
    }
}

impl fmt::Display for IoStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IoStandard {
    type Err = OrangeCartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IoStandard::ALL
            .iter()
            .copied()
            .find(|std| std.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| OrangeCartError::UnknownIoStandard(s.to_string()))
    }
}

/// Placeholder for an unused position in a connector
pub const PAD_PLACEHOLDER: &str = "-";

/// Ordered list of package pads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pins(pub Vec<String>);

impl Pins {
    pub fn new(pads: &str) -> Self {
        Self(pads.split_whitespace().map(str::to_string).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Pins(Pins),
    Standard(IoStandard),
    Misc(String),
    Subsignal(Subsignal),
}

impl Constraint {
    pub fn pins(pads: &str) -> Self {
        Constraint::Pins(Pins::new(pads))
    }

    pub fn misc(value: &str) -> Self {
        Constraint::Misc(value.to_string())
    }
}

impl From<IoStandard> for Constraint {
    fn from(std: IoStandard) -> Self {
        Constraint::Standard(std)
    }
}

impl From<Subsignal> for Constraint {
    fn from(sub: Subsignal) -> Self {
        Constraint::Subsignal(sub)
    }
}

/// A named signal inside an [`IoEntry`], carrying its own pads and attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subsignal {
    pub name: String,
    pub constraints: Vec<Constraint>,
}

impl Subsignal {
    pub fn new(name: &str, constraints: Vec<Constraint>) -> Self {
        Self {
            name: name.to_string(),
            constraints,
        }
    }
}

/// One pin assignment, `(name, index)` is its identity within a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoEntry {
    pub name: String,
    pub index: u32,
    pub constraints: Vec<Constraint>,
}

impl IoEntry {
    pub fn new(name: &str, index: u32, constraints: Vec<Constraint>) -> Self {
        Self {
            name: name.to_string(),
            index,
            constraints,
        }
    }

    pub fn key(&self) -> (&str, u32) {
        (&self.name, self.index)
    }

    pub fn subsignals(&self) -> impl Iterator<Item = &Subsignal> {
        subsignals_of(&self.constraints)
    }

    pub fn subsignal(&self, name: &str) -> Option<&Subsignal> {
        self.subsignals().find(|sub| sub.name == name)
    }
}

pub(crate) fn subsignals_of(constraints: &[Constraint]) -> impl Iterator<Item = &Subsignal> {
    constraints.iter().filter_map(|c| match c {
        Constraint::Subsignal(sub) => Some(sub),
        _ => None,
    })
}

/// Validated, ordered list of pin assignments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinTable {
    entries: Vec<IoEntry>,
}

impl PinTable {
    pub fn new(entries: Vec<IoEntry>) -> Result<Self, OrangeCartError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.key()) {
                return Err(OrangeCartError::DuplicateResource {
                    name: entry.name.clone(),
                    index: entry.index,
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[IoEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str, index: u32) -> Option<&IoEntry> {
        self.entries.iter().find(|e| e.name == name && e.index == index)
    }

    pub fn extend(&mut self, extra: Vec<IoEntry>) -> Result<(), OrangeCartError> {
        let mut entries = self.entries.clone();
        entries.extend(extra);
        *self = PinTable::new(entries)?;
        Ok(())
    }
}

/// A physical header; `pads[i]` is the pad wired to position `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connector {
    pub name: String,
    pub pads: Vec<String>,
}

impl Connector {
    pub fn new(name: &str, pads: &str) -> Self {
        Self {
            name: name.to_string(),
            pads: Pins::new(pads).0,
        }
    }

    pub fn pin_count(&self) -> usize {
        self.pads.len()
    }
}

/// Resolves `CONN:n` references through the connector table. Plain pads are
/// returned unchanged.
pub fn resolve_pad(pad: &str, connectors: &[Connector]) -> Result<String, OrangeCartError> {
    let Some((conn_name, position)) = pad.split_once(':') else {
        return Ok(pad.to_string());
    };

    let connector = connectors
        .iter()
        .find(|c| c.name == conn_name)
        .ok_or_else(|| OrangeCartError::UnknownConnector(conn_name.to_string()))?;

    let bad_ref = || OrangeCartError::BadConnectorPin {
        connector: conn_name.to_string(),
        pin: position.to_string(),
    };

    let position: usize = position.parse().map_err(|_| bad_ref())?;
    match connector.pads.get(position) {
        Some(pad) if pad != PAD_PLACEHOLDER => Ok(pad.clone()),
        _ => Err(bad_ref()),
    }
}
