use std::fmt::Write;

use log::{debug, trace};
use serde::Serialize;

use crate::{
    OrangeCartError,
    builder::Toolchain,
    io::{Connector, Constraint, IoEntry, IoStandard, PinTable, resolve_pad, subsignals_of},
};

/// A single top-level port of the design, bound to one or more pads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Port {
    pub name: String,
    pub pads: Vec<String>,
    pub standard: Option<IoStandard>,
    pub misc: Vec<String>,
}

impl Port {
    /// Per-bit port names paired with their pads
    pub fn bits(&self) -> Vec<(String, &str)> {
        if self.pads.len() == 1 {
            return vec![(self.name.clone(), self.pads[0].as_str())];
        }
        self.pads
            .iter()
            .enumerate()
            .map(|(i, pad)| (format!("{}[{}]", self.name, i), pad.as_str()))
            .collect()
    }
}

/// A requested table entry, flattened into ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    pub name: String,
    pub index: u32,
    /// Port name prefix, `name` or `name<index>`
    pub base: String,
    pub ports: Vec<Port>,
}

impl Resource {
    pub fn id(&self) -> String {
        format!("{}:{}", self.name, self.index)
    }

    /// Port of a (possibly nested, `a_b`) subsignal
    pub fn port(&self, subsignal: &str) -> Option<&Port> {
        let name = format!("{}_{}", self.base, subsignal);
        self.ports.iter().find(|p| p.name == name)
    }

    pub fn pads(&self) -> impl Iterator<Item = &str> {
        self.ports.iter().flat_map(|p| p.pads.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodConstraint {
    pub port: String,
    /// Period in ns
    pub period: f64,
}

/// Hardware-build handle: the board's tables plus everything requested from
/// them so far.
#[derive(Debug, Clone)]
pub struct Platform {
    device: String,
    toolchain: Toolchain,
    io: PinTable,
    connectors: Vec<Connector>,
    default_clk_name: &'static str,
    default_clk_period: f64,
    requested: Vec<Resource>,
    period_constraints: Vec<PeriodConstraint>,
}

impl Platform {
    pub fn new(
        device: String,
        toolchain: Toolchain,
        io: PinTable,
        connectors: Vec<Connector>,
        default_clk_name: &'static str,
        default_clk_period: f64,
    ) -> Self {
        Self {
            device,
            toolchain,
            io,
            connectors,
            default_clk_name,
            default_clk_period,
            requested: Vec::new(),
            period_constraints: Vec::new(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn toolchain(&self) -> Toolchain {
        self.toolchain
    }

    pub fn requested(&self) -> &[Resource] {
        &self.requested
    }

    pub fn period_constraints(&self) -> &[PeriodConstraint] {
        &self.period_constraints
    }

    pub fn add_extension(&mut self, entries: Vec<IoEntry>) -> Result<(), OrangeCartError> {
        self.io.extend(entries)
    }

    pub fn request(&mut self, name: &str, index: u32) -> Result<Resource, OrangeCartError> {
        if self.find_requested(name, index).is_some() {
            return Err(OrangeCartError::ResourceAlreadyRequested {
                name: name.to_string(),
                index,
            });
        }

        let entry = self
            .io
            .get(name, index)
            .ok_or_else(|| OrangeCartError::ResourceNotFound {
                name: name.to_string(),
                index,
            })?;

        // Single-instance resources keep their bare name
        let indexed = self.io.entries().iter().filter(|e| e.name == name).count() > 1;
        let base = if indexed {
            format!("{}{}", name, index)
        } else {
            name.to_string()
        };

        let resource = Resource {
            name: entry.name.clone(),
            index: entry.index,
            ports: flatten(&base, entry, &self.connectors)?,
            base,
        };

        for pad in resource.pads() {
            if let Some(holder) = self
                .requested
                .iter()
                .find(|r| r.pads().any(|held| held == pad))
            {
                return Err(OrangeCartError::PadConflict {
                    pad: pad.to_string(),
                    requested: resource.id(),
                    held_by: holder.id(),
                });
            }
        }

        debug!("Requested {}", resource.id());
        self.requested.push(resource.clone());
        Ok(resource)
    }

    /// Returns an earlier request. With `loose`, an unrequested resource is
    /// `Ok(None)` instead of an error.
    pub fn lookup_request(
        &self,
        name: &str,
        index: u32,
        loose: bool,
    ) -> Result<Option<&Resource>, OrangeCartError> {
        match self.find_requested(name, index) {
            Some(resource) => Ok(Some(resource)),
            None if loose => Ok(None),
            None => Err(OrangeCartError::ResourceNotFound {
                name: name.to_string(),
                index,
            }),
        }
    }

    fn find_requested(&self, name: &str, index: u32) -> Option<&Resource> {
        self.requested
            .iter()
            .find(|r| r.name == name && r.index == index)
    }

    pub fn add_period_constraint(&mut self, port: &str, period: f64) {
        if self.period_constraints.iter().any(|c| c.port == port) {
            trace!("{} already has a period constraint", port);
            return;
        }
        self.period_constraints.push(PeriodConstraint {
            port: port.to_string(),
            period,
        });
    }

    /// Constrains the default clock if the design uses it.
    pub fn finalize(&mut self) -> Result<(), OrangeCartError> {
        let port = self
            .lookup_request(self.default_clk_name, 0, true)?
            .and_then(|r| r.ports.first())
            .map(|p| p.name.clone());

        if let Some(port) = port {
            self.add_period_constraint(&port, self.default_clk_period);
        }
        Ok(())
    }

    /// Renders the Lattice Preference File for everything requested so far.
    pub fn lpf(&self) -> String {
        let mut lpf = String::new();
        lpf.push_str("BLOCK RESETPATHS;\n");
        lpf.push_str("BLOCK ASYNCPATHS;\n");

        for port in self.requested.iter().flat_map(|r| &r.ports) {
            let mut attributes = Vec::new();
            if let Some(std) = port.standard {
                attributes.push(format!("IO_TYPE={}", std));
            }
            attributes.extend(port.misc.iter().cloned());

            for (bit, pad) in port.bits() {
                // Writing to a String cannot fail
                let _ = writeln!(lpf, "LOCATE COMP \"{}\" SITE \"{}\";", bit, pad);
                if !attributes.is_empty() {
                    let _ = writeln!(lpf, "IOBUF PORT \"{}\" {};", bit, attributes.join(" "));
                }
            }
        }

        for constraint in &self.period_constraints {
            let _ = writeln!(
                lpf,
                "FREQUENCY PORT \"{}\" {:.3} MHz;",
                constraint.port,
                1e3 / constraint.period
            );
        }

        lpf
    }
}

/// Inherited attributes while walking down subsignals
#[derive(Clone, Default)]
struct Attributes {
    standard: Option<IoStandard>,
    misc: Vec<String>,
}

impl Attributes {
    fn merged(&self, constraints: &[Constraint]) -> Self {
        let mut attrs = self.clone();
        for constraint in constraints {
            match constraint {
                Constraint::Standard(std) => attrs.standard = Some(*std),
                Constraint::Misc(value) => {
                    let key = misc_key(value);
                    attrs.misc.retain(|m| misc_key(m) != key);
                    attrs.misc.push(value.clone());
                }
                _ => (),
            }
        }
        attrs
    }
}

fn misc_key(value: &str) -> &str {
    value.split_once('=').map_or(value, |(key, _)| key)
}

fn flatten(
    base: &str,
    entry: &IoEntry,
    connectors: &[Connector],
) -> Result<Vec<Port>, OrangeCartError> {
    let mut ports = Vec::new();
    flatten_into(
        base,
        &entry.constraints,
        &Attributes::default(),
        connectors,
        &mut ports,
    )?;
    Ok(ports)
}

fn flatten_into(
    name: &str,
    constraints: &[Constraint],
    inherited: &Attributes,
    connectors: &[Connector],
    ports: &mut Vec<Port>,
) -> Result<(), OrangeCartError> {
    let attrs = inherited.merged(constraints);

    for constraint in constraints {
        if let Constraint::Pins(pins) = constraint {
            let pads = pins
                .iter()
                .map(|pad| resolve_pad(pad, connectors))
                .collect::<Result<Vec<_>, _>>()?;
            ports.push(Port {
                name: name.to_string(),
                pads,
                standard: attrs.standard,
                misc: attrs.misc.clone(),
            });
        }
    }

    for sub in subsignals_of(constraints) {
        let sub_name = format!("{}_{}", name, sub.name);
        flatten_into(&sub_name, &sub.constraints, &attrs, connectors, ports)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        boards::{BoardInfo, Device, OrangeCart, Revision},
        io::IoStandard::*,
    };

    fn platform(revision: Revision) -> Platform {
        OrangeCart::new(revision, Device::default(), Toolchain::Trellis)
            .unwrap()
            .platform()
    }

    #[test]
    fn request_flattens_subsignals() {
        let mut platform = platform(Revision::V1_0);
        let sd = platform.request("spisdcard", 0).unwrap();

        let names: Vec<_> = sd.ports.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            ["spisdcard_clk", "spisdcard_mosi", "spisdcard_cs_n", "spisdcard_miso"]
        );

        let clk = sd.port("clk").unwrap();
        assert_eq!(clk.standard, Some(LVCMOS33));
        assert_eq!(clk.misc, ["SLEWRATE=FAST"]);

        let mosi = sd.port("mosi").unwrap();
        assert_eq!(mosi.misc, ["SLEWRATE=FAST", "PULLMODE=UP"]);
    }

    #[test]
    fn port_lookup_needs_the_full_subsignal() {
        let mut platform = platform(Revision::V1_0);
        let usb = platform.request("usb", 0).unwrap();
        assert!(usb.port("p").is_none());
        assert_eq!(usb.port("d_p").unwrap().pads, ["R5"]);

        let flash = platform.request("spiflash4x", 0).unwrap();
        assert!(flash.port("n").is_none());
        assert_eq!(flash.port("cs_n").unwrap().name, "spiflash4x_cs_n");
    }

    #[test]
    fn subsignal_standard_overrides_entry() {
        let mut platform = platform(Revision::V1_0);
        let ram = platform.request("hyperram", 0).unwrap();
        assert_eq!(ram.port("ck_p").unwrap().standard, Some(SSTL18D_II));
        assert_eq!(ram.port("dq").unwrap().pads.len(), 8);
        assert_eq!(ram.port("dq").unwrap().misc, ["SLEWRATE=FAST"]);
    }

    #[test]
    fn double_request_fails() {
        let mut platform = platform(Revision::V1_0);
        platform.request("serial", 0).unwrap();
        assert!(matches!(
            platform.request("serial", 0),
            Err(OrangeCartError::ResourceAlreadyRequested { .. })
        ));
        assert!(matches!(
            platform.request("serial", 1),
            Err(OrangeCartError::ResourceNotFound { index: 1, .. })
        ));
    }

    #[test]
    fn shared_pads_conflict() {
        let mut platform = platform(Revision::V1_0);
        platform.request("spisdcard", 0).unwrap();
        assert!(matches!(
            platform.request("sdcard", 0),
            Err(OrangeCartError::PadConflict { ref pad, ref held_by, .. })
                if pad == "A10" && held_by == "spisdcard:0"
        ));

        // Failed requests leave no trace
        assert!(platform.lookup_request("sdcard", 0, true).unwrap().is_none());
    }

    #[test]
    fn lookup_request_loose_and_strict() {
        let mut platform = platform(Revision::V1_0);
        assert!(platform.lookup_request("clk48", 0, true).unwrap().is_none());
        assert!(platform.lookup_request("clk48", 0, false).is_err());
        platform.request("clk48", 0).unwrap();
        assert!(platform.lookup_request("clk48", 0, false).unwrap().is_some());
    }

    #[test]
    fn extensions_resolve_through_connectors() {
        let mut platform = platform(Revision::V1_0);
        platform
            .add_extension(vec![IoEntry::new(
                "gpio",
                0,
                vec![Constraint::pins("GPIO:1 GPIO:2 GPIO:3 GPIO:4"), LVCMOS33.into()],
            )])
            .unwrap();
        let gpio = platform.request("gpio", 0).unwrap();
        assert_eq!(gpio.ports[0].pads, ["B9", "B10", "C10", "A9"]);

        assert!(matches!(
            platform.add_extension(vec![IoEntry::new("gpio", 0, vec![])]),
            Err(OrangeCartError::DuplicateResource { .. })
        ));
    }

    #[test]
    fn lpf_contains_requested_ports_and_clock() {
        let board = OrangeCart::new(Revision::V1_0, Device::default(), Toolchain::Trellis).unwrap();
        let mut platform = board.platform();
        platform.request("clk48", 0).unwrap();
        platform.request("user_led", 1).unwrap();
        platform.request("usr_btn", 0).unwrap();
        platform.finalize().unwrap();

        let lpf = platform.lpf();
        let expected = "\
BLOCK RESETPATHS;
BLOCK ASYNCPATHS;
LOCATE COMP \"clk48\" SITE \"C8\";
IOBUF PORT \"clk48\" IO_TYPE=LVCMOS33;
LOCATE COMP \"user_led1\" SITE \"R6\";
IOBUF PORT \"user_led1\" IO_TYPE=LVCMOS33;
LOCATE COMP \"usr_btn\" SITE \"F12\";
IOBUF PORT \"usr_btn\" IO_TYPE=LVCMOS18 PULLMODE=UP;
FREQUENCY PORT \"clk48\" 48.000 MHz;
";
        assert_eq!(lpf, expected);
        assert!((board.default_clk_period() - 20.833).abs() < 1e-3);
    }

    #[test]
    fn lpf_indexes_multi_pad_ports() {
        let mut platform = platform(Revision::V1_2);
        platform.request("spiflash4x", 0).unwrap();
        let lpf = platform.lpf();
        assert!(lpf.contains("LOCATE COMP \"spiflash4x_dq[0]\" SITE \"T8\";"));
        assert!(lpf.contains("LOCATE COMP \"spiflash4x_dq[3]\" SITE \"N7\";"));
        assert!(!lpf.contains("FREQUENCY"));
    }
}
