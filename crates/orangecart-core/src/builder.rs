use std::{
    fmt, fs, iter,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{OrangeCartError, soc::Soc, tool::ToolInvocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Toolchain {
    /// yosys + nextpnr-ecp5 + ecppack
    #[default]
    Trellis,
    /// Lattice Diamond
    Diamond,
}

impl Toolchain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Toolchain::Trellis => "trellis",
            Toolchain::Diamond => "diamond",
        }
    }
}

impl fmt::Display for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Toolchain {
    type Err = OrangeCartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trellis" => Ok(Toolchain::Trellis),
            "diamond" => Ok(Toolchain::Diamond),
            _ => Err(OrangeCartError::UnknownToolchain(s.to_string())),
        }
    }
}

/// Options for the open-source ECP5 flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrellisArgs {
    pub yosys_nowidelut: bool,
    pub yosys_abc9: bool,
    pub nextpnr_timingstrict: bool,
    pub nextpnr_seed: u32,
    pub ecppack_bootaddr: u32,
    pub ecppack_spimode: Option<String>,
    pub ecppack_freq: Option<String>,
    pub ecppack_compress: bool,
}

impl Default for TrellisArgs {
    fn default() -> Self {
        Self {
            yosys_nowidelut: false,
            // Always on for this board
            yosys_abc9: true,
            nextpnr_timingstrict: false,
            nextpnr_seed: 1,
            ecppack_bootaddr: 0,
            ecppack_spimode: None,
            ecppack_freq: None,
            ecppack_compress: false,
        }
    }
}

/// Pieces of an ECP5 part name such as `LFE5U-25F-6BG256C`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ecp5Part {
    /// nextpnr size flag, e.g. `--25k` or `--um5g-45k`
    pub size_flag: String,
    pub speed: char,
    pub package: &'static str,
}

pub fn parse_device(device: &str) -> Result<Ecp5Part, OrangeCartError> {
    let invalid = || OrangeCartError::InvalidDevice(device.to_string());

    let lower = device.to_ascii_lowercase();
    let mut parts = lower.split('-');
    let (Some(family), Some(size), Some(speed_package), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let prefix = match family {
        "lfe5u" => "",
        "lfe5um" => "um-",
        "lfe5um5g" => "um5g-",
        _ => return Err(invalid()),
    };

    let size = size.strip_suffix('f').ok_or_else(invalid)?;
    if size.is_empty() || !size.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let mut chars = speed_package.chars();
    let speed = chars.next().filter(|c| matches!(c, '6' | '7' | '8')).ok_or_else(invalid)?;
    let package = chars.as_str();
    let package = if package.contains("256") {
        "CABGA256"
    } else if package.contains("285") {
        "CSFBGA285"
    } else if package.contains("381") {
        "CABGA381"
    } else if package.contains("554") {
        "CABGA554"
    } else if package.contains("756") {
        "CABGA756"
    } else {
        return Err(invalid());
    };

    Ok(Ecp5Part {
        size_flag: format!("--{}{}k", prefix, size),
        speed,
        package,
    })
}

/// A script the toolchain reads, written next to the other build files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildScript {
    pub file_name: String,
    pub contents: String,
}

impl Toolchain {
    pub fn script(
        &self,
        build_name: &str,
        device: &str,
        sources: &[PathBuf],
        args: &TrellisArgs,
    ) -> BuildScript {
        match self {
            Toolchain::Trellis => {
                let mut ys = String::new();
                for source in sources {
                    ys.push_str(&format!("read_verilog -sv \"{}\"\n", source.display()));
                }
                let mut synth = String::from("synth_ecp5");
                if args.yosys_nowidelut {
                    synth.push_str(" -nowidelut");
                }
                if args.yosys_abc9 {
                    synth.push_str(" -abc9");
                }
                ys.push_str(&format!(
                    "{} -json {}.json -top {}\n",
                    synth, build_name, build_name
                ));
                BuildScript {
                    file_name: format!("{}.ys", build_name),
                    contents: ys,
                }
            }
            Toolchain::Diamond => {
                let mut tcl = format!(
                    "prj_project new -name \"{name}\" -impl \"impl\" -dev {device} -synthesis \"synplify\"\n",
                    name = build_name,
                    device = device
                );
                for source in sources {
                    tcl.push_str(&format!("prj_src add \"{}\"\n", source.display()));
                }
                tcl.push_str(&format!("prj_src add \"{}.lpf\"\n", build_name));
                tcl.push_str(&format!("prj_impl option top \"{}\"\n", build_name));
                tcl.push_str("prj_project save\n");
                for step in ["Synthesis", "Translate", "Map", "PAR"] {
                    tcl.push_str(&format!("prj_run {} -impl impl -forceOne\n", step));
                }
                tcl.push_str("prj_run Export -impl impl -task Bitgen\n");
                tcl.push_str("prj_project close\n");
                BuildScript {
                    file_name: format!("{}.tcl", build_name),
                    contents: tcl,
                }
            }
        }
    }

    /// Tool runs producing `<build_name>.bit` from the files in `gateware_dir`.
    pub fn commands(
        &self,
        build_name: &str,
        device: &str,
        gateware_dir: &Path,
        args: &TrellisArgs,
    ) -> Result<Vec<ToolInvocation>, OrangeCartError> {
        match self {
            Toolchain::Trellis => {
                let part = parse_device(device)?;

                let yosys = ToolInvocation::new("yosys")
                    .arg("-l")
                    .arg(format!("{}.rpt", build_name))
                    .arg(format!("{}.ys", build_name))
                    .current_dir(gateware_dir);

                let mut nextpnr = ToolInvocation::new("nextpnr-ecp5")
                    .arg("--json")
                    .arg(format!("{}.json", build_name))
                    .arg("--lpf")
                    .arg(format!("{}.lpf", build_name))
                    .arg("--textcfg")
                    .arg(format!("{}.config", build_name))
                    .arg(part.size_flag)
                    .arg("--package")
                    .arg(part.package)
                    .arg("--speed")
                    .arg(part.speed.to_string())
                    .arg("--seed")
                    .arg(args.nextpnr_seed.to_string());
                if !args.nextpnr_timingstrict {
                    nextpnr = nextpnr.arg("--timing-allow-fail");
                }
                let nextpnr = nextpnr.current_dir(gateware_dir);

                let mut ecppack = ToolInvocation::new("ecppack")
                    .arg("--bootaddr")
                    .arg(args.ecppack_bootaddr.to_string());
                if let Some(mode) = &args.ecppack_spimode {
                    ecppack = ecppack.arg("--spimode").arg(mode.as_str());
                }
                if let Some(freq) = &args.ecppack_freq {
                    ecppack = ecppack.arg("--freq").arg(freq.as_str());
                }
                if args.ecppack_compress {
                    ecppack = ecppack.arg("--compress");
                }
                let ecppack = ecppack
                    .arg(format!("{}.config", build_name))
                    .arg("--svf")
                    .arg(format!("{}.svf", build_name))
                    .arg("--bit")
                    .arg(format!("{}.bit", build_name))
                    .current_dir(gateware_dir);

                Ok(vec![yosys, nextpnr, ecppack])
            }
            Toolchain::Diamond => Ok(vec![
                ToolInvocation::new("diamondc")
                    .arg(format!("{}.tcl", build_name))
                    .current_dir(gateware_dir),
            ]),
        }
    }
}

/// Files written, and tool runs planned, by one [`Builder::build`].
#[derive(Debug, Clone)]
pub struct BuildProducts {
    pub lpf: PathBuf,
    pub manifest: PathBuf,
    pub script: PathBuf,
    pub bitstream: PathBuf,
    pub commands: Vec<ToolInvocation>,
}

/// Writes the declarative build inputs for a composed SoC and optionally
/// drives the toolchain over them.
#[derive(Debug, Clone)]
pub struct Builder {
    output_dir: PathBuf,
    build_name: String,
    sources: Vec<PathBuf>,
}

impl Builder {
    pub fn new(output_dir: impl Into<PathBuf>, build_name: &str) -> Self {
        Self {
            output_dir: output_dir.into(),
            build_name: build_name.to_string(),
            sources: Vec::new(),
        }
    }

    /// Extra HDL sources, on top of `<build_name>.v` generated from the manifest
    pub fn with_sources(mut self, sources: Vec<PathBuf>) -> Self {
        self.sources = sources;
        self
    }

    pub fn build_name(&self) -> &str {
        &self.build_name
    }

    pub fn gateware_dir(&self) -> PathBuf {
        self.output_dir.join("gateware")
    }

    pub fn bitstream_path(&self) -> PathBuf {
        self.gateware_dir().join(format!("{}.bit", self.build_name))
    }

    fn top_source(&self) -> PathBuf {
        self.gateware_dir().join(format!("{}.v", self.build_name))
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), OrangeCartError> {
        debug!("Writing {}", path.display());
        fs::write(path, contents).map_err(|source| OrangeCartError::FailedToWrite {
            path: path.to_owned(),
            source,
        })
    }

    /// HDL sources as handed to the toolchain. The tools run inside the
    /// gateware directory, so every path is made absolute.
    pub fn script_sources(&self) -> Result<Vec<PathBuf>, OrangeCartError> {
        iter::once(self.top_source())
            .chain(self.sources.iter().cloned())
            .map(|source| match std::path::absolute(&source) {
                Ok(absolute) => Ok(absolute),
                Err(err) => Err(OrangeCartError::FailedToRead {
                    path: source,
                    source: err,
                }),
            })
            .collect()
    }

    pub fn build(
        &self,
        soc: &mut Soc,
        args: &TrellisArgs,
        run: bool,
    ) -> Result<BuildProducts, OrangeCartError> {
        soc.platform_mut().finalize()?;

        let gateware_dir = self.gateware_dir();
        fs::create_dir_all(&gateware_dir).map_err(|source| OrangeCartError::FailedToWrite {
            path: gateware_dir.clone(),
            source,
        })?;

        let lpf = gateware_dir.join(format!("{}.lpf", self.build_name));
        self.write(&lpf, &soc.platform().lpf())?;

        let manifest = gateware_dir.join(format!("{}.manifest.json", self.build_name));
        let json = serde_json::to_string_pretty(&soc.manifest(&self.build_name))
            .map_err(OrangeCartError::FailedToSerialize)?;
        self.write(&manifest, &json)?;

        let sources = self.script_sources()?;

        let toolchain = soc.platform().toolchain();
        let device = soc.platform().device().to_string();
        let script = toolchain.script(&self.build_name, &device, &sources, args);
        let script_path = gateware_dir.join(&script.file_name);
        self.write(&script_path, &script.contents)?;

        let commands = toolchain.commands(&self.build_name, &device, &gateware_dir, args)?;

        if run {
            for source in &sources {
                if !source.is_file() {
                    return Err(OrangeCartError::MissingSource(source.clone()));
                }
            }

            info!("Building {} with {}", self.build_name, toolchain);
            for command in &commands {
                command.run()?;
            }

            if toolchain == Toolchain::Diamond {
                let impl_bit = gateware_dir
                    .join("impl")
                    .join(format!("{}_impl.bit", self.build_name));
                fs::copy(&impl_bit, self.bitstream_path()).map_err(|source| {
                    OrangeCartError::FailedToRead {
                        path: impl_bit.clone(),
                        source,
                    }
                })?;
            }
        }

        Ok(BuildProducts {
            lpf,
            manifest,
            script: script_path,
            bitstream: self.bitstream_path(),
            commands,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        boards::{Device, OrangeCart, Revision},
        soc::SocSettings,
    };

    #[test]
    fn parses_board_device() {
        let part = parse_device("LFE5U-25F-6BG256C").unwrap();
        assert_eq!(
            part,
            Ecp5Part {
                size_flag: "--25k".to_string(),
                speed: '6',
                package: "CABGA256",
            }
        );

        let part = parse_device("LFE5UM5G-45F-8BG381C").unwrap();
        assert_eq!(part.size_flag, "--um5g-45k");
        assert_eq!(part.package, "CABGA381");
    }

    #[test]
    fn malformed_device_is_rejected() {
        for bad in [
            "LFE5U-25F",
            "LFE5U-25F-9BG256C",
            "LFE5U-25X-6BG256C",
            "LCMXO2-25F-6BG256C",
            "LFE5U-25F-6BG999C",
            "LFE5U-25F-6BG256C-X",
        ] {
            assert!(
                matches!(parse_device(bad), Err(OrangeCartError::InvalidDevice(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn toolchain_names() {
        assert_eq!("Trellis".parse::<Toolchain>().unwrap(), Toolchain::Trellis);
        assert_eq!("diamond".parse::<Toolchain>().unwrap(), Toolchain::Diamond);
        assert!(matches!(
            "vivado".parse::<Toolchain>(),
            Err(OrangeCartError::UnknownToolchain(_))
        ));
    }

    #[test]
    fn trellis_commands() {
        let args = TrellisArgs {
            ecppack_compress: true,
            ecppack_spimode: Some("qspi".to_string()),
            ..TrellisArgs::default()
        };
        let dir = Path::new("build/gateware");
        let commands = Toolchain::Trellis
            .commands("orangecart", "LFE5U-25F-6BG256C", dir, &args)
            .unwrap();

        let programs: Vec<_> = commands.iter().map(|c| c.program.as_str()).collect();
        assert_eq!(programs, ["yosys", "nextpnr-ecp5", "ecppack"]);
        assert!(commands.iter().all(|c| c.cwd.as_deref() == Some(dir)));

        assert_eq!(
            commands[1].args,
            [
                "--json",
                "orangecart.json",
                "--lpf",
                "orangecart.lpf",
                "--textcfg",
                "orangecart.config",
                "--25k",
                "--package",
                "CABGA256",
                "--speed",
                "6",
                "--seed",
                "1",
                "--timing-allow-fail",
            ]
        );
        assert_eq!(
            commands[2].args,
            [
                "--bootaddr",
                "0",
                "--spimode",
                "qspi",
                "--compress",
                "orangecart.config",
                "--svf",
                "orangecart.svf",
                "--bit",
                "orangecart.bit",
            ]
        );
    }

    #[test]
    fn trellis_script_uses_abc9() {
        let script = Toolchain::Trellis.script(
            "orangecart",
            "LFE5U-25F-6BG256C",
            &[PathBuf::from("orangecart.v")],
            &TrellisArgs::default(),
        );
        assert_eq!(script.file_name, "orangecart.ys");
        assert_eq!(
            script.contents,
            "read_verilog -sv \"orangecart.v\"\nsynth_ecp5 -abc9 -json orangecart.json -top orangecart\n"
        );
    }

    #[test]
    fn diamond_script_and_command() {
        let script = Toolchain::Diamond.script(
            "orangecart",
            "LFE5U-25F-6BG256C",
            &[PathBuf::from("orangecart.v")],
            &TrellisArgs::default(),
        );
        assert_eq!(script.file_name, "orangecart.tcl");
        assert!(script.contents.contains("-dev LFE5U-25F-6BG256C"));
        assert!(script.contents.contains("prj_src add \"orangecart.lpf\""));

        let commands = Toolchain::Diamond
            .commands("orangecart", "LFE5U-25F-6BG256C", Path::new("gw"), &TrellisArgs::default())
            .unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].to_string(), "diamondc orangecart.tcl");
    }

    #[test]
    fn build_writes_inputs_without_running() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let board = OrangeCart::new(Revision::V1_2, Device::default(), Toolchain::Trellis).unwrap();
        let settings = SocSettings {
            integrated_main_ram_size: 0x4000,
            ..SocSettings::default()
        };
        let mut soc = Soc::new(&board, settings).unwrap();

        let builder = Builder::new(temp_dir.path(), "orangecart");
        let products = builder.build(&mut soc, &TrellisArgs::default(), false).unwrap();

        let lpf = fs::read_to_string(&products.lpf).unwrap();
        assert!(lpf.contains("FREQUENCY PORT \"clk48\" 48.000 MHz;"));
        assert!(lpf.contains("IO_TYPE=LVCMOS33"));

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&products.manifest).unwrap()).unwrap();
        assert_eq!(manifest["revision"], "1.2");
        assert_eq!(manifest["device"], "LFE5U-25F-6BG256C");

        assert!(products.script.ends_with("orangecart.ys"));
        assert!(products.script.is_file());
        assert_eq!(products.commands.len(), 3);
        assert_eq!(
            products.bitstream,
            temp_dir.path().join("gateware").join("orangecart.bit")
        );
    }

    #[test]
    fn sources_resolve_from_the_tool_directory() {
        let builder = Builder::new("build/orangecart", "orangecart")
            .with_sources(vec![PathBuf::from("extra/hyperram.v")]);
        let sources = builder.script_sources().unwrap();

        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            sources,
            [
                cwd.join("build/orangecart/gateware/orangecart.v"),
                cwd.join("extra/hyperram.v"),
            ]
        );

        let commands = Toolchain::Trellis
            .commands(
                "orangecart",
                "LFE5U-25F-6BG256C",
                &builder.gateware_dir(),
                &TrellisArgs::default(),
            )
            .unwrap();
        let tool_cwd = cwd.join(commands[0].cwd.as_ref().unwrap());
        for source in &sources {
            assert_eq!(&tool_cwd.join(source), source);
        }
    }

    #[test]
    fn script_names_absolute_top_source() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let board = OrangeCart::new(Revision::V1_0, Device::default(), Toolchain::Trellis).unwrap();
        let settings = SocSettings {
            integrated_main_ram_size: 0x4000,
            ..SocSettings::default()
        };
        let mut soc = Soc::new(&board, settings).unwrap();

        let builder = Builder::new(temp_dir.path(), "orangecart");
        let products = builder.build(&mut soc, &TrellisArgs::default(), false).unwrap();

        let top = std::path::absolute(builder.gateware_dir().join("orangecart.v")).unwrap();
        let ys = fs::read_to_string(&products.script).unwrap();
        assert!(ys.starts_with(&format!("read_verilog -sv \"{}\"\n", top.display())));
    }

    #[test]
    fn unwritable_output_reports_path() {
        let not_a_dir = tempfile::NamedTempFile::new().unwrap();
        let board = OrangeCart::new(Revision::V1_0, Device::default(), Toolchain::Trellis).unwrap();
        let settings = SocSettings {
            integrated_main_ram_size: 0x4000,
            ..SocSettings::default()
        };
        let mut soc = Soc::new(&board, settings).unwrap();

        let builder = Builder::new(not_a_dir.path().join("out"), "orangecart");
        match builder.build(&mut soc, &TrellisArgs::default(), false) {
            Err(OrangeCartError::FailedToWrite { path, .. }) => {
                assert_eq!(path, builder.gateware_dir())
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn run_without_generated_top_fails_early() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let board = OrangeCart::new(Revision::V1_0, Device::default(), Toolchain::Trellis).unwrap();
        let settings = SocSettings {
            integrated_main_ram_size: 0x4000,
            ..SocSettings::default()
        };
        let mut soc = Soc::new(&board, settings).unwrap();

        let builder = Builder::new(temp_dir.path(), "orangecart");
        assert!(matches!(
            builder.build(&mut soc, &TrellisArgs::default(), true),
            Err(OrangeCartError::MissingSource(path)) if path.ends_with("orangecart.v")
        ));
    }
}
