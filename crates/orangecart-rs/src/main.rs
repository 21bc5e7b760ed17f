use clap::{Args, Parser, ValueEnum};
use env_logger::Env;
use log::*;
use orangecart_core::{
    BuildConfig, Device, OrangeCartError, Revision, SdCardMode, Toolchain,
};

use std::{io::Write, path::PathBuf, str::FromStr};

mod build;
mod load;
mod reporter;

#[derive(Parser, Debug, Default)]
#[clap(version, about = "LiteX SoC on OrangeCart", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Set the logging verbosity
    #[clap(short, long, value_enum, global = true, default_value_t = LogLevel::Info)]
    verbose: LogLevel,

    /// Build bitstream
    #[clap(long)]
    build: bool,

    /// Load bitstream
    #[clap(long)]
    load: bool,

    /// List connected DFU devices
    #[clap(long)]
    list_devices: bool,

    /// TOML build configuration, explicit flags take precedence
    #[clap(long)]
    config: Option<PathBuf>,

    /// Board revision (1.0 or 1.2), detected from the board when loading
    #[clap(long, value_parser = parse_with::<Revision>)]
    revision: Option<Revision>,

    /// ECP5 device (default=25F)
    #[clap(long, value_parser = parse_with::<Device>)]
    device: Option<Device>,

    /// Gateware toolchain to use, trellis (default) or diamond
    #[clap(long, value_parser = parse_with::<Toolchain>)]
    toolchain: Option<Toolchain>,

    /// System clock frequency (default=48MHz)
    #[clap(long, value_parser = sys_clk_freq_parser)]
    sys_clk_freq: Option<u32>,

    /// HyperRAM device (default=S70KS1281)
    #[clap(long)]
    hyperram_device: Option<String>,

    /// SDCard interface: spi (default), native or none
    #[clap(long, value_parser = parse_with::<SdCardMode>)]
    sdcard: Option<SdCardMode>,

    /// Enable GPIO on the Pmod header
    #[clap(long)]
    with_pmod_gpio: bool,

    /// Integrated main RAM size in bytes, required until HyperRAM is supported
    #[clap(long, value_parser = int_parser)]
    integrated_main_ram_size: Option<u32>,

    /// CPU type
    #[clap(long)]
    cpu_type: Option<String>,

    /// UART: serial (default), usb_acm, crossover or stub
    #[clap(long)]
    uart_name: Option<String>,

    /// Base output directory
    #[clap(long)]
    output_dir: Option<PathBuf>,

    /// Base name of the generated files
    #[clap(long)]
    build_name: Option<String>,

    #[clap(flatten)]
    trellis: TrellisOpts,

    /// Connect to the SoC console after load
    #[cfg(feature = "serial")]
    #[clap(short, long)]
    serial: bool,
}

#[derive(Args, Debug, Default)]
struct TrellisOpts {
    /// Use Yosys's nowidelut mode
    #[clap(long)]
    yosys_nowidelut: bool,

    /// Use strict timing mode in nextpnr (fail on timing violations)
    #[clap(long)]
    nextpnr_timingstrict: bool,

    /// Seed for nextpnr
    #[clap(long)]
    nextpnr_seed: Option<u32>,

    /// Boot address for ecppack
    #[clap(long, value_parser = int_parser)]
    ecppack_bootaddr: Option<u32>,

    /// SPI mode for ecppack (fast-read, dual-spi, qspi)
    #[clap(long)]
    ecppack_spimode: Option<String>,

    /// Configuration clock frequency for ecppack, in MHz
    #[clap(long)]
    ecppack_freq: Option<String>,

    /// Compress the bitstream
    #[clap(long)]
    ecppack_compress: bool,
}

fn parse_with<T: FromStr<Err = OrangeCartError>>(s: &str) -> Result<T, String> {
    s.parse().map_err(|err: OrangeCartError| err.to_string())
}

/// Accepts float notation such as `48e6`
fn sys_clk_freq_parser(s: &str) -> Result<u32, String> {
    let freq: f64 = s
        .parse()
        .map_err(|_| OrangeCartError::InvalidSysClkFreq(s.to_string()).to_string())?;
    if !freq.is_finite() || freq < 1.0 || freq > u32::MAX as f64 {
        return Err(OrangeCartError::InvalidSysClkFreq(s.to_string()).to_string());
    }
    Ok(freq as u32)
}

/// Decimal or `0x` prefixed hex
fn int_parser(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|err| format!("Invalid integer '{}': {}", s, err))
}

impl Cli {
    /// Layers explicit flags over the file configuration.
    fn apply(&self, config: &mut BuildConfig) {
        if let Some(revision) = self.revision {
            config.revision = Some(revision);
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(toolchain) = self.toolchain {
            config.toolchain = toolchain;
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        if let Some(build_name) = &self.build_name {
            config.build_name = build_name.clone();
        }

        let soc = &mut config.soc;
        if let Some(freq) = self.sys_clk_freq {
            soc.sys_clk_freq = freq;
        }
        if let Some(device) = &self.hyperram_device {
            soc.hyperram_device = device.clone();
        }
        if let Some(sdcard) = self.sdcard {
            soc.sdcard = sdcard;
        }
        if self.with_pmod_gpio {
            soc.with_pmod_gpio = true;
        }
        if let Some(size) = self.integrated_main_ram_size {
            soc.integrated_main_ram_size = size;
        }
        if let Some(cpu_type) = &self.cpu_type {
            soc.cpu_type = cpu_type.clone();
        }
        if let Some(uart_name) = &self.uart_name {
            soc.uart_name = uart_name.clone();
        }

        let trellis = &mut config.trellis;
        let opts = &self.trellis;
        trellis.yosys_nowidelut |= opts.yosys_nowidelut;
        trellis.nextpnr_timingstrict |= opts.nextpnr_timingstrict;
        trellis.ecppack_compress |= opts.ecppack_compress;
        if let Some(seed) = opts.nextpnr_seed {
            trellis.nextpnr_seed = seed;
        }
        if let Some(bootaddr) = opts.ecppack_bootaddr {
            trellis.ecppack_bootaddr = bootaddr;
        }
        if let Some(mode) = &opts.ecppack_spimode {
            trellis.ecppack_spimode = Some(mode.clone());
        }
        if let Some(freq) = &opts.ecppack_freq {
            trellis.ecppack_freq = Some(freq.clone());
        }
    }

    #[cfg(feature = "serial")]
    fn serial(&self) -> bool {
        self.serial
    }

    #[cfg(not(feature = "serial"))]
    fn serial(&self) -> bool {
        false
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default())
        .filter_level(cli.verbose.into())
        .target(env_logger::Target::Stdout)
        .format(|buf, record| {
            let level = record.level();
            if level == Level::Info {
                writeln!(buf, "{}", record.args())
            } else {
                writeln!(buf, "{}: {}", record.level(), record.args())
            }
        })
        .init();

    if cli.list_devices {
        return load::list();
    }

    let mut config = match &cli.config {
        Some(path) => BuildConfig::load(path)?,
        None => BuildConfig::default(),
    };
    cli.apply(&mut config);

    let revision = build::resolve_revision(&config, cli.load);
    let (board, products) = build::build(&config, revision, cli.build)?;

    if cli.load {
        load::load(&board, &products.bitstream, cli.serial())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sys_clk_freq_accepts_float_notation() {
        assert_eq!(sys_clk_freq_parser("48e6"), Ok(48_000_000));
        assert_eq!(sys_clk_freq_parser("60000000"), Ok(60_000_000));
        assert!(sys_clk_freq_parser("0").is_err());
        assert!(sys_clk_freq_parser("fast").is_err());
        assert!(sys_clk_freq_parser("1e12").is_err());
    }

    #[test]
    fn int_parser_accepts_hex() {
        assert_eq!(int_parser("0x4000"), Ok(0x4000));
        assert_eq!(int_parser("16384"), Ok(16384));
        assert!(int_parser("0xzz").is_err());
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "orangecart",
            "--revision",
            "1.2",
            "--sys-clk-freq",
            "60e6",
            "--integrated-main-ram-size",
            "0x4000",
            "--sdcard",
            "native",
            "--nextpnr-seed",
            "7",
            "--ecppack-compress",
        ]);
        let mut config = BuildConfig::from_toml(
            r#"
            revision = "1.0"
            device = "85F"

            [soc]
            sys_clk_freq = 50_000_000
            cpu_type = "picorv32"
            "#,
        )
        .unwrap();
        cli.apply(&mut config);

        assert_eq!(config.revision, Some(Revision::V1_2));
        assert_eq!(config.device, Device::Size85F);
        assert_eq!(config.soc.sys_clk_freq, 60_000_000);
        assert_eq!(config.soc.cpu_type, "picorv32");
        assert_eq!(config.soc.integrated_main_ram_size, 0x4000);
        assert_eq!(config.soc.sdcard, SdCardMode::Native);
        assert_eq!(config.trellis.nextpnr_seed, 7);
        assert!(config.trellis.ecppack_compress);
        assert!(config.trellis.yosys_abc9);
    }

    #[test]
    fn unknown_revision_is_rejected_by_parser() {
        let result = Cli::try_parse_from(["orangecart", "--build", "--revision", "1.1"]);
        assert!(result.is_err());
    }
}
