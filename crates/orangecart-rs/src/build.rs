use log::{debug, info, warn};
use orangecart_core::{
    BoardIter, BuildConfig, Builder, OrangeCart, Revision, Soc, builder::BuildProducts,
    programmer::list_devices,
};

/// Picks the configured revision, or asks the connected board when loading.
pub fn resolve_revision(config: &BuildConfig, detect: bool) -> Revision {
    if let Some(revision) = config.revision {
        return revision;
    }

    if detect {
        match list_devices() {
            Ok(devices) => {
                if let Some(revision) = devices.iter().find_map(BoardIter::find_by_device) {
                    info!("Detected OrangeCart {}", revision);
                    return revision;
                }
                warn!("No OrangeCart in DFU mode found, assuming {}", config.revision());
            }
            Err(err) => warn!("Unable to list DFU devices: {}", err),
        }
    }

    config.revision()
}

/// Composes the SoC and writes its build inputs. Runs the toolchain when
/// `run` is set.
pub fn build(
    config: &BuildConfig,
    revision: Revision,
    run: bool,
) -> Result<(OrangeCart, BuildProducts), Box<dyn std::error::Error>> {
    let board = OrangeCart::new(revision, config.device, config.toolchain)?;
    let mut soc = Soc::new(&board, config.soc.clone())?;

    let builder = Builder::new(&config.output_dir, &config.build_name)
        .with_sources(config.sources.clone());
    let products = builder.build(&mut soc, &config.trellis, run)?;

    if run {
        info!("Bitstream written to {}", products.bitstream.display());
    } else {
        info!(
            "Build inputs written to {}, pass --build to run {}",
            builder.gateware_dir().display(),
            config.toolchain
        );
        for command in &products.commands {
            debug!("Would run: {}", command);
        }
    }

    Ok((board, products))
}
