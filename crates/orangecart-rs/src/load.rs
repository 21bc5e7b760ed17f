use std::{
    fs::{self, File},
    io::{self, BufWriter},
    path::Path,
};

use log::{LevelFilter, info, warn};
use orangecart_core::{
    BoardInfo, BoardIter, DfuProg, OrangeCart, OrangeCartError, programmer::list_devices,
};

use crate::reporter::ImageWriteReporter;

/// Prints the DFU devices attached and the board revision each one matches.
pub fn list() -> Result<(), Box<dyn std::error::Error>> {
    let devices = list_devices()?;
    if devices.is_empty() {
        info!("No DFU devices found");
    }
    for device in devices {
        let board = match BoardIter::find_by_device(&device) {
            Some(revision) => format!("OrangeCart {}", revision),
            None => "unknown".to_string(),
        };
        info!(
            "{:04x}:{:04x} ver {}.{:02} path {} alt {}: {}",
            device.vendor_id,
            device.product_id,
            device.version.0,
            device.version.1,
            device.path,
            device.alt,
            board
        );
    }
    Ok(())
}

pub fn load<P: AsRef<Path>>(
    board: &OrangeCart,
    bitstream: P,
    serial: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let bitstream = bitstream.as_ref();
    if !bitstream.is_file() {
        return Err(format!(
            "No bitstream at {}, run with --build first",
            bitstream.display()
        )
        .into());
    }

    let prog = board.create_programmer();
    info!(
        "Using DFU device {:04x}:{:04x} alt {} for {}",
        prog.vid,
        prog.pid,
        prog.alt,
        board.board_name()
    );

    match list_devices() {
        Ok(devices) if !devices.iter().any(|d| board.is_device_board(d)) => {
            warn!("No {} in DFU mode found", board.board_name());
        }
        Ok(_) => (),
        Err(err) => warn!("Unable to list DFU devices: {}", err),
    }

    #[cfg(feature = "serial")]
    let serial_ports_before = serialport::available_ports()?;

    if log::max_level() >= LevelFilter::Info {
        write_with_progress(&prog, bitstream)?;
    } else {
        prog.load_bitstream(bitstream)?;
    }

    #[cfg(feature = "serial")]
    if serial {
        follow_serial(&serial_ports_before)?;
    }
    #[cfg(not(feature = "serial"))]
    let _ = serial;

    Ok(())
}

/// Same as [`DfuProg::load_bitstream`] with a progress bar over the image write.
fn write_with_progress(prog: &DfuProg, bitstream: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(bitstream).map_err(|source| OrangeCartError::FailedToRead {
        path: bitstream.to_owned(),
        source,
    })?;
    let image_path = DfuProg::image_path(bitstream);
    let write_error = |source: io::Error| OrangeCartError::FailedToWrite {
        path: image_path.clone(),
        source,
    };
    let output = BufWriter::new(File::create(&image_path).map_err(write_error)?);

    let mut reporter = ImageWriteReporter::new(data.len(), &image_path, output);
    let result = prog.write_image(&data, &mut reporter);
    let output = reporter.finish();
    let result = result.and_then(|()| {
        output
            .into_inner()
            .map(drop)
            .map_err(|err| err.into_error())
    });

    if let Err(source) = result {
        fs::remove_file(&image_path).ok();
        return Err(write_error(source).into());
    }

    println!();

    prog.download_command(&image_path).run()?;
    Ok(())
}

/// Waits for the SoC's console port to show up and copies it to stdout.
#[cfg(feature = "serial")]
fn follow_serial(ports_before: &[serialport::SerialPortInfo]) -> Result<(), Box<dyn std::error::Error>> {
    use std::io::{Read, Write};
    use std::thread;
    use std::time::Duration;

    let mut counter = 0;

    let serial_port_info = 'find_loop: loop {
        for port in serialport::available_ports()? {
            if !ports_before.contains(&port) {
                info!("Found SoC console on {}", &port.port_name);
                break 'find_loop Some(port);
            }
        }

        counter += 1;

        if counter == 100 {
            break None;
        }

        thread::sleep(Duration::from_millis(200));
    };

    let Some(serial_port_info) = serial_port_info else {
        return Err("No new serial port appeared after loading".into());
    };

    for _ in 0..100 {
        if let Ok(mut port) = serialport::new(&serial_port_info.port_name, 115200)
            .timeout(Duration::from_millis(100))
            .flow_control(serialport::FlowControl::None)
            .open()
        {
            let mut serial_buf = [0; 1024];
            loop {
                match port.read(&mut serial_buf) {
                    Ok(t) => {
                        io::stdout().write_all(&serial_buf[..t])?;
                        io::stdout().flush()?;
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::TimedOut => (),
                    Err(e) => return Err(e.into()),
                }
            }
        }

        thread::sleep(Duration::from_millis(200));
    }

    Err(format!("Unable to open {}", serial_port_info.port_name).into())
}
