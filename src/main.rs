//! CLI driver: reads a sensor-stream file line by line, runs it through the
//! fusion driver, and writes one output line per published nav-state update.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};

use eskf_nav::error::exit_code;
use eskf_nav::{FilterConfig, FusionDriver, NavError};
use log::{info, warn};

fn main() {
    env_logger::init();

    let code = match run() {
        Ok(()) => exit_code::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<(), NavError> {
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .ok_or_else(|| NavError::Config("usage: eskf-nav <config.yaml> <sensor-log>".into()))?;
    let log_path = args
        .next()
        .ok_or_else(|| NavError::Config("usage: eskf-nav <config.yaml> <sensor-log>".into()))?;

    let config = FilterConfig::load(&config_path)?;
    info!("loaded config from {config_path}");
    let gnss_status_override = config.gnss_status_override;

    let sink = eskf_nav::sink::SharedSink::new();
    let mut driver = FusionDriver::new(config, sink);

    let file = File::open(&log_path)?;
    let reader = BufReader::new(file);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        match eskf_nav::ingest::parse_line(&line, gnss_status_override) {
            Ok(Some(record)) => {
                driver.on_record(record);
                if let Some(state) = driver.sink().latest_nav_state() {
                    write_state_line(&mut out, &state)?;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("line {}: {e}", lineno + 1),
        }

        if !driver.is_healthy() {
            return Err(NavError::Divergence(format!(
                "filter diverged at line {}",
                lineno + 1
            )));
        }
    }

    Ok(())
}

fn write_state_line(out: &mut impl Write, state: &eskf_nav::NavState) -> Result<(), NavError> {
    writeln!(
        out,
        "{:.6} {:.4} {:.4} {:.4} {:.6} {:.6} {:.6} {:.6}",
        state.t,
        state.position[0],
        state.position[1],
        state.position[2],
        state.orientation[0],
        state.orientation[1],
        state.orientation[2],
        state.orientation[3],
    )?;
    Ok(())
}
