//! Daemon entry point: loads the boot TOML named on the command line (or
//! `/etc/aquacore.toml` if none is given), boots the core, and parks the
//! main thread while the task-pool worker drives registry/schedule/switch
//! ticks in the background.

use std::path::PathBuf;
use std::process::ExitCode;

use aquacore::boot::{self, BootConfig};

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/aquacore.toml"))
}

fn main() -> ExitCode {
    let path = config_path();
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("failed to read {}: {err}", path.display());
            return ExitCode::FAILURE;
        }
    };

    let cfg = match BootConfig::parse(&text) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("failed to parse {}: {err}", path.display());
            return ExitCode::FAILURE;
        }
    };

    let handle = match boot::run(&cfg) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("boot failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    // The REST layer (`aquacore::rest`) is a pure dispatch function with no
    // socket of its own; a host process would bind it to a listener here.
    // Absent one, the daemon just keeps `handle` alive and the tick worker
    // running in the background.
    let _handle = handle;
    loop {
        std::thread::park();
    }
}
