//! Print inotify events for a directory until interrupted.
//!
//!   cargo run --example watch_dir -- /tmp [-v]

#[path = "logging.rs"]
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use fdkit::fdkit_notify::correlate_moves;
use fdkit::{Inotify, KernelFeatures, WatchMask};
use log::{error, info};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "-v" || a == "--verbose");
    logging::init_logger(verbose);

    let path = args
        .iter()
        .find(|a| !a.starts_with('-'))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    match run(path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(path: PathBuf) -> fdkit::Result<()> {
    info!("kernel features:\n{}", KernelFeatures::detect().summary());

    let inotify = Inotify::new()?;
    let mask = WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::MODIFY
        | WatchMask::CLOSE_WRITE
        | WatchMask::MOVE;
    inotify.add_watch(&path, mask)?;
    info!("watching {} with {}", path.display(), inotify);

    loop {
        let events = inotify.read_events()?;
        for pair in correlate_moves(&events) {
            info!(
                "renamed {} -> {}",
                pair.from.name_lossy().unwrap_or_default(),
                pair.to.name_lossy().unwrap_or_default()
            );
        }
        for event in &events {
            if event.is_overflow() {
                error!("event queue overflowed, some events were lost");
                continue;
            }
            println!(
                "{:?} {}{}",
                event.mask,
                event.name_lossy().unwrap_or_default(),
                if event.is_dir() { "/" } else { "" }
            );
        }
    }
}
