//! Build a write-sealed buffer and show what each capability check reports.
//!
//!   cargo run --example sealed_buffer -- "some text" [-v]

#[path = "logging.rs"]
mod logging;

use std::process::ExitCode;

use fdkit::{sealed_buffer, MapOptions, Memfd, SealFlags};
use log::{error, info, warn};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "-v" || a == "--verbose");
    logging::init_logger(verbose);

    let text = args
        .iter()
        .find(|a| !a.starts_with('-'))
        .cloned()
        .unwrap_or_else(|| "hello from a sealed memfd".to_string());

    match run(&text) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn report(memfd: &Memfd) -> fdkit::Result<()> {
    info!(
        "{}: flags={:?} growable={} shrinkable={} writable={} sealed={}",
        memfd,
        memfd.current_flags()?,
        memfd.growable()?,
        memfd.shrinkable()?,
        memfd.writable()?,
        memfd.is_sealed()?
    );
    Ok(())
}

fn run(text: &str) -> fdkit::Result<()> {
    let staged = Memfd::new("staged")?;
    staged.write_at(text.as_bytes(), 0)?;
    report(&staged)?;
    staged.revoke(SealFlags::GROW | SealFlags::SHRINK)?;
    report(&staged)?;

    let frozen = sealed_buffer("frozen", text.as_bytes())?;
    report(&frozen)?;

    match frozen.write_at(b"!", 0) {
        Ok(_) => warn!("write to a sealed region unexpectedly succeeded"),
        Err(e) => info!("write refused: {} ({})", e.kind(), e),
    }
    match frozen.revoke_write() {
        Ok(()) => warn!("revoke after seal unexpectedly succeeded"),
        Err(e) => info!("revoke refused: {} ({})", e.kind(), e),
    }

    let region = frozen.map(&MapOptions::read_only())?;
    println!("{}", String::from_utf8_lossy(region.as_slice()?));
    Ok(())
}
