use std::io::Write;

use env_logger::{Builder, Env};

/// Log fdkit's own crates at debug when `verbose`, everything else at info.
/// `RUST_LOG` replaces the default filter entirely.
pub fn init_logger(verbose: bool) {
    let default_filter = if verbose {
        "info,fdkit=debug,fdkit_core=debug,fdkit_notify=debug,fdkit_memfd=debug,fdkit_namespace=debug"
    } else {
        "info"
    };

    Builder::from_env(Env::default().filter_or("RUST_LOG", default_filter))
        .format(|buf, record| {
            // fdkit_memfd::seal -> memfd::seal
            let target = record.target();
            let target = target.strip_prefix("fdkit_").unwrap_or(target);
            writeln!(buf, "{:<5} [{}] {}", record.level(), target, record.args())
        })
        .init();
}
