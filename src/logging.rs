pub use log::LevelFilter::*;

/// Install a stdout logger. Safe to call more than once; only the first call
/// wins.
pub fn setup_logging(verbosity: log::LevelFilter) {
    let result = fern::Dispatch::new()
        .level(verbosity)
        .format(|out, message, record| {
            out.finish(format_args!("[{}] {}: {}", record.level(), record.target(), message))
        })
        .chain(std::io::stdout())
        .apply();

    if result.is_err() {
        log::debug!("Logger already installed, keeping existing dispatcher");
    }
}
