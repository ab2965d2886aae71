//! Data log output.
//!
//! The engine-wide logging contract is two calls, each taking a single UTF-8
//! string: [`print`] for ordinary output and [`print_error`] for errors.
//! Both route through the [`log`] facade, so the embedding application picks
//! the sink (console, file, ring buffer) and any transcoding it needs by
//! installing a `log` backend. The library itself never formats beyond
//! producing the one string.

/// Writes a string to the log.
pub fn print(string: &str) {
    log::info!("{string}");
}

/// Writes a string to the error log.
pub fn print_error(string: &str) {
    log::error!("{string}");
}
