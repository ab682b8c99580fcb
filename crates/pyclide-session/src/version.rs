//! Version information for the pyclide client.

/// Client version from Cargo.toml
pub const PYCLIDE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// `User-Agent` sent with every request to a worker.
pub fn user_agent() -> String {
    format!("pyclide/{}", PYCLIDE_VERSION)
}
