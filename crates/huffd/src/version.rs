//! Version information for huffd.

/// huffd version from Cargo.toml
pub const HUFFD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information for the server.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    /// huffd library version.
    pub huffd: &'static str,
    /// Source revision, when stamped in at build time via `HUFFD_COMMIT`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<&'static str>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            huffd: HUFFD_VERSION,
            commit: option_env!("HUFFD_COMMIT"),
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }
}
