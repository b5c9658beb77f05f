//! Version information for Foundry
//!
//! Build metadata is injected by `build.rs`.

/// Package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit hash (short form)
pub const GIT_COMMIT: &str = env!("FOUNDRY_GIT_COMMIT");

/// Build timestamp (RFC3339 format)
pub const BUILT_AT: &str = env!("FOUNDRY_BUILT_AT");

/// Full version string, e.g. `Foundry v0.1.0 (commit abc123, built 2025-01-15T10:30:00Z)`
pub fn full_version() -> String {
    format!("Foundry v{} (commit {}, built {})", VERSION, GIT_COMMIT, BUILT_AT)
}

/// Short version string (`v0.1.0`)
pub fn short_version() -> String {
    format!("v{}", VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_version_mentions_commit() {
        let version = full_version();
        assert!(version.starts_with("Foundry v"));
        assert!(version.contains(GIT_COMMIT));
    }

    #[test]
    fn test_short_version() {
        assert_eq!(short_version(), format!("v{}", VERSION));
    }
}
