/// Wireprobe - diagnostic clients for TCP server protocols
///
/// This is the root crate that provides workspace-level documentation.
/// Actual implementation is in the subcrates:
/// - `wireprobe-core`: Cryptographic primitives, deadlines and shared utilities
/// - `wireprobe-pgwire`: PostgreSQL wire-protocol session engine and the `pgprobe` tool

/// Returns the version of the package.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_matches_manifest() {
        assert_eq!(version(), "0.1.0");
    }
}
