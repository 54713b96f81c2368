/// Placeholder reported when the build did not stamp a version.
pub const UNSET_VERSION: &str = "(devel)";

/// The protocol version of this build, taken from `CODIES_VERSION` at compile time.
pub fn version() -> &'static str {
    option_env!("CODIES_VERSION")
        .filter(|v| !v.is_empty())
        .unwrap_or(UNSET_VERSION)
}

/// Whether the build was stamped with a real version.
pub fn version_set() -> bool {
    version() != UNSET_VERSION
}
