//! What `podbridge --version` and the `--help` trailer report.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const REVISION: &str = env!("PODBRIDGE_REVISION");
/// HTTP-date of the build, pinned by `SOURCE_DATE_EPOCH` when set.
pub const BUILT: &str = env!("PODBRIDGE_BUILT");
pub const TARGET: &str = env!("PODBRIDGE_TARGET");

pub const HELP_BUILD_METADATA: &str = concat!(
    "Revision ",
    env!("PODBRIDGE_REVISION"),
    " for ",
    env!("PODBRIDGE_TARGET"),
    ", built ",
    env!("PODBRIDGE_BUILT"),
);

/// True when the binary was built from a tree with uncommitted changes.
pub fn dirty() -> bool {
    REVISION.ends_with("-dirty")
}

/// `podbridge 0.1.0 (v0.1.0-3-gabc123def456, x86_64-unknown-linux-gnu)`
/// followed by the build date on its own line.
pub fn version_text() -> String {
    let mut text = format!("podbridge {VERSION} ({REVISION}, {TARGET})\nbuilt {BUILT}");
    if dirty() {
        text.push_str("\nwarning: built from a modified tree");
    }
    text
}
