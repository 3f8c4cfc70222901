//! Stamps the binary with its source revision, build date and target
//! triple for `podbridge --version`.
//!
//! `PODBRIDGE_REVISION` overrides the git lookup for builds from a source
//! tarball. `SOURCE_DATE_EPOCH` pins the build date for reproducible builds.

use std::env;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn main() {
    for var in ["PODBRIDGE_REVISION", "SOURCE_DATE_EPOCH"] {
        println!("cargo:rerun-if-env-changed={var}");
    }
    rerun_on_new_commit(Path::new(".git"));

    let revision = env::var("PODBRIDGE_REVISION")
        .ok()
        .filter(|r| !r.trim().is_empty())
        .or_else(git_describe)
        .unwrap_or_else(|| "unknown".into());
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".into());

    println!("cargo:rustc-env=PODBRIDGE_REVISION={revision}");
    println!("cargo:rustc-env=PODBRIDGE_BUILT={}", build_date());
    println!("cargo:rustc-env=PODBRIDGE_TARGET={target}");
}

/// HEAD plus the branch ref it points at, when the tree is a checkout.
fn rerun_on_new_commit(git_dir: &Path) {
    let head = git_dir.join("HEAD");
    let Ok(contents) = std::fs::read_to_string(&head) else {
        return;
    };
    println!("cargo:rerun-if-changed={}", head.display());
    if let Some(branch) = contents.trim().strip_prefix("ref: ") {
        println!("cargo:rerun-if-changed={}", git_dir.join(branch).display());
    }
}

/// `v0.1.0-3-gabc123def456-dirty` style, or a bare hash without tags.
fn git_describe() -> Option<String> {
    let out = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=12"])
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    let text = String::from_utf8(out.stdout).ok()?;
    Some(text.trim().to_string()).filter(|t| !t.is_empty())
}

fn build_date() -> String {
    let at = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap_or_else(SystemTime::now);
    httpdate::fmt_http_date(at)
}
