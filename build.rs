//! Embeds the short git revision into the binary for `mender --version`.
//!
//! Falls back to `unknown` when git is not available (for example when
//! building from a source tarball).

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=MENDER_BUILD_GIT_HASH");

    let git_hash = env::var("MENDER_BUILD_GIT_HASH").unwrap_or_else(|_| short_revision());
    println!("cargo:rustc-env=MENDER_BUILD_GIT_HASH={git_hash}");
}

fn short_revision() -> String {
    let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=10", "HEAD"])
        .output()
    else {
        return "unknown".to_string();
    };
    if !output.status.success() {
        return "unknown".to_string();
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        "unknown".to_string()
    } else {
        text
    }
}
