use std::{
    process::Command,
    time::{SystemTime, UNIX_EPOCH},
};

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let version = git_version().unwrap_or_else(|| {
        std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0-unknown".to_string())
    });

    println!("cargo:rustc-env=REQKIT_VERSION={}", version);
}

/// `None` outside a git work tree, e.g. when building from a published tarball.
fn git_version() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim();
    // Release tags are named vX.Y.Z.
    let described = described.strip_prefix('v').unwrap_or(described);

    // Uncommitted builds get a unique suffix so they never pass for a release.
    if described.is_empty() || described.ends_with("-dirty") {
        Some(format!("{}-{}", described, timestamp()))
    } else {
        Some(described.to_string())
    }
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
