use std::process::Command;

/// Stamp the binary with the commit it was built from, for `APP_VERSION`
/// and the `/api/health` response. A `GIT_HASH` set by the build environment
/// wins; outside a checkout the stamp is "dev".
fn main() {
    let from_git = || {
        Command::new("git")
            .args(["rev-parse", "--short=8", "HEAD"])
            .output()
            .ok()
            .filter(|out| out.status.success())
            .and_then(|out| String::from_utf8(out.stdout).ok())
    };
    let commit = std::env::var("GIT_HASH")
        .ok()
        .or_else(from_git)
        .map(|hash| hash.trim().to_string())
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| "dev".to_string());

    println!("cargo:rustc-env=GIT_HASH={}", commit);

    println!("cargo:rerun-if-env-changed=GIT_HASH");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/refs/heads");
    println!("cargo:rerun-if-changed=../../.git/packed-refs");
}
