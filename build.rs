use std::env;
use std::process::Command;
use time::OffsetDateTime;

/// Year of the build, reproducible under `SOURCE_DATE_EPOCH`.
fn build_year() -> i32 {
    env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(|epoch| OffsetDateTime::from_unix_timestamp(epoch).ok())
        .unwrap_or_else(OffsetDateTime::now_utc)
        .year()
}

/// Trimmed stdout of a successful `git` invocation.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// `X.Y.Z` for release builds and tagged commits, `X.Y.Z-dev+<hash>` otherwise.
fn display_version(package_version: &str, release: bool) -> String {
    if release {
        return package_version.to_string();
    }
    let tag = format!("v{package_version}");
    if git(&["describe", "--tags", "--exact-match"]).as_deref() == Some(tag.as_str()) {
        return package_version.to_string();
    }
    match git(&["rev-parse", "--short", "HEAD"]) {
        Some(hash) => format!("{package_version}-dev+{hash}"),
        None => format!("{package_version}-dev"),
    }
}

fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/tags");

    let package_version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    let release = env::var("PROFILE").is_ok_and(|profile| profile == "release");

    println!("cargo:rustc-env=FRAME_MATCH_BUILD_YEAR={}", build_year());
    println!(
        "cargo:rustc-env=FRAME_MATCH_VERSION_DISPLAY={}",
        display_version(&package_version, release)
    );
}
