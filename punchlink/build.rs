//! Stamps the startup banner (`punchlink vX [hash] built <time> (<profile>)`)

use std::env;
use std::process::Command;

fn git_short_hash() -> Option<String> {
    let output = Command::new("git").args(["rev-parse", "--short=8", "HEAD"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!hash.is_empty()).then_some(hash)
}

fn main() {
    let stamp = [
        ("GIT_HASH", git_short_hash().unwrap_or_else(|| "unknown".into())),
        (
            "BUILD_TIMESTAMP",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        ),
        ("BUILD_PROFILE", env::var("PROFILE").unwrap_or_else(|_| "unknown".into())),
    ];
    for (key, value) in stamp {
        println!("cargo:rustc-env={key}={value}");
    }
}
