use std::env;
use std::process::Command;

/// Commit shown by `sharkbone --version`, in order of preference.
const COMMIT_SOURCES: [&str; 2] = ["SHARKBONE_COMMIT", "GITHUB_SHA"];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    for var in COMMIT_SOURCES {
        println!("cargo:rerun-if-env-changed={var}");
    }

    let commit = COMMIT_SOURCES
        .iter()
        .find_map(|var| env::var(var).ok().filter(|v| !v.is_empty()))
        .map(|sha| sha.chars().take(7).collect())
        .or_else(|| git(&["rev-parse", "--short=7", "HEAD"]))
        .map(|sha| match git(&["status", "--porcelain", "--untracked-files=no"]) {
            Some(_) => format!("{sha}-dirty"),
            None => sha,
        })
        .unwrap_or_else(|| "unknown".to_string());
    let date = git(&["log", "-1", "--format=%cs"]).unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=SHARKBONE_BUILD_COMMIT={commit}");
    println!("cargo:rustc-env=SHARKBONE_BUILD_DATE={date}");
}

/// Trimmed stdout of a successful git command; `None` when git is missing,
/// fails, or prints nothing.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}
