use std::process::Command;

fn main() {
    // version string for the startup log
    let git_hash = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|hash| hash.trim().to_string())
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=GIT_HASH={}", git_hash);

    // extraction shells out to both at runtime
    for (tool, flag) in [("yt-dlp", "--version"), ("ffmpeg", "-version")] {
        if Command::new(tool).arg(flag).output().is_err() {
            println!("cargo:warning={} not found in PATH, extraction will not work", tool);
        }
    }
}
