fn main() {
    // Embed the short commit hash so `--version` identifies the build
    let hash = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|raw| raw.trim().to_owned())
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| "dev".to_owned());

    println!("cargo:rustc-env=GIT_HASH={hash}");

    // Pick up new commits without a full clean
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/refs/heads/");
}
