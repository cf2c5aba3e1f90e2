use std::process::Command;

fn main() {
    let build_time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!("cargo:rustc-env=BUILD_TIME={}", build_time);

    let git_commit = git_output(&["rev-parse", "--short", "HEAD"]);
    println!("cargo:rustc-env=GIT_COMMIT_HASH={}", git_commit);

    let git_branch = git_output(&["rev-parse", "--abbrev-ref", "HEAD"]);
    println!("cargo:rustc-env=GIT_BRANCH={}", git_branch);

    println!("cargo:rustc-env=GIT_DIRTY={}", get_git_dirty());

    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}

fn git_output(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn get_git_dirty() -> &'static str {
    match Command::new("git")
        .args(["diff", "--quiet", "--ignore-submodules"])
        .output()
    {
        Ok(output) if output.status.success() => "clean",
        Ok(output) if output.status.code() == Some(1) => "dirty",
        _ => "unknown",
    }
}
