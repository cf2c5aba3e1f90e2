use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub build_time: String,
    pub git_commit: &'static str,
    pub git_branch: &'static str,
    pub git_status: &'static str,
}

fn build_datetime() -> DateTime<Local> {
    let build_timestamp: i64 = env!("BUILD_TIME").parse().unwrap_or(0);
    DateTime::from_timestamp(build_timestamp, 0)
        .map(|utc| utc.with_timezone(&Local))
        .unwrap_or_else(Local::now)
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        build_time: build_datetime().format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        git_commit: env!("GIT_COMMIT_HASH"),
        git_branch: env!("GIT_BRANCH"),
        git_status: env!("GIT_DIRTY"),
    }
}

pub fn get_version_info() -> String {
    let info = version_info();
    format!(
        "{} {}\n\
         Build Time: {}\n\
         Git Commit: {}\n\
         Git Branch: {}\n\
         Git Status: {}",
        info.name, info.version, info.build_time, info.git_commit, info.git_branch, info.git_status
    )
}

pub fn get_short_version() -> String {
    let version = env!("CARGO_PKG_VERSION");
    let git_commit = env!("GIT_COMMIT_HASH");
    if env!("GIT_DIRTY") == "dirty" {
        format!("{}-{}-dirty", version, git_commit)
    } else {
        format!("{}-{}", version, git_commit)
    }
}

/// User agent sent on outbound API calls.
pub fn get_useragent() -> String {
    format!(
        "{}/{} (built {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        build_datetime().format("%Y-%m-%d")
    )
}
