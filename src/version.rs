use chrono::{DateTime, Local};

fn build_time() -> DateTime<Local> {
    let build_timestamp: i64 = env!("BUILD_TIME").parse().unwrap_or(0);
    DateTime::from_timestamp(build_timestamp, 0)
        .map(|utc| utc.with_timezone(&Local))
        .unwrap_or_else(Local::now)
}

pub fn get_version_info() -> String {
    format!(
        "astminer {}\n\
         Build Time: {}\n\
         Git Commit: {}\n\
         Git Branch: {}\n\
         Git Status: {}",
        env!("CARGO_PKG_VERSION"),
        build_time().format("%Y-%m-%d %H:%M:%S %Z"),
        env!("GIT_COMMIT_HASH"),
        env!("GIT_BRANCH"),
        env!("GIT_DIRTY"),
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

/// User-Agent sent to the ticket backend.
pub fn get_useragent() -> String {
    format!(
        "astminer/{} (built {})",
        env!("CARGO_PKG_VERSION"),
        build_time().format("%Y-%m-%d")
    )
}
