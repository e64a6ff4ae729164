use crate::ticket::{User, UserDirectory};
use anyhow::Result;
use std::collections::HashMap;

/// Backend logins a queue member may map to, most specific first.
///
/// `sip/agent07` yields `agent07` and then `agent`, so several transport
/// accounts can share one backend user.
pub fn login_candidates(member: &str) -> Vec<String> {
    let username = member
        .split_once('/')
        .map(|(_, name)| name)
        .unwrap_or(member)
        .trim();
    let stripped = username.trim_end_matches(|c: char| c.is_ascii_digit());

    let mut candidates = Vec::with_capacity(2);
    if !username.is_empty() {
        candidates.push(username.to_string());
    }
    if !stripped.is_empty() && stripped != username {
        candidates.push(stripped.to_string());
    }
    candidates
}

pub fn find_user<'a>(users: &'a [User], candidates: &[String]) -> Option<&'a User> {
    candidates
        .iter()
        .find_map(|login| users.iter().find(|user| &user.login == login))
}

/// Resolves a queue member to a backend user id. `Ok(None)` is a lookup
/// miss; `Err` means the directory itself failed.
pub async fn resolve(
    member: &str,
    user_map: &HashMap<String, u64>,
    directory: &dyn UserDirectory,
) -> Result<Option<u64>> {
    if let Some(id) = user_map.get(member) {
        return Ok(Some(*id));
    }
    let candidates = login_candidates(member);
    if candidates.is_empty() {
        return Ok(None);
    }
    let users = directory.find_all().await?;
    Ok(find_user(&users, &candidates).map(|user| user.id))
}
