use std::path::PathBuf;

use crate::clock::Timestamp;
use crate::config::JobConfig;

/// `Imports::UserAccounts` -> `user_accounts`. Whitespace becomes `_`.
pub fn underscore(run_name: &str) -> String {
    let base = run_name.rsplit("::").next().unwrap_or(run_name);
    let chars: Vec<char> = base.chars().collect();
    let mut out = String::with_capacity(base.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let after_lower = prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit());
            let acronym_end =
                prev.is_some_and(|p| p.is_uppercase()) && next.is_some_and(|n| n.is_lowercase());
            if after_lower || acronym_end {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == '-' || c.is_whitespace() {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// `Joe Bloggs` -> `joe-bloggs`, safe as a single path segment.
pub fn parameterize(user_name: &str) -> String {
    let mut out = String::with_capacity(user_name.len());
    for c in user_name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

pub fn default_directory_name(run_name: &str, now: Timestamp) -> String {
    format!("{}_{}", now.format("%Y-%m-%d_%H-%M-%S"), underscore(run_name))
}

/// Storage root, namespaced as `tmp/<user>/batch/jobs` when configured.
pub fn report_root(config: &JobConfig) -> PathBuf {
    match (&config.user_name, config.namespace_by_user) {
        (Some(user), true) => config
            .storage_root
            .join("tmp")
            .join(parameterize(user))
            .join("batch")
            .join("jobs"),
        _ => config.storage_root.clone(),
    }
}

/// Full path of the report directory for a run started at `now`.
pub fn resolve(config: &JobConfig, run_name: &str, now: Timestamp) -> PathBuf {
    let mut name = config
        .report_directory
        .clone()
        .unwrap_or_else(|| default_directory_name(run_name, now));
    if let Some(worker) = config.worker {
        name.push_str(&format!("_w{}", worker));
    }
    report_root(config).join(name)
}
