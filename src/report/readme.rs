use std::path::Path;
use std::process::Command;

use log::debug;

use crate::config::Environment;

pub const NOT_A_GIT_REPOSITORY: &str = "not a git repository";

/// File name of the run manifest, e.g. `README_Imports_Users.md` for
/// `Imports::Users`.
pub fn readme_file_name(run_name: &str) -> String {
    format!("README_{}.md", run_name.replace("::", "_"))
}

/// Everything the manifest records about a run.
pub struct Manifest<'a> {
    pub run_name: &'a str,
    pub user_name: &'a str,
    pub revision: &'a str,
    pub report_directory: &'a Path,
    pub environment: &'a Environment,
}

impl Manifest<'_> {
    pub fn render(&self) -> String {
        let mut text = format!(
            "# Batch job\n\
             \n\
             ## {}\n\
             \n\
             * Run as: `{}`\n\
             * Git commit: `{}`\n\
             * Report directory: `{}`\n\
             \n\
             ## Environment variables\n\
             \n\
             | Variable | Value |\n\
             | - | - |\n",
            self.run_name,
            self.user_name,
            self.revision,
            self.report_directory.display()
        );
        for (key, value) in self.environment.iter() {
            text.push_str(&format!("| {} | {} |\n", key, escape_cell(value)));
        }
        text
    }
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

/// Hash of the current git commit, or [`NOT_A_GIT_REPOSITORY`] if it cannot
/// be determined for any reason.
pub fn git_commit() -> String {
    let output = match Command::new("git").args(["log", "-1", "--format=%H"]).output() {
        Ok(output) => output,
        Err(e) => {
            debug!("git unavailable: {}", e);
            return NOT_A_GIT_REPOSITORY.to_string();
        }
    };
    if !output.status.success() {
        return NOT_A_GIT_REPOSITORY.to_string();
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::trim)
        .filter(|hash| !hash.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| NOT_A_GIT_REPOSITORY.to_string())
}
