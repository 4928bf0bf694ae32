//! Data-root resolution.
//!
//! All persistent state lives under `<root>/pa_data/`, overridable with the
//! `PA_DATA_PATH` environment variable.

use std::path::PathBuf;

pub const DATA_PATH_ENV: &str = "PA_DATA_PATH";

pub fn data_root() -> PathBuf {
    if let Some(path) = std::env::var_os(DATA_PATH_ENV) {
        return PathBuf::from(path);
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("pa_data")
}

pub fn workspaces_root() -> PathBuf {
    data_root().join("workspaces")
}

pub fn templates_root() -> PathBuf {
    data_root().join("templates")
}

pub fn workspace_path(work_id: &str) -> PathBuf {
    workspaces_root().join(work_id)
}

pub fn template_path(template_id: i64) -> PathBuf {
    templates_root().join(format!("{template_id}_template.md"))
}
