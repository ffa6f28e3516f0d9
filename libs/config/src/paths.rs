use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "scmsg";
pub const APP_NAME: &str = "scmsg";

/// Used when the platform has no notion of a per-user data directory.
pub const FALLBACK_BOOKMARK_DIR: &str = ".scmsg/bookmarks";

pub fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).map(|dirs| dirs.data_dir().to_path_buf())
}

pub fn bookmark_dir() -> PathBuf {
    data_dir()
        .map(|dir| dir.join("bookmarks"))
        .unwrap_or_else(|| PathBuf::from(FALLBACK_BOOKMARK_DIR))
}

/// File stem of the running executable, the default client name.
pub fn program_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "scmsg-client".to_string())
}
