//! Path helpers for XDG directories and desktop environment lookups.

use std::fs;
use std::path::PathBuf;

/// Get the ordered list of XDG data directories.
///
/// Order matters: earlier directories take priority when the same desktop
/// file ID appears more than once.
pub fn data_search_paths() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let home = std::env::var("HOME").unwrap_or_default();

    let xdg_data_home =
        std::env::var("XDG_DATA_HOME").unwrap_or_else(|_| format!("{}/.local/share", home));
    let xdg_data_dirs = std::env::var("XDG_DATA_DIRS")
        .unwrap_or_else(|_| "/usr/local/share:/usr/share".to_string());

    dirs.push(PathBuf::from(&xdg_data_home));
    for data_dir in xdg_data_dirs.split(':') {
        if !data_dir.is_empty() {
            dirs.push(PathBuf::from(data_dir));
        }
    }

    // App formats (flatpak, snap)
    dirs.push(PathBuf::from("/var/lib/flatpak/exports/share"));
    dirs.push(PathBuf::from(&home).join(".local/share/flatpak/exports/share"));
    dirs.push(PathBuf::from("/var/lib/snapd/desktop"));

    dirs
}

/// Get all application .desktop file directories, in priority order.
pub fn application_directories() -> Vec<PathBuf> {
    data_search_paths()
        .into_iter()
        .map(|dir| dir.join("applications"))
        .collect()
}

/// Get base icon directories (XDG + pixmaps), in search order.
pub fn icon_base_directories() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".icons"));
    }
    for data_dir in data_search_paths() {
        dirs.push(data_dir.join("icons"));
    }
    for data_dir in data_search_paths() {
        dirs.push(data_dir.join("pixmaps"));
    }
    dirs.push(PathBuf::from("/usr/share/pixmaps"));

    dirs
}

/// Get the current desktop environment name, used to evaluate the
/// OnlyShowIn/NotShowIn entry keys. Empty when unset.
pub fn current_desktop() -> String {
    std::env::var("XDG_CURRENT_DESKTOP")
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Get the active message locale (e.g. "en_US"), with any encoding suffix
/// stripped. Empty when the environment declares none.
pub fn current_locale() -> String {
    let raw = std::env::var("LC_MESSAGES")
        .or_else(|_| std::env::var("LANG"))
        .unwrap_or_default();
    if raw == "C" || raw == "POSIX" {
        return String::new();
    }
    raw.split('.').next().unwrap_or_default().to_string()
}

/// Get the ordered list of icon theme names to search, before inheritance
/// expansion. The user theme comes from GTK settings; "hicolor" is always the
/// final fallback.
pub fn icon_theme_names() -> Vec<String> {
    let mut themes = Vec::new();

    if let Ok(theme) = std::env::var("GTK_THEME") {
        if !theme.is_empty() {
            themes.push(theme);
        }
    }

    // Icon theme selection may be stored in ~/.gtkrc-2.0
    if let Some(home) = dirs::home_dir() {
        if let Ok(settings) = fs::read_to_string(home.join(".gtkrc-2.0")) {
            for line in settings.lines() {
                if let Some((key, value)) = line.split_once('=') {
                    let key = key.trim();
                    if key == "gtk-icon-theme-name" || key == "gtk-fallback-icon-theme" {
                        themes.push(value.trim().trim_matches('"').to_string());
                    }
                }
            }
        }
    }

    themes.retain(|name| !name.is_empty());
    if !themes.contains(&"hicolor".to_string()) {
        themes.push("hicolor".to_string());
    }
    themes
}
