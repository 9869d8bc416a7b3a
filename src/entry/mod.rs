//! Desktop entry parsing.
//!
//! Implements the freedesktop Desktop Entry format: `[Section]` groups,
//! `key[locale]=value` lines, escape sequences, and list/boolean values.
//! Only the `[Desktop Entry]` group is consumed; `[Desktop Action *]` groups
//! are recognized and skipped, and any other group is ignored.

mod fields;

use crate::error::{Error, Result};
use crate::paths;
use log::debug;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// The group header holding all entry data this parser consumes.
const MAIN_GROUP: &str = "Desktop Entry";

/// Prefix of the per-action groups the parser skips over.
const ACTION_GROUP_PREFIX: &str = "Desktop Action ";

/// Keys defined by the desktop entry specification. Anything else on a line
/// is treated as a vendor extension and ignored.
const RECOGNIZED_KEYS: &[&str] = &[
    "Type",
    "Version",
    "Name",
    "GenericName",
    "NoDisplay",
    "Comment",
    "Icon",
    "Hidden",
    "OnlyShowIn",
    "NotShowIn",
    "DBusActivatable",
    "TryExec",
    "Exec",
    "Path",
    "Terminal",
    "Actions",
    "MimeType",
    "Categories",
    "Implements",
    "Keywords",
    "StartupNotify",
    "StartupWMClass",
    "URL",
];

/// Environment values the parser needs: the active locale for localized keys
/// and the current desktop name for OnlyShowIn/NotShowIn.
#[derive(Clone, Debug, Default)]
pub struct ParseContext {
    pub locale: String,
    pub desktop: String,
}

impl ParseContext {
    pub fn from_env() -> Self {
        Self {
            locale: paths::current_locale(),
            desktop: paths::current_desktop(),
        }
    }
}

/// The kind of resource a desktop entry describes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EntryType {
    #[default]
    Application,
    Link,
    Directory,
}

impl EntryType {
    fn parse(value: &str, path: &Path) -> Result<Self> {
        match value {
            "Application" => Ok(EntryType::Application),
            "Link" => Ok(EntryType::Link),
            "Directory" => Ok(EntryType::Directory),
            other => Err(Error::file(path, format!("invalid entry type {other}"))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            EntryType::Application => "Application",
            EntryType::Link => "Link",
            EntryType::Directory => "Directory",
        }
    }
}

/// One parsed desktop entry file.
///
/// Consumers always receive cloned values, never references into the loader's
/// tables, so entries can cross threads freely.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MenuEntry {
    /// Desktop file ID: the file's path relative to its `applications/` root.
    pub id: String,
    pub entry_type: EntryType,
    pub title: String,
    pub generic_name: String,
    pub comment: String,
    pub icon_name: String,
    pub exec: String,
    pub try_exec: String,
    pub working_directory: String,
    pub url: String,
    pub startup_wm_class: String,
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
    pub mime_types: Vec<String>,
    pub implements: Vec<String>,
    pub actions: Vec<String>,
    pub only_show_in: Vec<String>,
    pub not_show_in: Vec<String>,
    pub launch_in_terminal: bool,
    pub no_display: bool,
    pub hidden: bool,
    pub startup_notify: bool,
    pub dbus_activatable: bool,
    pub source_path: PathBuf,
    pub source_modified: Option<SystemTime>,
}

impl MenuEntry {
    /// Reads and parses a desktop entry file.
    pub fn from_file(path: &Path, id: &str, ctx: &ParseContext) -> Result<MenuEntry> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::file(path, format!("unreadable entry file: {e}")))?;
        let modified = fs::metadata(path).and_then(|meta| meta.modified()).ok();
        let mut entry = Self::parse(&text, path, id, ctx)?;
        entry.source_modified = modified;
        Ok(entry)
    }

    /// Parses desktop entry text into a [`MenuEntry`].
    pub fn parse(text: &str, source_path: &Path, id: &str, ctx: &ParseContext) -> Result<MenuEntry> {
        let mut entry = MenuEntry {
            id: id.to_string(),
            source_path: source_path.to_path_buf(),
            ..MenuEntry::default()
        };

        // Keys already set from a matching-locale line. A localized value
        // always wins over the unlocalized default, regardless of line order.
        let mut localized_keys: HashSet<&'static str> = HashSet::new();
        let mut in_main_group = false;
        let mut seen_main_group = false;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if fields::is_header_line(line) {
                let header = fields::extract_header(line);
                in_main_group = header == MAIN_GROUP;
                seen_main_group |= in_main_group;
                if !in_main_group && !header.starts_with(ACTION_GROUP_PREFIX) {
                    debug!("{}: ignoring nonstandard group [{header}]", id);
                }
                continue;
            }
            if !in_main_group {
                continue;
            }

            let parsed = fields::split_line(line)?;
            let localized = match parsed.locale {
                Some(locale) => {
                    if !fields::locale_matches(locale, &ctx.locale) {
                        continue;
                    }
                    true
                }
                None => false,
            };
            let Some(key) = RECOGNIZED_KEYS.iter().find(|k| **k == parsed.key) else {
                debug!("{}: ignoring unrecognized key {}", id, parsed.key);
                continue;
            };
            if !localized && localized_keys.contains(key) {
                continue;
            }
            entry.apply_value(key, parsed.value, source_path)?;
            if localized {
                localized_keys.insert(key);
            }
        }

        if !seen_main_group {
            return Err(Error::file(source_path, "missing [Desktop Entry] group"));
        }
        Ok(entry)
    }

    fn apply_value(&mut self, key: &str, value: &str, path: &Path) -> Result<()> {
        let file_err = |e: Error| match e {
            Error::Format(detail) => Error::file(path, format!("invalid value: {detail}")),
            other => other,
        };
        match key {
            "Type" => self.entry_type = EntryType::parse(value, path)?,
            "Version" => {} // informational only
            "Name" => self.title = fields::process_string(value, true).map_err(file_err)?,
            "GenericName" => {
                self.generic_name = fields::process_string(value, true).map_err(file_err)?;
            }
            "Comment" => self.comment = fields::process_string(value, true).map_err(file_err)?,
            "Icon" => self.icon_name = fields::process_string(value, true).map_err(file_err)?,
            "TryExec" => self.try_exec = fields::process_string(value, false).map_err(file_err)?,
            "Path" => {
                self.working_directory = fields::process_string(value, false).map_err(file_err)?;
            }
            "URL" => self.url = fields::process_string(value, false).map_err(file_err)?,
            "StartupWMClass" => {
                self.startup_wm_class = fields::process_string(value, false).map_err(file_err)?;
            }
            "Exec" => {
                let raw = fields::process_string(value, false).map_err(file_err)?;
                self.exec = fields::unquote_command_fields(&raw);
            }
            "Categories" => self.categories = fields::parse_list(value, false).map_err(file_err)?,
            "Keywords" => self.keywords = fields::parse_list(value, true).map_err(file_err)?,
            "MimeType" => self.mime_types = fields::parse_list(value, false).map_err(file_err)?,
            "Implements" => self.implements = fields::parse_list(value, false).map_err(file_err)?,
            "Actions" => self.actions = fields::parse_list(value, false).map_err(file_err)?,
            "OnlyShowIn" => {
                self.only_show_in = fields::parse_list(value, false).map_err(file_err)?;
            }
            "NotShowIn" => self.not_show_in = fields::parse_list(value, false).map_err(file_err)?,
            "Terminal" => self.launch_in_terminal = fields::parse_bool(value).map_err(file_err)?,
            "NoDisplay" => self.no_display = fields::parse_bool(value).map_err(file_err)?,
            "Hidden" => self.hidden = fields::parse_bool(value).map_err(file_err)?,
            "StartupNotify" => self.startup_notify = fields::parse_bool(value).map_err(file_err)?,
            "DBusActivatable" => {
                self.dbus_activatable = fields::parse_bool(value).map_err(file_err)?;
            }
            _ => unreachable!("key {key} accepted but not handled"),
        }
        Ok(())
    }

    /// Whether this entry belongs in visible application menus, given the
    /// desktop environment it was parsed under.
    pub fn should_display(&self, ctx: &ParseContext) -> bool {
        !self.hidden
            && !self.no_display
            && !self.not_show_in.iter().any(|env| *env == ctx.desktop)
            && (self.only_show_in.is_empty()
                || self.only_show_in.iter().any(|env| *env == ctx.desktop))
    }

    /// Whether the entry lacks data every launchable entry must have.
    pub fn is_missing_data(&self) -> bool {
        self.title.is_empty() || (self.exec.is_empty() && !self.dbus_activatable)
    }

    /// The command used to launch this entry, with the given terminal prefix
    /// applied when the entry asks for a terminal.
    pub fn launch_command(&self, terminal_prefix: &str) -> String {
        if self.launch_in_terminal && !self.exec.is_empty() {
            format!("{terminal_prefix} {}", self.exec)
        } else {
            self.exec.clone()
        }
    }

    /// Serializes the entry back to desktop-entry text. Re-parsing the
    /// result yields an equal entry.
    pub fn to_entry_string(&self) -> String {
        let mut out = String::new();
        let mut line = |key: &str, value: String| {
            if !value.is_empty() {
                out.push_str(key);
                out.push('=');
                out.push_str(&value);
                out.push('\n');
            }
        };
        line("Type", self.entry_type.as_str().to_string());
        line("Name", fields::escape(&self.title));
        line("GenericName", fields::escape(&self.generic_name));
        line("Comment", fields::escape(&self.comment));
        line("Icon", fields::escape(&self.icon_name));
        // Quoting happens first, then escaping: the parser unescapes before
        // it unquotes, so the writer must compose the inverses in reverse.
        line(
            "Exec",
            fields::escape(&fields::quote_command_fields(&self.exec)),
        );
        line("TryExec", fields::escape(&self.try_exec));
        line("Path", fields::escape(&self.working_directory));
        line("URL", fields::escape(&self.url));
        line("StartupWMClass", fields::escape(&self.startup_wm_class));
        line("Categories", fields::list_string(&self.categories));
        line("Keywords", fields::list_string(&self.keywords));
        line("MimeType", fields::list_string(&self.mime_types));
        line("Implements", fields::list_string(&self.implements));
        line("Actions", fields::list_string(&self.actions));
        line("OnlyShowIn", fields::list_string(&self.only_show_in));
        line("NotShowIn", fields::list_string(&self.not_show_in));
        for (key, value) in [
            ("Terminal", self.launch_in_terminal),
            ("NoDisplay", self.no_display),
            ("Hidden", self.hidden),
            ("StartupNotify", self.startup_notify),
            ("DBusActivatable", self.dbus_activatable),
        ] {
            if value {
                line(key, fields::bool_string(value).to_string());
            }
        }
        format!("[{MAIN_GROUP}]\n{out}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ParseContext {
        ParseContext {
            locale: "sv_SE".to_string(),
            desktop: "Sway".to_string(),
        }
    }

    fn parse(text: &str) -> Result<MenuEntry> {
        MenuEntry::parse(text, Path::new("/apps/test.desktop"), "test.desktop", &ctx())
    }

    const BASIC: &str = "\
[Desktop Entry]
Type=Application
Name=Web Browser
Icon=browser
Exec=browser %U
Categories=Network;WebBrowser;
Terminal=false
";

    #[test]
    fn parses_basic_entry() {
        let entry = parse(BASIC).unwrap();
        assert_eq!(entry.title, "Web Browser");
        assert_eq!(entry.icon_name, "browser");
        assert_eq!(entry.exec, "browser %U");
        assert_eq!(entry.categories, vec!["Network", "WebBrowser"]);
        assert!(!entry.launch_in_terminal);
        assert!(entry.should_display(&ctx()));
    }

    #[test]
    fn localized_value_overrides_default_in_either_order() {
        let after = parse("[Desktop Entry]\nName=Browser\nName[sv]=Webbläsare\n").unwrap();
        assert_eq!(after.title, "Webbläsare");

        let before = parse("[Desktop Entry]\nName[sv]=Webbläsare\nName=Browser\n").unwrap();
        assert_eq!(before.title, "Webbläsare");
    }

    #[test]
    fn non_matching_locales_are_skipped() {
        let entry = parse("[Desktop Entry]\nName=Browser\nName[de]=Browser DE\n").unwrap();
        assert_eq!(entry.title, "Browser");
    }

    #[test]
    fn action_groups_and_unknown_keys_are_ignored() {
        let text = "\
[Desktop Entry]
Name=App
X-Vendor-Extension=whatever
[Desktop Action new-window]
Name=New Window
Exec=app --new
";
        let entry = parse(text).unwrap();
        assert_eq!(entry.title, "App");
        assert_eq!(entry.exec, "");
    }

    #[test]
    fn missing_main_group_is_an_error() {
        assert!(parse("[Other Group]\nName=App\n").is_err());
    }

    #[test]
    fn unsplittable_line_is_a_format_error() {
        assert!(parse("[Desktop Entry]\nNameNoEquals\n").is_err());
    }

    #[test]
    fn should_display_honors_environment_lists() {
        let hidden = parse("[Desktop Entry]\nName=A\nHidden=true\n").unwrap();
        assert!(!hidden.should_display(&ctx()));

        let no_display = parse("[Desktop Entry]\nName=A\nNoDisplay=true\n").unwrap();
        assert!(!no_display.should_display(&ctx()));

        let excluded = parse("[Desktop Entry]\nName=A\nNotShowIn=Sway;\n").unwrap();
        assert!(!excluded.should_display(&ctx()));

        let elsewhere_only = parse("[Desktop Entry]\nName=A\nOnlyShowIn=GNOME;\n").unwrap();
        assert!(!elsewhere_only.should_display(&ctx()));

        let here_only = parse("[Desktop Entry]\nName=A\nOnlyShowIn=Sway;GNOME;\n").unwrap();
        assert!(here_only.should_display(&ctx()));
    }

    #[test]
    fn entries_round_trip_through_serialization() {
        let text = "\
[Desktop Entry]
Type=Application
Name=Line\\nBreak
GenericName=Editor
Icon=editor
Exec=editor %F
Categories=Utility;TextEditor;
Keywords=text;edit;
Terminal=true
StartupNotify=true
";
        let entry = parse(text).unwrap();
        let rewritten = entry.to_entry_string();
        let reparsed = parse(&rewritten).unwrap();
        assert_eq!(entry, reparsed);
        assert_eq!(reparsed.title, "Line\nBreak");
    }

    #[test]
    fn exec_with_shell_characters_round_trips() {
        // The file stores `"\$HOME"`: the backslash is doubled for the
        // entry-level escape layer, then consumed by the Exec quote layer.
        let text = "[Desktop Entry]\nName=Shell\nExec=sh -c echo \"\\\\$HOME\"\n";
        let entry = parse(text).unwrap();
        assert_eq!(entry.exec, "sh -c echo $HOME");

        let rewritten = entry.to_entry_string();
        let reparsed = parse(&rewritten).unwrap();
        assert_eq!(entry, reparsed);
        assert_eq!(reparsed.exec, "sh -c echo $HOME");
    }

    #[test]
    fn terminal_entries_get_a_launch_prefix() {
        let entry = parse("[Desktop Entry]\nName=Top\nExec=top\nTerminal=true\n").unwrap();
        assert_eq!(entry.launch_command("xterm -e"), "xterm -e top");
    }
}
