//! Icon theme index parsing and per-theme icon lookup.
//!
//! Each theme directory carries an `index.theme` describing its icon
//! subdirectories (size, scale, context, and size-matching rules) and
//! optionally a binary `icon-theme.cache`. Lookups prefer the cache; a valid
//! cache that lacks an icon is authoritative, so no directory scan follows.
//! Searching inherited themes is the caller's job.

pub mod cache;

use crate::error::{Error, Result};
use cache::IconCacheIndex;
use log::{debug, warn};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

const INDEX_FILE_NAME: &str = "index.theme";
const THEME_SECTION: &str = "Icon Theme";

/// Default image extension when the cache doesn't report one.
const DEFAULT_EXTENSION: &str = ".png";

/// The purpose an icon directory serves, used to prune lookups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IconContext {
    Actions,
    Animations,
    Applications,
    Categories,
    Devices,
    Emblems,
    Emotes,
    International,
    MimeTypes,
    Places,
    Status,
    /// Missing or unexpected context value; matches any requested context.
    #[default]
    Unknown,
}

impl IconContext {
    fn parse(value: &str) -> IconContext {
        match value {
            "Actions" => IconContext::Actions,
            "Animations" => IconContext::Animations,
            "Applications" => IconContext::Applications,
            "Categories" => IconContext::Categories,
            "Devices" => IconContext::Devices,
            "Emblems" => IconContext::Emblems,
            "Emotes" => IconContext::Emotes,
            "International" => IconContext::International,
            "MimeTypes" => IconContext::MimeTypes,
            "Places" => IconContext::Places,
            "Status" => IconContext::Status,
            _ => IconContext::Unknown,
        }
    }
}

/// How a directory's icons relate to the size they are used at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SizeKind {
    /// Icons usable only at exactly their nominal size.
    Fixed,
    /// Icons scalable to anything within [min_size, max_size].
    Scalable,
    /// Icons usable when the requested size is within `threshold` of nominal.
    #[default]
    Threshold,
}

/// One icon subdirectory declared by a theme index.
#[derive(Clone, Debug)]
pub struct IconDirectory {
    /// Path relative to the theme directory.
    pub path: String,
    pub size: i32,
    pub scale: i32,
    pub context: IconContext,
    pub kind: SizeKind,
    pub min_size: i32,
    pub max_size: i32,
    pub threshold: i32,
}

impl IconDirectory {
    fn new(path: &str) -> IconDirectory {
        IconDirectory {
            path: path.to_string(),
            size: -1,
            scale: 1,
            context: IconContext::Unknown,
            kind: SizeKind::Threshold,
            min_size: -1,
            max_size: -1,
            threshold: 2,
        }
    }

    /// Whether this directory is an exact match for a size and scale.
    fn matches_size(&self, size: i32, scale: i32) -> bool {
        if self.scale != scale {
            return false;
        }
        match self.kind {
            SizeKind::Fixed => self.size == size,
            SizeKind::Scalable => size >= self.min_size && size <= self.max_size,
            SizeKind::Threshold => (size - self.size).abs() < self.threshold,
        }
    }

    /// Distance between this directory's scaled size range and a request.
    fn size_distance(&self, size: i32, scale: i32) -> i32 {
        let requested = size * scale;
        match self.kind {
            SizeKind::Fixed => (self.size * self.scale - requested).abs(),
            SizeKind::Scalable => {
                if requested < self.min_size * self.scale {
                    self.min_size * self.scale - requested
                } else if requested > self.max_size * self.scale {
                    requested - self.max_size * self.scale
                } else {
                    0
                }
            }
            SizeKind::Threshold => {
                if requested < (self.size - self.threshold) * self.scale {
                    (self.size - self.threshold) * self.scale - requested
                } else if requested > (self.size + self.threshold) * self.scale {
                    requested - (self.size + self.threshold) * self.scale
                } else {
                    0
                }
            }
        }
    }
}

/// One icon theme's parsed `index.theme` plus its optional binary cache.
pub struct IconThemeIndex {
    path: PathBuf,
    name: String,
    comment: String,
    inherited: Vec<String>,
    hidden: bool,
    example: String,
    /// Directories in declaration order; ties in lookup scoring keep it.
    directories: Vec<IconDirectory>,
    cache: Option<IconCacheIndex>,
}

impl IconThemeIndex {
    /// Parses the theme index under a theme directory. `None` when the
    /// directory holds no readable `index.theme`.
    pub fn open(theme_dir: &Path) -> Option<IconThemeIndex> {
        let index_path = theme_dir.join(INDEX_FILE_NAME);
        let text = match fs::read_to_string(&index_path) {
            Ok(text) => text,
            Err(_) => {
                debug!("no theme index at {}", index_path.display());
                return None;
            }
        };
        match Self::parse(&text, theme_dir) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!("skipping malformed theme index {}: {e}", index_path.display());
                None
            }
        }
    }

    fn parse(text: &str, theme_dir: &Path) -> Result<IconThemeIndex> {
        let mut index = IconThemeIndex {
            path: theme_dir.to_path_buf(),
            name: String::new(),
            comment: String::new(),
            inherited: Vec::new(),
            hidden: false,
            example: String::new(),
            directories: Vec::new(),
            cache: IconCacheIndex::open(theme_dir),
        };
        let mut section = String::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].to_string();
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::Format(line.to_string()));
            };
            let (key, value) = (key.trim(), value.trim());

            if section == THEME_SECTION {
                match key {
                    "Name" => index.name = value.to_string(),
                    "Comment" => index.comment = value.to_string(),
                    "Inherits" => {
                        index.inherited = value
                            .split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect();
                    }
                    "Directories" | "ScaledDirectories" => {
                        for dir in value.split(',') {
                            let dir = dir.trim();
                            if !dir.is_empty() && index.directory_index(dir).is_none() {
                                index.directories.push(IconDirectory::new(dir));
                            }
                        }
                    }
                    "Hidden" => index.hidden = value == "true",
                    "Example" => index.example = value.to_string(),
                    _ => {}
                }
            } else if !section.is_empty() {
                index.apply_directory_value(&section, key, value);
            }
        }

        if index.name.is_empty() {
            return Err(Error::file(theme_dir, "theme index declares no name"));
        }
        Ok(index)
    }

    fn directory_index(&self, path: &str) -> Option<usize> {
        self.directories.iter().position(|dir| dir.path == path)
    }

    fn apply_directory_value(&mut self, section: &str, key: &str, value: &str) {
        let position = match self.directory_index(section) {
            Some(position) => position,
            None => {
                // Sections may appear before (or without) a Directories entry.
                self.directories.push(IconDirectory::new(section));
                self.directories.len() - 1
            }
        };
        let dir = &mut self.directories[position];
        let int_value = || {
            value.parse::<i32>().map_err(|_| {
                debug!("ignoring non-numeric {key} value {value:?} in {section}");
            })
        };
        match key {
            "Size" => {
                if let Ok(v) = int_value() {
                    dir.size = v;
                    if dir.min_size < 0 {
                        dir.min_size = v;
                    }
                    if dir.max_size < 0 {
                        dir.max_size = v;
                    }
                }
            }
            "Scale" => {
                if let Ok(v) = int_value() {
                    dir.scale = v;
                }
            }
            "MinSize" => {
                if let Ok(v) = int_value() {
                    dir.min_size = v;
                }
            }
            "MaxSize" => {
                if let Ok(v) = int_value() {
                    dir.max_size = v;
                }
            }
            "Threshold" => {
                if let Ok(v) = int_value() {
                    dir.threshold = v;
                }
            }
            "Context" => dir.context = IconContext::parse(value),
            "Type" => {
                dir.kind = match value {
                    "Fixed" => SizeKind::Fixed,
                    "Scalable" => SizeKind::Scalable,
                    "Threshold" => SizeKind::Threshold,
                    other => {
                        debug!("ignoring unknown directory type {other:?} in {section}");
                        dir.kind
                    }
                };
            }
            _ => {}
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Themes to search, in order, when a lookup in this theme fails.
    pub fn inherited_themes(&self) -> &[String] {
        &self.inherited
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// An icon name that shows off this theme in theme pickers.
    pub fn example_icon(&self) -> &str {
        &self.example
    }

    pub fn directory(&self) -> &Path {
        &self.path
    }

    /// Finds the path of an icon within this theme only.
    ///
    /// `IconContext::Unknown` requests search every context. Returns `None`
    /// when the theme holds no match; the caller is responsible for trying
    /// inherited themes next.
    pub fn lookup_icon(
        &self,
        icon_name: &str,
        size: i32,
        context: IconContext,
        scale: i32,
    ) -> Option<PathBuf> {
        let cache_matches = self.cache.as_ref().map(|cache| cache.lookup_icon(icon_name));

        let mut candidates: Vec<&IconDirectory> = match &cache_matches {
            Some(matches) if matches.is_empty() => {
                // A valid cache without the icon is definitive for this theme.
                return None;
            }
            Some(matches) => {
                // Filter the declaration-order directory list rather than
                // iterating the match map, so exact-match ties keep their
                // index order.
                let dirs: Vec<&IconDirectory> = self
                    .directories
                    .iter()
                    .filter(|dir| matches.contains_key(&dir.path))
                    .collect();
                if dirs.len() < matches.len() {
                    warn!("icon cache for {} names directories missing from its index", self.name);
                }
                dirs
            }
            None => self
                .directories
                .iter()
                .filter(|dir| context == IconContext::Unknown || dir.context == context)
                .collect(),
        };

        candidates.sort_by(|a, b| {
            match (a.matches_size(size, scale), b.matches_size(size, scale)) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => a
                    .size_distance(size, scale)
                    .cmp(&b.size_distance(size, scale)),
            }
        });

        for dir in candidates {
            let stem = self.path.join(&dir.path).join(icon_name);
            if let Some(extension) = cache_matches.as_ref().and_then(|m| m.get(&dir.path)) {
                let cached = with_extension(&stem, extension);
                if cached.is_file() {
                    return Some(cached);
                }
                debug!("stale cache result {}", cached.display());
            }
            let fallback = with_extension(&stem, DEFAULT_EXTENSION);
            if fallback.is_file() {
                return Some(fallback);
            }
        }
        None
    }
}

/// Appends an extension (given with its leading dot) to a path stem.
fn with_extension(stem: &Path, extension: &str) -> PathBuf {
    let mut path = stem.as_os_str().to_os_string();
    path.push(extension);
    PathBuf::from(path)
}
