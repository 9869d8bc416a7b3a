//! GTK icon cache (`icon-theme.cache`) reader.
//!
//! The cache is a packed big-endian hash table mapping icon names to the
//! theme subdirectories and image formats holding them. Reading it avoids a
//! directory walk per lookup. The file is memory-mapped read-only and every
//! multi-byte access goes through bounds-checked reads; any out-of-range
//! offset downgrades a lookup to "not found" instead of a crash.

use log::{debug, warn};
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// Cache file name within a theme directory.
const CACHE_FILE_NAME: &str = "icon-theme.cache";

/// Image flag bits stored per cache entry.
const XPM_FLAG: u16 = 1;
const SVG_FLAG: u16 = 2;
const PNG_FLAG: u16 = 4;

/// Bounds-checked view over the raw cache bytes. All reads convert from the
/// file's big-endian order to host order.
struct CacheBytes<'a>(&'a [u8]);

impl CacheBytes<'_> {
    fn read_u16(&self, offset: usize) -> Option<u16> {
        let bytes = self.0.get(offset..offset.checked_add(2)?)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.0.get(offset..offset.checked_add(4)?)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_cstr(&self, offset: usize) -> Option<&str> {
        let tail = self.0.get(offset..)?;
        let len = tail.iter().position(|b| *b == 0)?;
        std::str::from_utf8(&tail[..len]).ok()
    }
}

enum CacheData {
    Mapped(Mmap),
    #[allow(dead_code)] // test-only corruption fixtures
    Owned(Vec<u8>),
}

impl CacheData {
    fn bytes(&self) -> &[u8] {
        match self {
            CacheData::Mapped(map) => map,
            CacheData::Owned(bytes) => bytes,
        }
    }
}

/// An immutable, validated view over one theme's binary icon cache.
pub struct IconCacheIndex {
    data: CacheData,
    /// Subdirectory name table, indexed by the per-image directory index.
    directories: Vec<String>,
    /// Chain head offset per hash bucket.
    bucket_offsets: Vec<u32>,
}

impl IconCacheIndex {
    /// Opens and validates the cache file under a theme directory.
    ///
    /// Returns `None` when the file is missing, empty, older than its
    /// containing directory (stale after a theme edit), or structurally
    /// unsound. A stale or broken cache is treated as absent, not an error.
    pub fn open(theme_dir: &Path) -> Option<IconCacheIndex> {
        let cache_path = theme_dir.join(CACHE_FILE_NAME);
        let file = File::open(&cache_path).ok()?;
        let meta = file.metadata().ok()?;
        if meta.len() == 0 {
            debug!("icon cache {} is empty", cache_path.display());
            return None;
        }
        let dir_modified = std::fs::metadata(theme_dir).and_then(|m| m.modified()).ok();
        let cache_modified = meta.modified().ok();
        if let (Some(dir), Some(cache)) = (dir_modified, cache_modified) {
            if cache < dir {
                debug!("icon cache {} is out of date", cache_path.display());
                return None;
            }
        }

        // Safety: the mapping is private and read-only for this instance's
        // lifetime; concurrent file rewrites at worst corrupt lookups, which
        // the bounds checks already downgrade to "not found".
        let map = unsafe { Mmap::map(&file) }.ok()?;
        let index = Self::parse(CacheData::Mapped(map));
        if index.is_none() {
            warn!("icon cache {} failed validation", cache_path.display());
        }
        index
    }

    /// Builds an index from an in-memory buffer. Used by tests to exercise
    /// truncated and corrupted cache data without touching the filesystem.
    #[allow(dead_code)]
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Option<IconCacheIndex> {
        Self::parse(CacheData::Owned(bytes))
    }

    fn parse(data: CacheData) -> Option<IconCacheIndex> {
        let bytes = CacheBytes(data.bytes());
        let major = bytes.read_u16(0)?;
        if major != 1 && major != 2 {
            debug!("unsupported icon cache major version {major}");
            return None;
        }
        let hash_offset = bytes.read_u32(4)? as usize;
        let dir_list_offset = bytes.read_u32(8)? as usize;

        let dir_count = bytes.read_u32(dir_list_offset)? as usize;
        if dir_count > data.bytes().len() / 4 {
            return None;
        }
        let mut directories = Vec::with_capacity(dir_count);
        for i in 0..dir_count {
            let name_offset = bytes.read_u32(dir_list_offset + 4 + i * 4)? as usize;
            directories.push(bytes.read_cstr(name_offset)?.to_string());
        }

        let bucket_count = bytes.read_u32(hash_offset)? as usize;
        if bucket_count == 0 || bucket_count > data.bytes().len() / 4 {
            return None;
        }
        let mut bucket_offsets = Vec::with_capacity(bucket_count);
        for i in 0..bucket_count {
            bucket_offsets.push(bytes.read_u32(hash_offset + 4 + i * 4)?);
        }

        if directories.is_empty() {
            return None;
        }
        Some(IconCacheIndex {
            data,
            directories,
            bucket_offsets,
        })
    }

    /// The icon-name hash used by the cache format.
    fn hash_value(&self, icon_name: &str) -> usize {
        let mut hash = 0u32;
        for (i, byte) in icon_name.bytes().enumerate() {
            if i == 0 {
                hash = byte as u32;
            } else {
                hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(byte as u32);
            }
        }
        hash as usize % self.bucket_offsets.len()
    }

    /// Looks up an icon name, returning a map from theme subdirectory path
    /// to the image file extension stored there. Empty when the name is not
    /// in the cache or the chain walk hits corrupted data.
    pub fn lookup_icon(&self, icon_name: &str) -> HashMap<String, String> {
        let mut matches = HashMap::new();
        if icon_name.is_empty() {
            return matches;
        }
        let bytes = CacheBytes(self.data.bytes());
        let file_len = self.data.bytes().len() as u32;
        // A chain node takes 12 bytes, so any honest chain is shorter than
        // this; a cyclic or garbage chain gets cut off instead of looping.
        let max_nodes = (file_len / 12) + 1;

        let mut offset = self.bucket_offsets[self.hash_value(icon_name)];
        let mut visited = 0;
        while offset > 0 && offset < file_len && visited < max_nodes {
            visited += 1;
            let node = offset as usize;
            let Some(name_offset) = bytes.read_u32(node + 4) else {
                return matches;
            };
            let Some(name) = bytes.read_cstr(name_offset as usize) else {
                return matches;
            };
            if name == icon_name {
                let Some(image_list_offset) = bytes.read_u32(node + 8) else {
                    return matches;
                };
                self.read_image_list(&bytes, image_list_offset as usize, &mut matches);
                return matches;
            }
            match bytes.read_u32(node) {
                Some(next) => offset = next,
                None => return matches,
            }
        }
        matches
    }

    fn read_image_list(
        &self,
        bytes: &CacheBytes<'_>,
        list_offset: usize,
        matches: &mut HashMap<String, String>,
    ) {
        let Some(image_count) = bytes.read_u32(list_offset) else {
            return;
        };
        for i in 0..image_count as usize {
            // 8 bytes per image: directory index, format flags, data offset.
            let image = list_offset + 4 + i * 8;
            let (Some(dir_index), Some(flags)) =
                (bytes.read_u16(image), bytes.read_u16(image + 2))
            else {
                return;
            };
            let Some(directory) = self.directories.get(dir_index as usize) else {
                continue;
            };
            // Only png results are selected; svg rendering of theme icons is
            // unreliable and xpm support is vestigial.
            if flags & PNG_FLAG != 0 {
                matches.insert(directory.clone(), ".png".to_string());
            } else if flags & (SVG_FLAG | XPM_FLAG) != 0 {
                debug!("skipping non-png cache entry for {directory}");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a minimal valid v1 cache buffer holding the given icons, each
    /// present (as png) in every listed directory.
    pub(crate) fn build_cache(directories: &[&str], icons: &[&str]) -> Vec<u8> {
        let mut buf = vec![0u8; 12]; // header, offsets patched below
        buf[0..2].copy_from_slice(&1u16.to_be_bytes());

        let mut string_offsets = HashMap::new();
        let mut strings = Vec::new();
        for name in directories.iter().chain(icons.iter()) {
            strings.push(name.to_string());
        }
        for s in &strings {
            string_offsets.insert(s.clone(), buf.len() as u32);
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
        }

        let dir_list_offset = buf.len() as u32;
        buf.extend_from_slice(&(directories.len() as u32).to_be_bytes());
        for dir in directories {
            buf.extend_from_slice(&string_offsets[*dir].to_be_bytes());
        }

        // One image-list per icon, listing every directory.
        let mut image_list_offsets = Vec::new();
        for _ in icons {
            image_list_offsets.push(buf.len() as u32);
            buf.extend_from_slice(&(directories.len() as u32).to_be_bytes());
            for dir_index in 0..directories.len() as u16 {
                buf.extend_from_slice(&dir_index.to_be_bytes());
                buf.extend_from_slice(&PNG_FLAG.to_be_bytes());
                buf.extend_from_slice(&0u32.to_be_bytes());
            }
        }

        // Single-bucket hash table chaining every icon node.
        let node_size = 12;
        let hash_offset = buf.len() as u32;
        let first_node = hash_offset + 8;
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&first_node.to_be_bytes());
        for (i, icon) in icons.iter().enumerate() {
            let next = if i + 1 < icons.len() {
                first_node + ((i as u32 + 1) * node_size)
            } else {
                0
            };
            buf.extend_from_slice(&next.to_be_bytes());
            buf.extend_from_slice(&string_offsets[*icon].to_be_bytes());
            buf.extend_from_slice(&image_list_offsets[i].to_be_bytes());
        }

        buf[4..8].copy_from_slice(&hash_offset.to_be_bytes());
        buf[8..12].copy_from_slice(&dir_list_offset.to_be_bytes());
        buf
    }

    #[test]
    fn finds_cached_icons() {
        let cache = IconCacheIndex::from_bytes(build_cache(
            &["48x48/apps", "scalable/apps"],
            &["firefox", "thunderbird"],
        ))
        .unwrap();

        let matches = cache.lookup_icon("firefox");
        assert_eq!(matches.get("48x48/apps").map(String::as_str), Some(".png"));
        assert_eq!(matches.len(), 2);
        assert!(!cache.lookup_icon("thunderbird").is_empty());
    }

    #[test]
    fn missing_icons_return_empty() {
        let cache =
            IconCacheIndex::from_bytes(build_cache(&["48x48/apps"], &["firefox"])).unwrap();
        assert!(cache.lookup_icon("nonexistent").is_empty());
        assert!(cache.lookup_icon("").is_empty());
    }

    #[test]
    fn truncated_buffers_are_invalid() {
        let full = build_cache(&["48x48/apps"], &["firefox"]);
        for len in [0, 4, 11, full.len() / 2] {
            assert!(IconCacheIndex::from_bytes(full[..len].to_vec()).is_none());
        }
    }

    #[test]
    fn corrupt_offsets_never_panic() {
        let clean = build_cache(&["48x48/apps"], &["firefox"]);
        // Fuzz every u32-aligned offset field with out-of-range values.
        for position in (0..clean.len().saturating_sub(4)).step_by(4) {
            for garbage in [u32::MAX, clean.len() as u32, clean.len() as u32 + 1] {
                let mut corrupted = clean.clone();
                corrupted[position..position + 4].copy_from_slice(&garbage.to_be_bytes());
                if let Some(cache) = IconCacheIndex::from_bytes(corrupted) {
                    let _ = cache.lookup_icon("firefox");
                    let _ = cache.lookup_icon("nonexistent");
                }
            }
        }
    }

    #[test]
    fn cyclic_chains_terminate() {
        let mut buf = build_cache(&["48x48/apps"], &["firefox"]);
        // Point the node's next-offset back at itself.
        let node_offset = buf.len() - 12;
        let self_ref = (node_offset as u32).to_be_bytes();
        buf[node_offset..node_offset + 4].copy_from_slice(&self_ref);
        let cache = IconCacheIndex::from_bytes(buf).unwrap();
        // The looped chain holds a different hash's name; must end quietly.
        assert!(cache.lookup_icon("other-icon").is_empty());
    }
}
