//! Asynchronous icon resolution.
//!
//! Requests name an icon plus a size, scale, and context; the resolver
//! answers twice: a placeholder immediately (the UI never blocks on disk),
//! then the resolved image once its worker has searched the theme chain.
//! Resolved images are cached by bare name and never evicted; the cache is
//! bounded by the number of distinct icon names a menu can show.
//!
//! Search order per job: image cache, the active theme, each inherited
//! theme in declared order, the hicolor fallback, a hyphen-stripped retry
//! ("app-dev" falls back to "app"), and finally the un-themed icon
//! directories.

use crate::paths;
use crate::theme::{IconContext, IconThemeIndex};
use crossbeam_channel::Sender;
use log::{debug, warn};
use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

/// Smallest valid PNG (1x1 transparent pixel), delivered while a lookup is
/// in flight and kept when a lookup fails outright.
const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x62, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

new_key_type! {
    /// Handle for an in-flight icon request.
    pub struct RequestId;
}

/// A resolved icon: the file it came from and its raw bytes.
///
/// Rasterization is the consumer's concern; the bytes are handed over
/// undecoded. Cloning is cheap, the byte buffer is shared.
#[derive(Clone, Debug)]
pub struct IconImage {
    path: PathBuf,
    bytes: Arc<[u8]>,
}

impl IconImage {
    fn placeholder() -> IconImage {
        IconImage {
            path: PathBuf::new(),
            bytes: Arc::from(PLACEHOLDER_PNG),
        }
    }

    fn load(path: &Path) -> Option<IconImage> {
        let bytes = fs::read(path).ok()?;
        Some(IconImage {
            path: path.to_path_buf(),
            bytes: bytes.into(),
        })
    }

    /// Source file path; empty for the placeholder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_placeholder(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}

type IconCallback = Box<dyn Fn(IconImage) + Send>;

struct IconJob {
    name: String,
    size: i32,
    scale: i32,
    context: IconContext,
    request: RequestId,
}

struct ResolverShared {
    /// Active theme first, then inherited themes in declared order, ending
    /// with the hicolor fallback.
    themes: Vec<IconThemeIndex>,
    /// Un-themed directories scanned when every theme fails.
    fallback_dirs: Vec<PathBuf>,
    /// Resolved images by bare icon name. Append-only.
    image_cache: RwLock<HashMap<String, IconImage>>,
    callbacks: Mutex<SlotMap<RequestId, IconCallback>>,
    placeholder: IconImage,
}

/// Background icon resolver over an ordered icon theme list.
///
/// Constructed once from the discovered search paths and shared by handle;
/// there is no process-wide instance. Callbacks run on the resolver's
/// worker thread (or synchronously on the caller for cache hits and
/// absolute paths).
pub struct IconResolver {
    shared: Arc<ResolverShared>,
    worker: Mutex<Option<Sender<IconJob>>>,
}

impl IconResolver {
    /// Discovers themes from GTK settings and the XDG icon directories.
    pub fn new() -> IconResolver {
        Self::with_search(paths::icon_base_directories(), paths::icon_theme_names())
    }

    /// Builds the theme list by resolving `theme_names` against `base_dirs`,
    /// splicing each theme's inherited themes in after it. The same
    /// directories double as the un-themed fallback list.
    pub fn with_search(base_dirs: Vec<PathBuf>, theme_names: Vec<String>) -> IconResolver {
        let mut names = theme_names;
        let mut themes = Vec::new();
        let mut i = 0;
        while i < names.len() {
            for base in &base_dirs {
                let theme_dir = base.join(&names[i]);
                if !theme_dir.is_dir() {
                    continue;
                }
                let Some(theme) = IconThemeIndex::open(&theme_dir) else {
                    debug!("no usable theme index in {}", theme_dir.display());
                    continue;
                };
                let mut insert_at = i + 1;
                for parent in theme.inherited_themes() {
                    if !names.contains(parent) {
                        names.insert(insert_at, parent.clone());
                        insert_at += 1;
                    }
                }
                themes.push(theme);
                break;
            }
            i += 1;
        }
        debug!("icon resolver using {} themes", themes.len());

        IconResolver {
            shared: Arc::new(ResolverShared {
                themes,
                fallback_dirs: base_dirs,
                image_cache: RwLock::new(HashMap::new()),
                callbacks: Mutex::new(SlotMap::with_key()),
                placeholder: IconImage::placeholder(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Requests an icon by name or absolute path.
    ///
    /// Absolute paths and cache hits are answered synchronously with the
    /// final image and return `None`. Otherwise the callback first receives
    /// the placeholder, the job is queued, and the returned handle can
    /// withdraw the final delivery via [`cancel`](Self::cancel).
    pub fn request(
        &self,
        name: &str,
        size: i32,
        scale: i32,
        context: IconContext,
        callback: impl Fn(IconImage) + Send + 'static,
    ) -> Option<RequestId> {
        if name.is_empty() {
            callback(self.shared.placeholder.clone());
            return None;
        }
        if name.starts_with('/') {
            // Absolute paths bypass theme search entirely.
            match IconImage::load(Path::new(name)) {
                Some(image) => callback(image),
                None => {
                    warn!("failed to load icon file {name}");
                    callback(self.shared.placeholder.clone());
                }
            }
            return None;
        }

        // Partial paths are searched by their final component.
        let bare_name = name.rsplit('/').next().unwrap_or(name).to_string();
        if let Some(image) = self.cached_icon(&bare_name) {
            callback(image);
            return None;
        }

        callback(self.shared.placeholder.clone());
        let request = self
            .shared
            .callbacks
            .lock()
            .unwrap()
            .insert(Box::new(callback));
        self.enqueue(IconJob {
            name: bare_name,
            size,
            scale,
            context,
            request,
        });
        Some(request)
    }

    /// Withdraws the final delivery of a pending request. The placeholder
    /// already delivered remains the result.
    pub fn cancel(&self, id: RequestId) {
        self.shared.callbacks.lock().unwrap().remove(id);
    }

    /// Synchronous image-cache probe by bare icon name.
    pub fn cached_icon(&self, name: &str) -> Option<IconImage> {
        self.shared.image_cache.read().unwrap().get(name).cloned()
    }

    fn enqueue(&self, job: IconJob) {
        let mut worker = self.worker.lock().unwrap();
        let sender = worker.get_or_insert_with(|| {
            let (tx, rx) = crossbeam_channel::unbounded::<IconJob>();
            let shared = Arc::clone(&self.shared);
            thread::Builder::new()
                .name("icon-resolver".to_string())
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        process_job(&shared, job);
                    }
                })
                .expect("failed to spawn icon resolver thread");
            tx
        });
        let _ = sender.send(job);
    }
}

impl Default for IconResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves one dequeued job and delivers its result, if the request has
/// not been cancelled. Total failure leaves the placeholder standing; no
/// error is delivered.
fn process_job(shared: &ResolverShared, job: IconJob) {
    let cached = shared.image_cache.read().unwrap().get(&job.name).cloned();
    let image = cached.or_else(|| {
        let path = find_icon_path(shared, &job.name, job.size, job.context, job.scale)?;
        let image = IconImage::load(&path)?;
        shared
            .image_cache
            .write()
            .unwrap()
            .insert(job.name.clone(), image.clone());
        Some(image)
    });

    let Some(callback) = shared.callbacks.lock().unwrap().remove(job.request) else {
        return; // cancelled while queued
    };
    match image {
        Some(image) => callback(image),
        None => debug!("no icon found for {}", job.name),
    }
}

/// Theme-chain search with hyphen fallback and the final un-themed scan.
fn find_icon_path(
    shared: &ResolverShared,
    name: &str,
    size: i32,
    context: IconContext,
    scale: i32,
) -> Option<PathBuf> {
    for theme in &shared.themes {
        if let Some(path) = theme.lookup_icon(name, size, context, scale) {
            return Some(path);
        }
    }

    // A hyphenated name falls back to its more generic prefix, except for
    // application icons, whose hyphens are part of the app name.
    if context != IconContext::Applications {
        if let Some((prefix, _)) = name.rsplit_once('-') {
            if let Some(path) = find_icon_path(shared, prefix, size, context, scale) {
                return Some(path);
            }
        }
    }

    for dir in &shared.fallback_dirs {
        let candidate = dir.join(format!("{name}.png"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
