//! Desktop entry loading, categorization, and change notification.
//!
//! The loader owns the entry table and category index, both guarded by one
//! read/write lock. A scan cycle runs on a background worker as an explicit
//! sequence of steps (diff, then one file load per step, then notify), and
//! the write lock is released between file loads so readers are never
//! starved by a long scan.

use crate::entry::{MenuEntry, ParseContext};
use crate::error::Result;
use crate::paths;
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use slotmap::{SlotMap, new_key_type};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::SystemTime;

/// Synthetic category holding every displayable entry.
pub const ALL_CATEGORY: &str = "All";

/// Synthetic category for entries that declare no category of their own.
pub const MISC_CATEGORY: &str = "Other";

const ENTRY_EXTENSION: &str = "desktop";

new_key_type! {
    /// Handle for a pending one-shot callback.
    pub struct CallbackId;
    /// Handle for a registered change listener.
    pub struct ListenerId;
}

/// All entry changes accumulated over one scan cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeRecord {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeRecord {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Callback fired once when a scan cycle completes. `Sync` because the
/// registry lives inside the state `RwLock`, whose contents must be
/// shareable across the worker and caller threads.
type ScanCallback = Box<dyn FnOnce(&ChangeRecord) + Send + Sync>;
/// Callback fired once when the loader becomes (or already is) idle.
type FinishCallback = Box<dyn FnOnce() + Send + Sync>;
/// Persistent listener receiving every non-empty change record.
type ChangeListener = Arc<dyn Fn(&ChangeRecord) + Send + Sync>;

enum PendingCallback {
    Scan(ScanCallback),
    Finish(FinishCallback),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Idle,
    Scanning,
    Draining,
    Notifying,
}

#[derive(Default)]
struct LoaderState {
    /// Displayable entries by desktop file ID.
    entries: HashMap<String, MenuEntry>,
    /// Category name to ordered entry-ID set.
    categories: HashMap<String, BTreeSet<String>>,
    /// Every entry file seen by the last scan, displayable or not, so a
    /// later edit that re-enables an entry is detected as a change.
    entry_files: HashMap<String, PathBuf>,
    last_scan: Option<SystemTime>,
    phase: Phase,
    pending_files: VecDeque<(String, PathBuf)>,
    added: Vec<String>,
    changed: Vec<String>,
    removed: Vec<String>,
    callbacks: SlotMap<CallbackId, PendingCallback>,
    listeners: SlotMap<ListenerId, ChangeListener>,
}

impl LoaderState {
    fn remove_from_categories(&mut self, id: &str) {
        self.categories.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
    }

    fn insert_into_categories(&mut self, entry: &MenuEntry) {
        let mut names: Vec<&str> = entry.categories.iter().map(String::as_str).collect();
        if names.is_empty() {
            names.push(MISC_CATEGORY);
        }
        names.push(ALL_CATEGORY);
        for name in names {
            self.categories
                .entry(name.to_string())
                .or_default()
                .insert(entry.id.clone());
        }
    }

    fn purge_entry(&mut self, id: &str) {
        self.entries.remove(id);
        self.remove_from_categories(id);
    }
}

struct LoaderShared {
    directories: Vec<PathBuf>,
    ctx: ParseContext,
    state: RwLock<LoaderState>,
}

/// Background loader for desktop entry files.
///
/// Scans the standard application directories, diffs against the previous
/// scan, and exposes the resulting entries through category lookups. Change
/// notifications and scan-completion callbacks run on the loader's worker
/// thread; forward them through a channel if thread affinity matters.
pub struct EntryLoader {
    shared: Arc<LoaderShared>,
    worker: Mutex<Option<Sender<()>>>,
}

impl EntryLoader {
    /// Creates a loader over the standard XDG application directories.
    pub fn new() -> EntryLoader {
        Self::with_directories(paths::application_directories(), ParseContext::from_env())
    }

    /// Creates a loader over an explicit directory list, highest priority
    /// first. Used directly by tests.
    pub fn with_directories(directories: Vec<PathBuf>, ctx: ParseContext) -> EntryLoader {
        EntryLoader {
            shared: Arc::new(LoaderShared {
                directories,
                ctx,
                state: RwLock::new(LoaderState::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Starts a scan cycle unless one is already running, and registers a
    /// callback to fire once with the cycle's accumulated changes.
    ///
    /// Callbacks registered while a cycle is in flight fire at the end of
    /// that cycle; they never fire early and never more than once.
    pub fn scan_for_changes(
        &self,
        on_changes_ready: impl FnOnce(&ChangeRecord) + Send + Sync + 'static,
    ) -> CallbackId {
        let id = {
            let mut state = self.shared.state.write().unwrap();
            let id = state
                .callbacks
                .insert(PendingCallback::Scan(Box::new(on_changes_ready)));
            if state.phase == Phase::Idle {
                state.phase = Phase::Scanning;
            } else {
                return id; // in-flight cycle will deliver it
            }
            id
        };
        self.wake_worker();
        id
    }

    /// Starts a scan cycle without waiting on its result.
    pub fn request_scan(&self) {
        let started = {
            let mut state = self.shared.state.write().unwrap();
            if state.phase == Phase::Idle {
                state.phase = Phase::Scanning;
                true
            } else {
                false
            }
        };
        if started {
            self.wake_worker();
        }
    }

    /// Runs a callback once the loader is idle: synchronously when no cycle
    /// is in flight, otherwise after the running cycle's notifications.
    pub fn wait_until_loaded(
        &self,
        on_finish: impl FnOnce() + Send + Sync + 'static,
    ) -> Option<CallbackId> {
        {
            let mut state = self.shared.state.write().unwrap();
            if state.phase != Phase::Idle {
                return Some(
                    state
                        .callbacks
                        .insert(PendingCallback::Finish(Box::new(on_finish))),
                );
            }
        }
        on_finish();
        None
    }

    /// Withdraws a pending callback before it fires. Has no effect on the
    /// scan itself, which always runs to completion.
    pub fn cancel_callback(&self, id: CallbackId) {
        self.shared.state.write().unwrap().callbacks.remove(id);
    }

    /// Registers a listener invoked after every scan cycle that changed
    /// anything.
    pub fn subscribe(
        &self,
        listener: impl Fn(&ChangeRecord) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared
            .state
            .write()
            .unwrap()
            .listeners
            .insert(Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.shared.state.write().unwrap().listeners.remove(id);
    }

    /// Looks up one entry by desktop file ID.
    pub fn entry(&self, id: &str) -> Option<MenuEntry> {
        self.shared.state.read().unwrap().entries.get(id).cloned()
    }

    /// All displayable entries, in unspecified order.
    pub fn all_entries(&self) -> Vec<MenuEntry> {
        let state = self.shared.state.read().unwrap();
        state.entries.values().cloned().collect()
    }

    /// Entries in one category, ordered by entry ID.
    pub fn category_entries(&self, category: &str) -> Vec<MenuEntry> {
        let state = self.shared.state.read().unwrap();
        let Some(members) = state.categories.get(category) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|id| state.entries.get(id).cloned())
            .collect()
    }

    /// Entries carrying any of the given categories, de-duplicated and
    /// ordered by entry ID.
    pub fn category_entries_any(&self, categories: &[&str]) -> Vec<MenuEntry> {
        let state = self.shared.state.read().unwrap();
        let mut ids = BTreeSet::new();
        for category in categories {
            if let Some(members) = state.categories.get(*category) {
                ids.extend(members.iter().cloned());
            }
        }
        ids.iter()
            .filter_map(|id| state.entries.get(id).cloned())
            .collect()
    }

    /// All category names currently holding entries, sorted.
    pub fn categories(&self) -> Vec<String> {
        let state = self.shared.state.read().unwrap();
        let mut names: Vec<String> = state.categories.keys().cloned().collect();
        names.sort();
        names
    }

    fn wake_worker(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_none() {
            let (tx, rx) = crossbeam_channel::unbounded::<()>();
            let shared = Arc::clone(&self.shared);
            thread::Builder::new()
                .name("entry-loader".to_string())
                .spawn(move || {
                    while rx.recv().is_ok() {
                        run_scan_cycle(&shared);
                    }
                })
                .expect("failed to spawn entry loader thread");
            *worker = Some(tx);
        }
        if let Some(tx) = worker.as_ref() {
            let _ = tx.send(());
        }
    }
}

impl Default for EntryLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one full scan cycle: diff, drain the pending file queue one file at
/// a time, then notify. Each step takes and releases the write lock, making
/// the yield points between file loads explicit.
fn run_scan_cycle(shared: &LoaderShared) {
    begin_scan(shared);
    while load_one_pending(shared) {}
    finish_cycle(shared);
}

/// Diff step: walks every application directory, records the current file
/// set, queues new or modified files, and purges removed IDs immediately.
fn begin_scan(shared: &LoaderShared) {
    let mut state = shared.state.write().unwrap();
    state.phase = Phase::Scanning;
    let last_scan = state.last_scan;
    let old_files = std::mem::take(&mut state.entry_files);

    for directory in &shared.directories {
        if !directory.is_dir() {
            continue;
        }
        let walker = walkdir::WalkDir::new(directory).follow_links(true);
        for file in walker.into_iter().filter_map(|e| e.ok()) {
            if !file.file_type().is_file()
                || file.path().extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION)
            {
                continue;
            }
            let Some(id) = entry_id(file.path(), directory) else {
                continue;
            };
            if state.entry_files.contains_key(&id) {
                continue; // duplicate ID from a lower-priority directory
            }
            let path = file.path().to_path_buf();
            let modified = file.metadata().ok().and_then(|m| m.modified().ok());
            let is_new = !old_files.contains_key(&id);
            let path_changed = old_files.get(&id).is_some_and(|old| *old != path);
            let newer = match (modified, last_scan) {
                (Some(modified), Some(last_scan)) => modified > last_scan,
                _ => true,
            };
            state.entry_files.insert(id.clone(), path.clone());
            if newer || path_changed {
                if is_new {
                    state.added.push(id.clone());
                } else {
                    state.changed.push(id.clone());
                }
                state.pending_files.push_back((id, path));
            }
        }
    }

    for id in old_files.keys() {
        if !state.entry_files.contains_key(id) {
            if state.entries.contains_key(id) {
                state.removed.push(id.clone());
            }
            state.purge_entry(id);
        }
    }

    state.last_scan = Some(SystemTime::now());
    state.phase = Phase::Draining;
    debug!(
        "scan found {} entry files, {} queued for loading",
        state.entry_files.len(),
        state.pending_files.len()
    );
}

/// Load step: parses a single queued file and updates the entry table and
/// category index. Returns false once the queue is empty. The write lock is
/// held only for the duration of one file.
fn load_one_pending(shared: &LoaderShared) -> bool {
    let mut state = shared.state.write().unwrap();
    let Some((id, path)) = state.pending_files.pop_front() else {
        state.phase = Phase::Notifying;
        return false;
    };
    match load_entry(&path, &id, &shared.ctx) {
        Ok(entry) if entry.should_display(&shared.ctx) => {
            let existed = state.entries.contains_key(&id);
            if !existed {
                // A previously hidden entry coming back counts as added.
                if let Some(at) = state.changed.iter().position(|c| *c == id) {
                    state.changed.remove(at);
                    state.added.push(id.clone());
                }
            }
            state.remove_from_categories(&id);
            state.insert_into_categories(&entry);
            state.entries.insert(id, entry);
        }
        Ok(_) => {
            // Hidden update: report removal only if the entry was visible
            // before; an entry that was never shown generates no event.
            state.added.retain(|a| *a != id);
            state.changed.retain(|c| *c != id);
            if state.entries.contains_key(&id) {
                state.removed.push(id.clone());
                state.purge_entry(&id);
            }
        }
        Err(e) => {
            warn!("skipping desktop entry {}: {e}", path.display());
            state.added.retain(|a| *a != id);
            state.changed.retain(|c| *c != id);
        }
    }
    true
}

fn load_entry(path: &Path, id: &str, ctx: &ParseContext) -> Result<MenuEntry> {
    let entry = MenuEntry::from_file(path, id, ctx)?;
    if entry.is_missing_data() {
        warn!("entry {} is missing a name or command", path.display());
    }
    Ok(entry)
}

/// Notify step: drains the one-shot callbacks and snapshots the listener
/// set under the write lock, then invokes everything with the lock released
/// so callbacks may call back into the loader.
fn finish_cycle(shared: &LoaderShared) {
    let (record, callbacks, listeners) = {
        let mut state = shared.state.write().unwrap();
        let record = ChangeRecord {
            added: std::mem::take(&mut state.added),
            changed: std::mem::take(&mut state.changed),
            removed: std::mem::take(&mut state.removed),
        };
        let callbacks: Vec<PendingCallback> =
            state.callbacks.drain().map(|(_, cb)| cb).collect();
        let listeners: Vec<ChangeListener> = state.listeners.values().cloned().collect();
        state.phase = Phase::Idle;
        (record, callbacks, listeners)
    };

    info!(
        "scan cycle complete: {} added, {} changed, {} removed",
        record.added.len(),
        record.changed.len(),
        record.removed.len()
    );
    if !record.is_empty() {
        for listener in listeners {
            listener(&record);
        }
    }
    for callback in callbacks {
        match callback {
            PendingCallback::Scan(cb) => cb(&record),
            PendingCallback::Finish(cb) => cb(),
        }
    }
}

/// Desktop file ID: the path relative to its applications directory, with
/// `/` separators regardless of platform.
fn entry_id(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::fs;
    use std::time::Duration;

    fn write_entry(dir: &Path, id: &str, name: &str, categories: &str) {
        let path = dir.join(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut text = format!("[Desktop Entry]\nType=Application\nName={name}\nExec={name}\n");
        if !categories.is_empty() {
            text.push_str(&format!("Categories={categories}\n"));
        }
        fs::write(path, text).unwrap();
    }

    fn test_loader(dirs: Vec<PathBuf>) -> EntryLoader {
        let _ = env_logger::builder().is_test(true).try_init();
        EntryLoader::with_directories(
            dirs,
            ParseContext {
                locale: String::new(),
                desktop: String::new(),
            },
        )
    }

    /// Runs one scan and blocks until its change record arrives.
    fn scan_and_wait(loader: &EntryLoader) -> ChangeRecord {
        let (tx, rx) = bounded(1);
        loader.scan_for_changes(move |record| {
            let _ = tx.send(record.clone());
        });
        rx.recv_timeout(Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn loader_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EntryLoader>();
        assert_send_sync::<LoaderShared>();
    }

    #[test]
    fn first_scan_reports_everything_as_added() {
        let tmp = tempfile::tempdir().unwrap();
        write_entry(tmp.path(), "files.desktop", "Files", "System;Utility;");
        write_entry(tmp.path(), "editor.desktop", "Editor", "");
        let loader = test_loader(vec![tmp.path().to_path_buf()]);

        let record = scan_and_wait(&loader);
        let mut added = record.added.clone();
        added.sort();
        assert_eq!(added, ["editor.desktop", "files.desktop"]);
        assert!(record.changed.is_empty() && record.removed.is_empty());
    }

    #[test]
    fn rescan_without_changes_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        write_entry(tmp.path(), "files.desktop", "Files", "");
        let loader = test_loader(vec![tmp.path().to_path_buf()]);

        assert!(!scan_and_wait(&loader).is_empty());
        assert!(scan_and_wait(&loader).is_empty());
    }

    #[test]
    fn removed_files_are_reported_and_purged() {
        let tmp = tempfile::tempdir().unwrap();
        write_entry(tmp.path(), "files.desktop", "Files", "");
        let loader = test_loader(vec![tmp.path().to_path_buf()]);
        scan_and_wait(&loader);

        fs::remove_file(tmp.path().join("files.desktop")).unwrap();
        let record = scan_and_wait(&loader);
        assert_eq!(record.removed, ["files.desktop"]);
        assert!(loader.entry("files.desktop").is_none());
        assert!(loader.category_entries(ALL_CATEGORY).is_empty());
    }

    #[test]
    fn higher_priority_directory_wins_duplicate_ids() {
        let high = tempfile::tempdir().unwrap();
        let low = tempfile::tempdir().unwrap();
        write_entry(high.path(), "app.desktop", "High Priority", "");
        write_entry(low.path(), "app.desktop", "Low Priority", "");
        let loader = test_loader(vec![high.path().to_path_buf(), low.path().to_path_buf()]);

        scan_and_wait(&loader);
        let all = loader.category_entries(ALL_CATEGORY);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "High Priority");

        // Dropping the low-priority duplicate must not report a removal.
        fs::remove_file(low.path().join("app.desktop")).unwrap();
        let record = scan_and_wait(&loader);
        assert!(record.removed.is_empty());
        assert_eq!(loader.entry("app.desktop").unwrap().title, "High Priority");
    }

    #[test]
    fn categories_cover_every_displayable_entry_exactly_once() {
        let tmp = tempfile::tempdir().unwrap();
        write_entry(tmp.path(), "web.desktop", "Web", "Network;WebBrowser;");
        write_entry(tmp.path(), "plain.desktop", "Plain", "");
        let loader = test_loader(vec![tmp.path().to_path_buf()]);
        scan_and_wait(&loader);

        let all = loader.category_entries(ALL_CATEGORY);
        assert_eq!(all.len(), 2);
        assert_eq!(loader.category_entries(MISC_CATEGORY).len(), 1);
        assert_eq!(loader.category_entries("Network").len(), 1);
        assert_eq!(loader.category_entries("WebBrowser").len(), 1);
        // Declared categories exclude "Other".
        assert!(
            loader
                .category_entries(MISC_CATEGORY)
                .iter()
                .all(|e| e.id == "plain.desktop")
        );
    }

    #[test]
    fn union_queries_deduplicate() {
        let tmp = tempfile::tempdir().unwrap();
        write_entry(tmp.path(), "web.desktop", "Web", "Network;WebBrowser;");
        let loader = test_loader(vec![tmp.path().to_path_buf()]);
        scan_and_wait(&loader);

        let both = loader.category_entries_any(&["Network", "WebBrowser"]);
        assert_eq!(both.len(), 1);
    }

    #[test]
    fn hidden_entries_are_tracked_but_invisible() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ghost.desktop");
        fs::write(
            &path,
            "[Desktop Entry]\nName=Ghost\nExec=ghost\nNoDisplay=true\n",
        )
        .unwrap();
        let loader = test_loader(vec![tmp.path().to_path_buf()]);

        // Never-shown entries generate no change events at all.
        let record = scan_and_wait(&loader);
        assert!(record.is_empty());
        assert!(loader.entry("ghost.desktop").is_none());

        // Re-enabling the entry reports it as added.
        fs::write(&path, "[Desktop Entry]\nName=Ghost\nExec=ghost\n").unwrap();
        touch_future(&path);
        let record = scan_and_wait(&loader);
        assert_eq!(record.added, ["ghost.desktop"]);

        // Hiding a visible entry reports it as removed.
        fs::write(
            &path,
            "[Desktop Entry]\nName=Ghost\nExec=ghost\nNoDisplay=true\n",
        )
        .unwrap();
        touch_future(&path);
        let record = scan_and_wait(&loader);
        assert_eq!(record.removed, ["ghost.desktop"]);
    }

    #[test]
    fn malformed_files_are_skipped_without_aborting_the_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        write_entry(tmp.path(), "good.desktop", "Good", "");
        fs::write(tmp.path().join("bad.desktop"), "no header at all\n").unwrap();
        let loader = test_loader(vec![tmp.path().to_path_buf()]);

        let record = scan_and_wait(&loader);
        assert_eq!(record.added, ["good.desktop"]);
        assert!(loader.entry("good.desktop").is_some());
    }

    #[test]
    fn wait_until_loaded_is_synchronous_when_idle() {
        let loader = test_loader(vec![]);
        let (tx, rx) = bounded(1);
        let pending = loader.wait_until_loaded(move || {
            let _ = tx.send(());
        });
        assert!(pending.is_none());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn cancelled_callbacks_never_fire() {
        let tmp = tempfile::tempdir().unwrap();
        write_entry(tmp.path(), "app.desktop", "App", "");
        let loader = test_loader(vec![tmp.path().to_path_buf()]);

        // Mark a cycle as in flight so registration only queues the
        // callback, then drive the cycle inline for determinism.
        loader.shared.state.write().unwrap().phase = Phase::Scanning;
        let (tx, rx) = bounded(1);
        let id = loader.scan_for_changes(move |_| {
            let _ = tx.send(());
        });
        loader.cancel_callback(id);
        run_scan_cycle(&loader.shared);
        assert!(rx.try_recv().is_err());
        assert!(loader.entry("app.desktop").is_some());
    }

    #[test]
    fn listeners_receive_changes_until_unsubscribed() {
        let tmp = tempfile::tempdir().unwrap();
        write_entry(tmp.path(), "app.desktop", "App", "");
        let loader = test_loader(vec![tmp.path().to_path_buf()]);

        let (tx, rx) = bounded(8);
        let id = loader.subscribe(move |record: &ChangeRecord| {
            let _ = tx.send(record.clone());
        });
        scan_and_wait(&loader);
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap().added.len(), 1);

        loader.unsubscribe(id);
        write_entry(tmp.path(), "two.desktop", "Two", "");
        touch_future(&tmp.path().join("two.desktop"));
        scan_and_wait(&loader);
        assert!(rx.try_recv().is_err());
    }

    /// Pushes a file's mtime past the loader's last scan timestamp, so the
    /// next scan sees it as modified without the test having to sleep.
    fn touch_future(path: &Path) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        let future = SystemTime::now() + Duration::from_secs(5);
        file.set_modified(future).unwrap();
    }
}
