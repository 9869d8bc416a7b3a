//! appdex: desktop application catalog and icon theme resolver for Linux
//! launchers.
//!
//! Provides the data layer a launcher UI sits on:
//! - .desktop file parsing with locale selection, validation, and
//!   round-trip serialization
//! - An incremental background loader that diffs the application
//!   directories and reports added/changed/removed entries
//! - Icon theme index parsing with inheritance and GTK icon-cache support
//! - Asynchronous icon resolution with an in-memory image cache
//!
//! There is no process-wide instance; construct an [`EntryLoader`] and an
//! [`IconResolver`] and share them by handle.

mod error;
mod loader;
mod paths;
mod resolver;

pub mod entry;
pub mod theme;

pub use error::{Error, Result};
pub use loader::{
    ALL_CATEGORY, CallbackId, ChangeRecord, EntryLoader, ListenerId, MISC_CATEGORY,
};
pub use resolver::{IconImage, IconResolver, RequestId};

pub use entry::{EntryType, MenuEntry, ParseContext};
pub use theme::{IconContext, IconThemeIndex};
