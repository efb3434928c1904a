//! Persistent content index and query engine for markdown vaults.
//!
//! Open a [`VaultIndex`] on a vault root, keep it current with
//! [`VaultIndex::refresh`] or a [`VaultWatcher`], and query it with
//! [`VaultIndex::search`], [`VaultIndex::search_by_property`] and
//! [`VaultIndex::search_by_regex`]. [`VaultIndex::search_by_date`] finds
//! notes by creation or modification day.

pub mod config;
pub mod error;
pub mod frontmatter;
pub mod search;
pub mod validation;

pub use config::{IndexConfig, RegexTuning};
pub use error::{IndexError, Result};
pub use search::parser::QueryDialect;
pub use search::refresh::{Freshness, RefreshReport, RefreshTaskState};
pub use search::regex_search::RegexFlags;
pub use search::results::{
    DateHit, DateSearchResponse, RegexFileResult, RegexMatch, RegexSearchResponse, SearchHit, SearchResponse,
};
pub use search::store::StoreKind;
pub use search::watcher::VaultWatcher;
pub use search::{IndexStats, NoteEntry, VaultIndex};
