//! Build metadata that flows down the directory tree during discovery.

use std::sync::Arc;

use crate::config::Config;
use crate::gradle::VersionCatalog;

/// A bag of per-directory metadata handed to every discoverer.
///
/// The set of carried values is closed, so the bag is an explicit struct of
/// named optional fields rather than a type-keyed map. Children receive a
/// shallow copy; entries are `Arc`-shared and immutable once published.
#[derive(Clone, Default)]
pub struct BuildContext {
    pub catalog: Option<Arc<VersionCatalog>>,
    pub config: Option<Arc<Config>>,
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }
}
