//! # Registry Module
//!
//! The process-wide catalog of loaded spiders.
//!
//! ## Overview
//!
//! Spider definitions come from independent authors who never coordinate
//! names, so the registry resolves collisions itself: the second spider
//! named `Gold` becomes `Gold(2)`, the third `Gold(3)`, and so on. The
//! rename happens before insertion, so a name returned by the registry is
//! always the name the spider can be looked up under.
//!
//! Listing is locale-aware: `get` returns spiders ordered by a collation of
//! their display names, so a registry of mixed-script names still lists
//! predictably. The sort is computed once and cached; any later `add`
//! invalidates it. The registry is one explicit object with its own lock,
//! constructed at bootstrap and passed by reference; registration after
//! steady-state reads have begun is supported.

use crate::spider::Spider;
use icu_collator::{Collator, CollatorOptions, Strength};
use icu_locid::Locale;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::SpiderError;

struct RegistryInner {
    list: Vec<Arc<Spider>>,
    by_name: HashMap<String, Arc<Spider>>,
    sorted: Option<Vec<Arc<Spider>>>,
}

/// The catalog of registered spiders.
pub struct SpiderRegistry {
    inner: RwLock<RegistryInner>,
    collator: Collator,
}

impl Default for SpiderRegistry {
    fn default() -> Self {
        SpiderRegistry::new()
    }
}

impl SpiderRegistry {
    /// A registry collating display names under the root locale.
    pub fn new() -> Self {
        // Root-locale collation data is compiled into the binary; this
        // cannot fail.
        Self::try_with_locale(Locale::UND).expect("root locale collation data is always available")
    }

    /// A registry collating display names under `locale`.
    pub fn try_with_locale(locale: Locale) -> Result<Self, SpiderError> {
        let mut options = CollatorOptions::new();
        options.strength = Some(Strength::Secondary);
        let collator = Collator::try_new(&locale.into(), options).map_err(|e| {
            SpiderError::ConfigurationError(format!("collator unavailable for locale: {e}"))
        })?;
        Ok(SpiderRegistry {
            inner: RwLock::new(RegistryInner {
                list: Vec::new(),
                by_name: HashMap::new(),
                sorted: None,
            }),
            collator,
        })
    }

    /// Registers a spider, renaming it on collision.
    ///
    /// If the spider's name is taken, `name(2)`, `name(3)`, … are probed
    /// until a free one is found and the spider is renamed in place. The
    /// final name is the one `get_by_name` answers to.
    pub fn add(&self, spider: Spider) -> Arc<Spider> {
        let mut inner = self.inner.write();

        let base = spider.name();
        let mut candidate = base.clone();
        let mut suffix = 2;
        while inner.by_name.contains_key(&candidate) {
            candidate = format!("{base}({suffix})");
            suffix += 1;
        }
        if candidate != base {
            warn!("spider name `{base}` is taken; registering as `{candidate}`");
            spider.set_name(&candidate);
        }

        let spider = Arc::new(spider);
        inner.by_name.insert(candidate.clone(), Arc::clone(&spider));
        inner.list.push(Arc::clone(&spider));
        inner.sorted = None;

        debug!("registered spider `{candidate}`");
        spider
    }

    /// All registered spiders, ordered by collated display name.
    ///
    /// The ordering is cached until the next `add`.
    pub fn get(&self) -> Vec<Arc<Spider>> {
        if let Some(sorted) = self.inner.read().sorted.clone() {
            return sorted;
        }

        let mut inner = self.inner.write();
        if let Some(sorted) = inner.sorted.clone() {
            return sorted;
        }
        let mut sorted = inner.list.clone();
        sorted.sort_by(|a, b| self.collator.compare(&a.name(), &b.name()));
        inner.sorted = Some(sorted.clone());
        sorted
    }

    /// Looks up a spider by its final (post-rename) name.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<Spider>> {
        self.inner.read().by_name.get(name).cloned()
    }

    /// Number of registered spiders.
    pub fn len(&self) -> usize {
        self.inner.read().list.len()
    }

    /// Whether nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
