//! Fix plugins and category-based lookup.
//!
//! A plugin is one function of `(WorkItem, StrategyKind)`: the kind tag
//! selects primary, alternative or minimal behaviour. There is no plugin
//! inheritance; the registry maps issue categories to plugins.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{Result, StrategyKind, WorkItem};

/// What one edit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditResult {
    /// The edit was written.
    Changed { note: Option<String> },
    /// Nothing needed changing; the issue is already resolved.
    Unchanged { note: Option<String> },
    /// The edit could not resolve the issue.
    Failed { diagnostic: String },
    /// The change exceeds single-item scope and needs a human decision.
    NeedsApproval { reason: String },
}

impl EditResult {
    pub fn changed() -> Self {
        Self::Changed { note: None }
    }

    pub fn changed_with(note: impl Into<String>) -> Self {
        Self::Changed {
            note: Some(note.into()),
        }
    }

    pub fn unchanged() -> Self {
        Self::Unchanged { note: None }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self::Failed {
            diagnostic: diagnostic.into(),
        }
    }

    pub fn needs_approval(reason: impl Into<String>) -> Self {
        Self::NeedsApproval {
            reason: reason.into(),
        }
    }
}

/// Context handed to every plugin call.
#[derive(Debug, Clone)]
pub struct FixContext {
    pub workspace: PathBuf,
    /// Set once an operator approved an architectural change for this item.
    pub approved: bool,
}

impl FixContext {
    /// Absolute path of the item's target file.
    pub fn target(&self, item: &WorkItem) -> PathBuf {
        self.workspace.join(&item.location.file)
    }
}

/// A fix implementation for one or more issue categories.
///
/// `edit` must only touch the item's own file. Returning `Err` counts as a
/// failed attempt with the error text as diagnostic.
#[async_trait]
pub trait FixPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn edit(&self, item: &WorkItem, kind: StrategyKind, ctx: &FixContext)
        -> Result<EditResult>;
}

/// Category -> plugin lookup.
///
/// Resolution order: exact category, the prefix before `:`
/// (`cascade:lint` -> `cascade`), then the default plugin.
#[derive(Clone, Default)]
pub struct FixRegistry {
    plugins: HashMap<String, Arc<dyn FixPlugin>>,
    default: Option<Arc<dyn FixPlugin>>,
}

impl FixRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, category: impl Into<String>, plugin: Arc<dyn FixPlugin>) -> Self {
        self.plugins.insert(category.into(), plugin);
        self
    }

    pub fn with_default(mut self, plugin: Arc<dyn FixPlugin>) -> Self {
        self.default = Some(plugin);
        self
    }

    pub fn resolve(&self, category: &str) -> Option<Arc<dyn FixPlugin>> {
        if let Some(plugin) = self.plugins.get(category) {
            return Some(Arc::clone(plugin));
        }
        if let Some((prefix, _)) = category.split_once(':') {
            if let Some(plugin) = self.plugins.get(prefix) {
                return Some(Arc::clone(plugin));
            }
        }
        self.default.clone()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl FixPlugin for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn edit(
            &self,
            _item: &WorkItem,
            _kind: StrategyKind,
            _ctx: &FixContext,
        ) -> Result<EditResult> {
            Ok(EditResult::unchanged())
        }
    }

    #[test]
    fn test_registry_resolution_order() {
        let registry = FixRegistry::new()
            .register("lint", Arc::new(Named("lint")))
            .register("cascade", Arc::new(Named("cascade")))
            .with_default(Arc::new(Named("fallback")));

        assert_eq!(registry.resolve("lint").unwrap().name(), "lint");
        assert_eq!(registry.resolve("cascade:tests").unwrap().name(), "cascade");
        assert_eq!(registry.resolve("security").unwrap().name(), "fallback");
        assert_eq!(registry.categories().count(), 2);
    }

    #[test]
    fn test_registry_without_default_misses() {
        let registry = FixRegistry::new().register("lint", Arc::new(Named("lint")));
        assert!(registry.resolve("style").is_none());
    }
}
