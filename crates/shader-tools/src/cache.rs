//! Path-keyed memoization shared by concurrent compiles

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Append-only cache of conversion results keyed by file path
///
/// Two threads missing on the same path at once may both run the
/// conversion; the first insert wins and both get that value.
pub struct ConversionCache<T> {
    entries: RwLock<FxHashMap<String, Arc<T>>>,
}

impl<T> Default for ConversionCache<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
        }
    }
}

impl<T> ConversionCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Arc<T>> {
        self.entries.read().get(path).cloned()
    }

    pub fn get_or_insert_with<E>(&self, path: &str, convert: impl FnOnce() -> Result<T, E>) -> Result<Arc<T>, E> {
        if let Some(value) = self.get(path) {
            tracing::debug!("Conversion cache hit for '{path}'");
            return Ok(value);
        }

        let value = Arc::new(convert()?);
        let mut entries = self.entries.write();
        let value = entries.entry(path.to_string()).or_insert(value).clone();
        tracing::debug!("Conversion cache insert for '{path}' ({} entries)", entries.len());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
