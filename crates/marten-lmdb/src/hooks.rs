//! Named write hooks
//!
//! An observability extension point: the store carries a table of named
//! hooks that external layers can read and replace atomically. The core
//! store never invokes them.

use std::collections::HashMap;
use std::sync::Arc;

use marten_core::value::{Symbol, Value};
use parking_lot::RwLock;

/// A write hook observes `(key, new record value)`.
pub type WriteHook = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// Atomically swappable table of named write hooks.
#[derive(Default)]
pub struct HookTable {
    inner: RwLock<HashMap<Symbol, WriteHook>>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &Symbol) -> Option<WriteHook> {
        self.inner.read().get(name).cloned()
    }

    /// Install a hook, returning the one it displaced.
    pub fn insert(&self, name: Symbol, hook: WriteHook) -> Option<WriteHook> {
        self.inner.write().insert(name, hook)
    }

    pub fn remove(&self, name: &Symbol) -> Option<WriteHook> {
        self.inner.write().remove(name)
    }

    /// Replace the whole table in one swap.
    pub fn replace_all(&self, hooks: HashMap<Symbol, WriteHook>) {
        *self.inner.write() = hooks;
    }

    pub fn names(&self) -> Vec<Symbol> {
        self.inner.read().keys().cloned().collect()
    }

    /// Consistent snapshot of the current table.
    pub fn snapshot(&self) -> HashMap<Symbol, WriteHook> {
        self.inner.read().clone()
    }
}

impl std::fmt::Debug for HookTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookTable")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_insert_get_remove() {
        let table = HookTable::new();
        let name = Symbol::new("audit");
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let hook: WriteHook = Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(table.insert(name.clone(), hook).is_none());
        let fetched = table.get(&name).unwrap();
        fetched(&Value::keyword("k"), &Value::I64(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(table.remove(&name).is_some());
        assert!(table.get(&name).is_none());
    }

    #[test]
    fn test_replace_all() {
        let table = HookTable::new();
        table.insert(Symbol::new("a"), Arc::new(|_, _| {}));
        table.insert(Symbol::new("b"), Arc::new(|_, _| {}));

        let mut fresh: HashMap<Symbol, WriteHook> = HashMap::new();
        fresh.insert(Symbol::new("c"), Arc::new(|_, _| {}));
        table.replace_all(fresh);

        let names = table.names();
        assert_eq!(names, vec![Symbol::new("c")]);
    }
}
