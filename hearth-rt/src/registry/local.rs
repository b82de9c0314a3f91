//! Flat, case-sensitive name → actor mapping.
//!
//! Bindings live only as long as their target: registering installs an exit
//! hook on the actor that removes the entry the moment the actor reaches a
//! terminal status.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;

// Layer 3: Internal module imports
use super::error::RegistryError;
use crate::actor::{ActorCell, ActorId};

/// Local name registry.
///
/// An injectable service rather than an ambient global: create one per
/// runtime (or per test) and share it by cloning.
///
/// # Example
///
/// ```ignore
/// let registry = Registry::new();
/// registry.register("api", actor.cell())?;
/// let cell = registry.lookup("api")?;
/// ```
#[derive(Clone, Default)]
pub struct Registry {
    entries: Arc<DashMap<String, ActorCell>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Bind a name to an actor.
    ///
    /// Fails with `AlreadyRegistered` if the name is in use. The binding is
    /// removed automatically when the actor terminates; registering an
    /// already-terminated actor yields a binding that is removed at once.
    pub fn register(&self, name: impl Into<String>, cell: ActorCell) -> Result<(), RegistryError> {
        let name = name.into();
        {
            let entry = self.entries.entry(name.clone());
            match entry {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(RegistryError::AlreadyRegistered { name });
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(cell.clone());
                }
            }
        }

        // Eager cleanup: drop the binding the moment the target terminates.
        let entries = Arc::downgrade(&self.entries);
        let hook_name = name;
        let target = cell.id();
        cell.on_exit(move |_| {
            if let Some(entries) = entries.upgrade() {
                entries.remove_if(&hook_name, |_, bound| bound.id() == target);
            }
        });
        Ok(())
    }

    /// Resolve a name, failing with `NotRegistered` on a miss.
    pub fn lookup(&self, name: &str) -> Result<ActorCell, RegistryError> {
        self.whereis(name).ok_or_else(|| RegistryError::NotRegistered {
            name: name.to_string(),
        })
    }

    /// Resolve a name, returning `None` on a miss.
    pub fn whereis(&self, name: &str) -> Option<ActorCell> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    /// Remove a binding.
    pub fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        self.entries
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotRegistered {
                name: name.to_string(),
            })
    }

    /// All current bindings as `(name, actor_id)` pairs.
    pub fn list(&self) -> Vec<(String, ActorId)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().id()))
            .collect()
    }

    /// Number of current bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no names are bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.entries.len())
            .finish()
    }
}
