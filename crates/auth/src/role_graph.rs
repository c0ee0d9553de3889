//! Role inheritance over a parent-pointer tree.
//!
//! The tree is validated on every write (no dangling parents, no cycles), so
//! every read-side walk is a plain iterative loop over a finite, acyclic
//! structure. Resolved closures are memoized in a [`ResolutionCache`] that is
//! stamped with the graph version and cleared under the same write lock that
//! commits a mutation.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;

use gatekeep_core::RoleId;

use crate::roles::{NewRole, RoleDefinition, RoleName, standard_roles};
use crate::store::StoreError;

/// Resolved closure of a role: the role itself plus every descendant.
pub type IncludedRoles = Arc<BTreeSet<RoleName>>;

/// Configuration errors raised when a role mutation (or a load) would leave the
/// tree invalid. Reads never produce these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleGraphError {
    #[error("role '{0}' already exists")]
    DuplicateRole(RoleName),

    #[error("role '{0}' not found")]
    RoleNotFound(RoleName),

    #[error("parent role '{parent}' of '{role}' does not exist")]
    DanglingParent { role: RoleName, parent: RoleName },

    #[error("making '{parent}' the parent of '{role}' would create a cycle")]
    Cycle { role: RoleName, parent: RoleName },

    #[error("role '{role}' still has children: {children:?}")]
    HasChildren {
        role: RoleName,
        children: Vec<RoleName>,
    },

    #[error("role '{0}' is a system role and cannot be deleted")]
    SystemRole(RoleName),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl<T> From<std::sync::PoisonError<T>> for RoleGraphError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        RoleGraphError::Store(StoreError::Poisoned)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store contract
// ─────────────────────────────────────────────────────────────────────────────

/// Persistence contract for role definitions.
pub trait RoleStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<RoleDefinition>, StoreError>;

    fn upsert(&self, role: &RoleDefinition) -> Result<(), StoreError>;

    fn delete(&self, name: &RoleName) -> Result<(), StoreError>;
}

impl<S> RoleStore for Arc<S>
where
    S: RoleStore + ?Sized,
{
    fn load_all(&self) -> Result<Vec<RoleDefinition>, StoreError> {
        (**self).load_all()
    }

    fn upsert(&self, role: &RoleDefinition) -> Result<(), StoreError> {
        (**self).upsert(role)
    }

    fn delete(&self, name: &RoleName) -> Result<(), StoreError> {
        (**self).delete(name)
    }
}

/// In-memory role store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRoleStore {
    roles: RwLock<HashMap<RoleName, RoleDefinition>>,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoleStore for InMemoryRoleStore {
    fn load_all(&self) -> Result<Vec<RoleDefinition>, StoreError> {
        let roles = self.roles.read()?;
        let mut all: Vec<RoleDefinition> = roles.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    fn upsert(&self, role: &RoleDefinition) -> Result<(), StoreError> {
        self.roles.write()?.insert(role.name.clone(), role.clone());
        Ok(())
    }

    fn delete(&self, name: &RoleName) -> Result<(), StoreError> {
        self.roles.write()?.remove(name);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache
// ─────────────────────────────────────────────────────────────────────────────

/// Version-stamped memo of resolved closures.
///
/// Entries are only valid for the version they were computed against; a
/// lookup with any other version misses.
#[derive(Debug, Default)]
struct ResolutionCache {
    version: u64,
    entries: HashMap<RoleName, IncludedRoles>,
}

impl ResolutionCache {
    fn get(&self, version: u64, name: &str) -> Option<IncludedRoles> {
        if self.version != version {
            return None;
        }
        self.entries.get(name).cloned()
    }

    fn insert(&mut self, version: u64, name: RoleName, included: IncludedRoles) {
        if self.version != version {
            self.entries.clear();
            self.version = version;
        }
        self.entries.insert(name, included);
    }

    fn invalidate(&mut self, version: u64) {
        self.entries.clear();
        self.version = version;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Graph
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct GraphState {
    roles: HashMap<RoleName, RoleDefinition>,
    children: HashMap<RoleName, BTreeSet<RoleName>>,
    version: u64,
}

impl GraphState {
    fn from_definitions(definitions: Vec<RoleDefinition>) -> Result<Self, RoleGraphError> {
        let mut state = GraphState::default();
        for def in definitions {
            if state.roles.contains_key(&def.name) {
                return Err(RoleGraphError::DuplicateRole(def.name));
            }
            state.roles.insert(def.name.clone(), def);
        }

        for def in state.roles.values() {
            if let Some(parent) = &def.parent {
                if !state.roles.contains_key(parent) {
                    return Err(RoleGraphError::DanglingParent {
                        role: def.name.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        // Every parent walk must reach a root within `len` steps.
        let limit = state.roles.len();
        for def in state.roles.values() {
            let mut current = def.parent.clone();
            let mut steps = 0;
            while let Some(name) = current {
                steps += 1;
                if name == def.name || steps > limit {
                    return Err(RoleGraphError::Cycle {
                        role: def.name.clone(),
                        parent: def.parent.clone().unwrap_or(name),
                    });
                }
                current = state.roles.get(&name).and_then(|r| r.parent.clone());
            }
        }

        let mut children: HashMap<RoleName, BTreeSet<RoleName>> = HashMap::new();
        for def in state.roles.values() {
            if let Some(parent) = &def.parent {
                children.entry(parent.clone()).or_default().insert(def.name.clone());
            }
        }
        state.children = children;
        state.version = 1;
        Ok(state)
    }

    /// Would `parent` end up beneath (or equal to) `role`?
    fn creates_cycle(&self, role: &RoleName, parent: &RoleName) -> bool {
        let mut current = Some(parent.clone());
        let mut steps = 0;
        while let Some(name) = current {
            if &name == role || steps > self.roles.len() {
                return true;
            }
            steps += 1;
            current = self.roles.get(&name).and_then(|r| r.parent.clone());
        }
        false
    }

    fn descendants_closure(&self, name: &RoleName) -> BTreeSet<RoleName> {
        let mut included = BTreeSet::new();
        included.insert(name.clone());
        let mut pending = vec![name.clone()];
        while let Some(current) = pending.pop() {
            if let Some(children) = self.children.get(&current) {
                for child in children {
                    if included.insert(child.clone()) {
                        pending.push(child.clone());
                    }
                }
            }
        }
        included
    }

    fn ancestors(&self, name: &str) -> Vec<RoleName> {
        let mut out = Vec::new();
        let mut seen: HashSet<RoleName> = HashSet::new();
        let mut current = self.roles.get(name).and_then(|r| r.parent.clone());
        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                break;
            }
            current = self.roles.get(&parent).and_then(|r| r.parent.clone());
            out.push(parent);
        }
        out
    }
}

/// Role inheritance resolver.
///
/// Thread-safe; share it behind an `Arc`. All mutations are synchronous and
/// invalidate the resolution cache before returning.
pub struct RoleGraph {
    state: RwLock<GraphState>,
    cache: Mutex<ResolutionCache>,
    store: Option<Arc<dyn RoleStore>>,
}

impl core::fmt::Debug for RoleGraph {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RoleGraph")
            .field("version", &self.version())
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl Default for RoleGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleGraph {
    /// Empty graph with no backing store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            cache: Mutex::new(ResolutionCache::default()),
            store: None,
        }
    }

    /// Build a graph from already-persisted definitions (validated as a whole).
    pub fn from_definitions(definitions: Vec<RoleDefinition>) -> Result<Self, RoleGraphError> {
        let state = GraphState::from_definitions(definitions)?;
        Ok(Self {
            cache: Mutex::new(ResolutionCache {
                version: state.version,
                entries: HashMap::new(),
            }),
            state: RwLock::new(state),
            store: None,
        })
    }

    /// Load every role from `store` and write subsequent mutations through to it.
    pub fn load(store: Arc<dyn RoleStore>) -> Result<Self, RoleGraphError> {
        let definitions = store.load_all()?;
        let count = definitions.len();
        let mut graph = Self::from_definitions(definitions)?;
        graph.store = Some(store);
        tracing::info!(roles = count, "role graph loaded");
        Ok(graph)
    }

    /// Graph seeded with [`standard_roles`].
    pub fn with_standard_roles() -> Result<Self, RoleGraphError> {
        let graph = Self::new();
        for role in standard_roles() {
            graph.create_role(role)?;
        }
        Ok(graph)
    }

    /// Monotonic version; bumped by every committed mutation.
    pub fn version(&self) -> u64 {
        self.state.read().map(|s| s.version).unwrap_or(0)
    }

    pub fn get(&self, name: &str) -> Option<RoleDefinition> {
        self.state.read().ok()?.roles.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state
            .read()
            .map(|s| s.roles.contains_key(name))
            .unwrap_or(false)
    }

    /// All definitions, sorted by name.
    pub fn roles(&self) -> Vec<RoleDefinition> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let mut all: Vec<RoleDefinition> = state.roles.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn children(&self, name: &str) -> Vec<RoleName> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.children.get(name).map(|c| c.iter().cloned().collect()))
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Reflexive-transitive closure of `name` over its descendants.
    pub fn resolve_included_roles(&self, name: &str) -> Result<IncludedRoles, RoleGraphError> {
        let state = self.state.read()?;
        let Some(def) = state.roles.get(name) else {
            return Err(RoleGraphError::RoleNotFound(RoleName::new(name.to_string())));
        };

        if let Some(hit) = self.cache.lock()?.get(state.version, name) {
            tracing::trace!(role = name, version = state.version, "role closure cache hit");
            return Ok(hit);
        }

        let included: IncludedRoles = Arc::new(state.descendants_closure(&def.name));
        tracing::trace!(
            role = name,
            version = state.version,
            size = included.len(),
            "role closure computed"
        );
        // Still under the read lock: no mutation can slip between compute and insert.
        self.cache
            .lock()?
            .insert(state.version, def.name.clone(), Arc::clone(&included));
        Ok(included)
    }

    /// Parents of `name`, nearest first. Unknown roles have no ancestors.
    pub fn ancestors(&self, name: &str) -> Vec<RoleName> {
        self.state
            .read()
            .map(|s| s.ancestors(name))
            .unwrap_or_default()
    }

    /// Whether holding `granted` implies holding `required`.
    ///
    /// Walks `required`'s parent chain, so it runs in O(depth). Unknown roles
    /// include nothing, not even themselves.
    pub fn includes(&self, granted: &str, required: &str) -> bool {
        let Ok(state) = self.state.read() else {
            return false;
        };
        if !state.roles.contains_key(granted) || !state.roles.contains_key(required) {
            return false;
        }
        granted == required || state.ancestors(required).iter().any(|a| a.as_str() == granted)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_role(&self, new_role: NewRole) -> Result<RoleDefinition, RoleGraphError> {
        let mut state = self.state.write()?;

        if state.roles.contains_key(&new_role.name) {
            return Err(RoleGraphError::DuplicateRole(new_role.name));
        }
        if let Some(parent) = &new_role.parent {
            if !state.roles.contains_key(parent) {
                return Err(RoleGraphError::DanglingParent {
                    role: new_role.name,
                    parent: parent.clone(),
                });
            }
        }

        let definition = RoleDefinition {
            id: RoleId::new(),
            name: new_role.name,
            parent: new_role.parent,
            is_system: new_role.is_system,
        };

        if let Some(store) = &self.store {
            store.upsert(&definition)?;
        }

        if let Some(parent) = &definition.parent {
            state
                .children
                .entry(parent.clone())
                .or_default()
                .insert(definition.name.clone());
        }
        state.roles.insert(definition.name.clone(), definition.clone());
        self.commit(&mut state)?;

        tracing::info!(
            role = %definition.name,
            parent = ?definition.parent.as_ref().map(|p| p.as_str()),
            version = state.version,
            "role created"
        );
        Ok(definition)
    }

    /// Move `name` beneath `parent` (or make it a root with `None`).
    ///
    /// Rejected before anything is written if it would create a cycle.
    pub fn set_parent(
        &self,
        name: &str,
        parent: Option<RoleName>,
    ) -> Result<RoleDefinition, RoleGraphError> {
        let mut state = self.state.write()?;

        let Some(current) = state.roles.get(name).cloned() else {
            return Err(RoleGraphError::RoleNotFound(RoleName::new(name.to_string())));
        };

        if let Some(parent) = &parent {
            if !state.roles.contains_key(parent) {
                return Err(RoleGraphError::DanglingParent {
                    role: current.name,
                    parent: parent.clone(),
                });
            }
            if state.creates_cycle(&current.name, parent) {
                tracing::warn!(role = name, parent = %parent, "rejected cyclic parent assignment");
                return Err(RoleGraphError::Cycle {
                    role: current.name,
                    parent: parent.clone(),
                });
            }
        }

        let updated = RoleDefinition {
            parent: parent.clone(),
            ..current.clone()
        };

        if let Some(store) = &self.store {
            store.upsert(&updated)?;
        }

        if let Some(old) = &current.parent {
            if let Some(siblings) = state.children.get_mut(old) {
                siblings.remove(&current.name);
                if siblings.is_empty() {
                    state.children.remove(old);
                }
            }
        }
        if let Some(new_parent) = &parent {
            state
                .children
                .entry(new_parent.clone())
                .or_default()
                .insert(updated.name.clone());
        }
        state.roles.insert(updated.name.clone(), updated.clone());
        self.commit(&mut state)?;

        tracing::info!(
            role = %updated.name,
            parent = ?updated.parent.as_ref().map(|p| p.as_str()),
            version = state.version,
            "role reparented"
        );
        Ok(updated)
    }

    /// Delete a leaf role. Roles with children are rejected, not reparented.
    pub fn delete_role(&self, name: &str) -> Result<(), RoleGraphError> {
        let mut state = self.state.write()?;

        let Some(current) = state.roles.get(name).cloned() else {
            return Err(RoleGraphError::RoleNotFound(RoleName::new(name.to_string())));
        };
        if current.is_system {
            return Err(RoleGraphError::SystemRole(current.name));
        }
        if let Some(children) = state.children.get(name) {
            if !children.is_empty() {
                return Err(RoleGraphError::HasChildren {
                    role: current.name,
                    children: children.iter().cloned().collect(),
                });
            }
        }

        if let Some(store) = &self.store {
            store.delete(&current.name)?;
        }

        if let Some(parent) = &current.parent {
            if let Some(siblings) = state.children.get_mut(parent) {
                siblings.remove(&current.name);
                if siblings.is_empty() {
                    state.children.remove(parent);
                }
            }
        }
        state.roles.remove(name);
        self.commit(&mut state)?;

        tracing::info!(role = name, version = state.version, "role deleted");
        Ok(())
    }

    /// Bump the version and drop every cached closure while the caller still
    /// holds the write lock.
    fn commit(&self, state: &mut GraphState) -> Result<(), RoleGraphError> {
        state.version += 1;
        self.cache.lock()?.invalidate(state.version);
        Ok(())
    }
}
