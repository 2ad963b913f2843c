//! Role inheritance graph
//!
//! Roles declare the parents they inherit from. The effective role set of a
//! user is the reflexive-transitive closure over those edges. Cycles and
//! self-references are legal: every role is visited at most once.

use crate::types::{Role, RoleId, RoleScope};
use std::collections::{HashMap, HashSet};

/// Breadth-first expansion of a role set over "inherits from" edges
///
/// The walk does not own storage access. The caller repeatedly asks for the
/// next [`frontier`](Self::frontier) of unseen parent ids, loads them, and
/// hands the loaded rows back through [`absorb`](Self::absorb).
#[derive(Debug)]
pub(crate) struct InheritanceWalk<'a> {
    scope: &'a RoleScope,
    seen: HashSet<RoleId>,
    pending: Vec<RoleId>,
    roles: Vec<Role>,
}

impl<'a> InheritanceWalk<'a> {
    /// Seed the walk with already-resolved roles
    pub(crate) fn new(seeds: Vec<Role>, scope: &'a RoleScope) -> Self {
        let mut walk = Self {
            scope,
            seen: HashSet::new(),
            pending: Vec::new(),
            roles: Vec::with_capacity(seeds.len()),
        };
        for role in seeds {
            if walk.seen.insert(role.id.clone()) {
                walk.push(role);
            }
        }
        walk
    }

    /// Parent ids not yet requested, or `None` when the closure is complete
    pub(crate) fn frontier(&mut self) -> Option<Vec<RoleId>> {
        let next: Vec<RoleId> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|id| self.seen.insert(id.clone()))
            .collect();

        if next.is_empty() {
            None
        } else {
            Some(next)
        }
    }

    /// Add loaded parent rows; rows outside the scope are dropped
    pub(crate) fn absorb(&mut self, parents: Vec<Role>) {
        for role in parents {
            if self.scope.admits_parent(&role) {
                self.push(role);
            }
        }
    }

    /// Whether unexpanded parents remain
    pub(crate) fn has_pending(&self) -> bool {
        self.pending.iter().any(|id| !self.seen.contains(id))
    }

    /// The effective role set, seeds first
    pub(crate) fn finish(self) -> Vec<Role> {
        self.roles
    }

    fn push(&mut self, role: Role) {
        for parent in &role.inherits {
            if !self.seen.contains(parent) {
                self.pending.push(parent.clone());
            }
        }
        self.roles.push(role);
    }
}

/// Static view of the inheritance edges of a set of roles
///
/// Used for diagnostics; the engine itself never rejects cycles.
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    edges: HashMap<RoleId, Vec<RoleId>>,
}

impl RoleGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from role rows
    pub fn from_roles<'r>(roles: impl IntoIterator<Item = &'r Role>) -> Self {
        let mut graph = Self::new();
        for role in roles {
            graph.add_role(role);
        }
        graph
    }

    /// Add a role and its parent edges
    pub fn add_role(&mut self, role: &Role) {
        self.edges
            .entry(role.id.clone())
            .or_default()
            .extend(role.inherits.iter().cloned());
    }

    /// Number of roles in the graph
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph has no roles
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// All inheritance cycles, each reported as a closed path
    ///
    /// Depth-first search with three colors; a cycle is recorded whenever a
    /// node still on the stack is reached again. A self-reference shows up as
    /// `[a, a]`.
    pub fn find_cycles(&self) -> Vec<Vec<RoleId>> {
        let mut state: HashMap<&str, u8> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();
        let mut cycles = Vec::new();

        let mut starts: Vec<&str> = self.edges.keys().map(String::as_str).collect();
        starts.sort_unstable();

        for start in starts {
            if !state.contains_key(start) {
                self.visit(start, &mut state, &mut path, &mut cycles);
            }
        }

        cycles
    }

    fn visit<'g>(
        &'g self,
        node: &'g str,
        state: &mut HashMap<&'g str, u8>,
        path: &mut Vec<&'g str>,
        cycles: &mut Vec<Vec<RoleId>>,
    ) {
        match state.get(node) {
            Some(1) => {
                if let Some(start) = path.iter().position(|n| *n == node) {
                    let mut cycle: Vec<RoleId> =
                        path[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(node.to_string());
                    cycles.push(cycle);
                }
                return;
            }
            Some(_) => return,
            None => {}
        }

        state.insert(node, 1);
        path.push(node);

        if let Some(parents) = self.edges.get(node) {
            for parent in parents {
                self.visit(parent, state, path, cycles);
            }
        }

        state.insert(node, 2);
        path.pop();
    }
}
