//! Control-flow path tree for locals clearing
//!
//! Every use of a local records the path node it was analyzed under. Two
//! uses whose nearest common ancestor is a `Path` node can both execute,
//! so the earlier one must not clear the slot. When the ancestor is a
//! `Branch`, the uses sit in exclusive arms and each may clear.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Sequential code
    Path,
    /// A divergence point whose children are exclusive
    Branch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathId(u32);

#[derive(Debug, Clone)]
struct PathNode {
    kind: PathKind,
    parent: Option<PathId>,
    depth: u32,
}

/// Arena of path nodes addressed by index
#[derive(Debug, Default)]
pub struct PathArena {
    nodes: Vec<PathNode>,
}

impl PathArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&mut self, kind: PathKind, parent: Option<PathId>) -> PathId {
        let depth = parent.map(|p| self.get(p).depth + 1).unwrap_or(0);
        self.nodes.push(PathNode {
            kind,
            parent,
            depth,
        });
        PathId((self.nodes.len() - 1) as u32)
    }

    pub fn path(&mut self, parent: Option<PathId>) -> PathId {
        self.node(PathKind::Path, parent)
    }

    pub fn branch(&mut self, parent: Option<PathId>) -> PathId {
        self.node(PathKind::Branch, parent)
    }

    pub fn kind(&self, id: PathId) -> PathKind {
        self.get(id).kind
    }

    pub fn parent(&self, id: PathId) -> Option<PathId> {
        self.get(id).parent
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn get(&self, id: PathId) -> &PathNode {
        &self.nodes[id.0 as usize]
    }

    /// Nearest common ancestor, or `None` for nodes in different trees
    pub fn common_ancestor(&self, a: PathId, b: PathId) -> Option<PathId> {
        let (mut a, mut b) = (a, b);
        while self.get(a).depth > self.get(b).depth {
            a = self.get(a).parent?;
        }
        while self.get(b).depth > self.get(a).depth {
            b = self.get(b).parent?;
        }
        while a != b {
            a = self.get(a).parent?;
            b = self.get(b).parent?;
        }
        Some(a)
    }

    /// True when code at `a` and code at `b` may both run
    pub fn on_same_path(&self, a: PathId, b: PathId) -> bool {
        self.common_ancestor(a, b)
            .map(|c| self.kind(c) == PathKind::Path)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_siblings_of_a_branch_are_exclusive() {
        let mut arena = PathArena::new();
        let root = arena.path(None);
        let branch = arena.branch(Some(root));
        let then = arena.path(Some(branch));
        let els = arena.path(Some(branch));
        assert_eq!(arena.common_ancestor(then, els), Some(branch));
        assert!(!arena.on_same_path(then, els));
        assert!(arena.on_same_path(root, then));
    }

    #[test]
    fn test_ancestor_of_itself() {
        let mut arena = PathArena::new();
        let root = arena.path(None);
        let child = arena.path(Some(root));
        assert_eq!(arena.common_ancestor(child, child), Some(child));
        assert_eq!(arena.common_ancestor(child, root), Some(root));
    }

    #[test]
    fn test_disjoint_roots_have_no_ancestor() {
        let mut arena = PathArena::new();
        let a = arena.path(None);
        let b = arena.path(None);
        let deep = arena.path(Some(b));
        assert_eq!(arena.common_ancestor(a, deep), None);
        assert!(!arena.on_same_path(a, deep));
    }

    #[test]
    fn test_nested_branches_resolve_to_inner_branch() {
        let mut arena = PathArena::new();
        let root = arena.path(None);
        let outer = arena.branch(Some(root));
        let arm = arena.path(Some(outer));
        let inner = arena.branch(Some(arm));
        let left = arena.path(Some(inner));
        let right = arena.path(Some(inner));
        let deeper = arena.path(Some(left));
        assert_eq!(arena.common_ancestor(deeper, right), Some(inner));
        assert_eq!(arena.kind(inner), PathKind::Branch);
        assert_eq!(arena.len(), 7);
    }
}
