//! Classes: named capabilities that APIs provide and/or require. A class has no owner; membership (`class ∋ api`) is a bipartite
//! relation kept symmetrically on both the class side and the descriptor
//! side.

/// What the names in a `get_names`/`enum` query should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Descriptors,
    Aliases,
    Both,
}
