use std::fmt;

/// A thread's dense, globally unique position in `profile.db`. Index 0
/// is reserved for the rank-0-owned summary profile (spec §3 invariant).
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct ProfileIndex(pub u32);

impl ProfileIndex {
    pub const SUMMARY: ProfileIndex = ProfileIndex(0);

    pub fn is_summary(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ProfileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "profile#{}", self.0)
    }
}

/// A dense 32-bit calling-context-tree node id.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// An opaque handle to a calling-context-tree node as the measurement
/// agent names it, before resolution to a dense `ContextId` (spec §4.6,
/// GLOSSARY "Identifier tuple" neighbor concept). The tree itself is out
/// of scope; the core only ever resolves references it is handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtxRef(pub u64);

/// An opaque 16-bit metric identifier (function-scope and
/// execution-scope ids for the same named metric are distinct
/// `MetricId`s; the core never interprets their meaning, spec §1
/// Non-goals).
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct MetricId(pub u16);

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "metric#{}", self.0)
    }
}
