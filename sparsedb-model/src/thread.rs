use crate::ProfileIndex;

/// One `(kind, physical-index, logical-index)` triple of an id-tuple
/// (spec §3 `Thread.identifier tuple`, GLOSSARY "Identifier tuple").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdTupleElement {
    pub kind: u16,
    pub physical_index: u64,
    pub logical_index: u64,
}

/// A thread's identity: its assigned profile index plus the ordered
/// id-tuple describing its position in the machine/process/thread
/// hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadId {
    pub profile_index: ProfileIndex,
    pub identity: ThreadIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadIdentity(pub Vec<IdTupleElement>);

impl ThreadIdentity {
    pub fn empty() -> Self {
        ThreadIdentity(Vec::new())
    }
}
