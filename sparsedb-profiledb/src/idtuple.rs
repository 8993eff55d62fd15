//! Bridges the domain-level thread identity ([`sparsedb_model`]) into
//! its wire-format id-tuple encoding ([`sparsedb_codec`]). The two
//! crates keep distinct `IdTupleElement` types on purpose: the model's
//! version is a plain value the rest of the core reasons about, the
//! codec's version owns the exact 18-byte encoding.

use sparsedb_codec::records::{IdTuple, IdTupleElement as WireIdTupleElement};
use sparsedb_model::ThreadIdentity;

pub fn to_wire_id_tuple(identity: &ThreadIdentity) -> IdTuple {
    IdTuple(
        identity
            .0
            .iter()
            .map(|e| WireIdTupleElement {
                kind: e.kind,
                physical_index: e.physical_index,
                logical_index: e.logical_index,
            })
            .collect(),
    )
}
