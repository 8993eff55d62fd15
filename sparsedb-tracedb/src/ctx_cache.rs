//! A small fixed-capacity cache mapping context references to resolved
//! context ids, bounded by one thread's live cursor (spec §4.6 "Sample
//! append").

use std::collections::{HashMap, VecDeque};

use sparsedb_model::{ContextId, CtxRef};

pub struct CtxRefCache {
    capacity: usize,
    map: HashMap<CtxRef, ContextId>,
    order: VecDeque<CtxRef>,
}

impl CtxRefCache {
    pub fn new(capacity: usize) -> Self {
        CtxRefCache {
            capacity: capacity.max(1),
            map: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn get(&mut self, ctx_ref: CtxRef) -> Option<ContextId> {
        let id = *self.map.get(&ctx_ref)?;
        self.touch(ctx_ref);
        Some(id)
    }

    pub fn insert(&mut self, ctx_ref: CtxRef, id: ContextId) {
        if self.map.insert(ctx_ref, id).is_some() {
            self.touch(ctx_ref);
            return;
        }
        self.order.push_back(ctx_ref);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
    }

    fn touch(&mut self, ctx_ref: CtxRef) {
        if let Some(pos) = self.order.iter().position(|&r| r == ctx_ref) {
            self.order.remove(pos);
        }
        self.order.push_back(ctx_ref);
    }
}
