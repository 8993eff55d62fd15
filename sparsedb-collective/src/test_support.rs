//! An in-process, multi-thread [`Cohort`] used only by this workspace's
//! own tests to exercise multi-rank collectives (barrier, allreduce,
//! exscan, a shared counter) without an MPI dependency. Not exposed
//! outside `#[cfg(test)]`: production hosts supply their own `Cohort`
//! backed by their real transport.

use std::any::Any;
use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

use crate::{Cohort, SharedCounter};

struct Rendezvous {
    size: usize,
    barrier_in: Barrier,
    barrier_out: Barrier,
    slot: Mutex<Vec<Option<Box<dyn Any + Send>>>>,
    result: Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

#[derive(Clone)]
pub struct InMemoryCohort {
    rank: usize,
    size: usize,
    shared: Arc<Rendezvous>,
}

impl InMemoryCohort {
    /// Builds a cohort of `size` rank-views sharing one rendezvous
    /// point. Each view is meant to be driven from its own thread.
    pub fn new_group(size: usize) -> Vec<InMemoryCohort> {
        let shared = Arc::new(Rendezvous {
            size,
            barrier_in: Barrier::new(size),
            barrier_out: Barrier::new(size),
            slot: Mutex::new((0..size).map(|_| None).collect()),
            result: Mutex::new(None),
        });
        (0..size)
            .map(|rank| InMemoryCohort {
                rank,
                size,
                shared: shared.clone(),
            })
            .collect()
    }

    /// Runs one (gather → compute-on-rank-0 → broadcast) rendezvous.
    /// Every rank in the group must call this the same number of times,
    /// in the same order, mirroring spec §4.2's ordering contract.
    fn collective<T, R, F>(&self, local: T, combine: F) -> R
    where
        T: Send + 'static,
        R: Clone + Send + Sync + 'static,
        F: FnOnce(Vec<T>) -> R,
    {
        {
            let mut slot = self.shared.slot.lock();
            slot[self.rank] = Some(Box::new(local) as Box<dyn Any + Send>);
        }
        self.shared.barrier_in.wait();

        if self.rank == 0 {
            let mut slot = self.shared.slot.lock();
            let values: Vec<T> = slot
                .iter_mut()
                .map(|v| *v.take().unwrap().downcast::<T>().unwrap())
                .collect();
            let result = combine(values);
            *self.shared.result.lock() = Some(Box::new(result) as Box<dyn Any + Send + Sync>);
        }
        self.shared.barrier_out.wait();

        let out = self
            .shared
            .result
            .lock()
            .as_ref()
            .unwrap()
            .downcast_ref::<R>()
            .unwrap()
            .clone();

        // A third phase ensures every rank has read `result` before the
        // next collective call reuses the same slot.
        self.shared.barrier_in.wait();
        out
    }
}

impl Cohort for InMemoryCohort {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.collective((), |_| ());
    }

    fn allreduce_sum_u64(&self, local: u64) -> u64 {
        self.collective(local, |vals| vals.iter().sum())
    }

    fn allreduce_sum_vec_u64(&self, local: &[u64]) -> Vec<u64> {
        let local = local.to_vec();
        self.collective(local, |vecs| {
            let len = vecs.first().map_or(0, |v| v.len());
            let mut total = vec![0u64; len];
            for v in vecs {
                for (acc, x) in total.iter_mut().zip(v) {
                    *acc += x;
                }
            }
            total
        })
    }

    fn exscan_sum_u64(&self, local: u64) -> Option<u64> {
        let my_rank = self.rank;
        let prefixes: Vec<u64> = self.collective(local, |vals| {
            let mut running = 0u64;
            let mut out = Vec::with_capacity(vals.len());
            for v in vals {
                out.push(running);
                running += v;
            }
            out
        });
        if my_rank == 0 {
            None
        } else {
            Some(prefixes[my_rank])
        }
    }

    fn broadcast_bytes(&self, from_rank: usize, data: &[u8]) -> Vec<u8> {
        let data = data.to_vec();
        self.collective(data, move |vecs| vecs[from_rank].clone())
    }

    fn shared_counter(&self, base: u64) -> SharedCounter {
        self.collective(base, |bases| SharedCounter::new(bases[0]))
    }
}
