//! The sparse-metric formatter (spec §4.4): turns one thread's
//! [`Accumulator`] into the `(mv-pair, ci-pair)` blobs that make up its
//! `profile.db` data block.

use std::collections::HashMap;

use thiserror::Error;

use sparsedb_codec::constants::LAST_NODE_END;
use sparsedb_codec::records::{ContextIndexPair, ValueMetricPair};
use sparsedb_model::{Accumulator, ContextId, ContextInfo, LineScopeness, MetricId};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FormatError {
    #[error("metric {0} has no registered function/execution scope mapping")]
    MissingScopeMapping(MetricId),
}

pub type Result<T> = std::result::Result<T, FormatError>;

/// The pair of on-disk metric ids one logical metric resolves to: one
/// for its function-scope instance, one for its inclusive-execution
/// instance. Assigning these is a meta-layer concern (spec §3 Context
/// "owned by meta layer, not by the core"); the formatter only needs
/// two distinct wire ids to write, never their meaning.
#[derive(Debug, Clone, Copy)]
pub struct MetricScopeIds {
    pub function: MetricId,
    pub execution: MetricId,
}

/// One thread's formatted `profile.db` data block: the mv-pair blob,
/// the ci-pair blob (terminator included), and the counts that
/// populate its `ProfInfoRecord`.
#[derive(Debug, Clone, Default)]
pub struct FormattedThread {
    pub mv_pairs: Vec<ValueMetricPair>,
    pub ci_pairs: Vec<ContextIndexPair>,
    pub num_vals: u64,
    pub num_nz_ctxs: u32,
}

/// Formats one thread's accumulated metrics (spec §4.4).
///
/// Contexts are visited in ascending id order. Each non-terminator
/// ci-pair records the starting index, within this thread's mv-pair
/// blob, of its context's values; a context that ends up contributing
/// zero pairs is rewound out of the ci-pair blob entirely rather than
/// left as a dead, zero-width entry.
///
/// A context classified as "line" scope has its function-scope value
/// serve double duty as the inclusive-execution value: the pair is
/// emitted twice, once under each scope's wire id. A non-line context
/// emits whichever of its function/execution values are present,
/// independently.
pub fn format_thread(
    accumulator: &Accumulator,
    contexts: &[ContextInfo],
    metric_wire_ids: &HashMap<MetricId, MetricScopeIds>,
) -> Result<FormattedThread> {
    let scope_of: HashMap<ContextId, LineScopeness> =
        contexts.iter().map(|c| (c.id, c.scope)).collect();

    let mut ctx_ids: Vec<&ContextId> = accumulator.by_context.keys().collect();
    ctx_ids.sort();

    let mut mv_pairs = Vec::new();
    let mut ci_pairs = Vec::new();
    let mut running_total: u64 = 0;

    for &ctx_id in ctx_ids {
        let metrics = &accumulator.by_context[ctx_id];
        let scope = scope_of
            .get(ctx_id)
            .copied()
            .unwrap_or(LineScopeness::NotLine);
        let start = mv_pairs.len();

        for (metric_id, per_metric) in metrics {
            let wire = metric_wire_ids
                .get(metric_id)
                .ok_or(FormatError::MissingScopeMapping(*metric_id))?;
            match scope {
                LineScopeness::Line => {
                    if let Some(v) = per_metric.function {
                        mv_pairs.push(ValueMetricPair {
                            value: v,
                            metric_id: wire.function.0,
                        });
                        mv_pairs.push(ValueMetricPair {
                            value: v,
                            metric_id: wire.execution.0,
                        });
                    } else if let Some(v) = per_metric.execution {
                        mv_pairs.push(ValueMetricPair {
                            value: v,
                            metric_id: wire.execution.0,
                        });
                    }
                }
                LineScopeness::NotLine => {
                    if let Some(v) = per_metric.function {
                        mv_pairs.push(ValueMetricPair {
                            value: v,
                            metric_id: wire.function.0,
                        });
                    }
                    if let Some(v) = per_metric.execution {
                        mv_pairs.push(ValueMetricPair {
                            value: v,
                            metric_id: wire.execution.0,
                        });
                    }
                }
            }
        }

        if mv_pairs.len() == start {
            continue;
        }
        ci_pairs.push(ContextIndexPair {
            ctx_id: ctx_id.0,
            start_index: start as u64,
        });
        running_total = mv_pairs.len() as u64;
    }

    ci_pairs.push(ContextIndexPair {
        ctx_id: LAST_NODE_END,
        start_index: running_total,
    });

    Ok(FormattedThread {
        num_vals: running_total,
        num_nz_ctxs: ci_pairs.len() as u32 - 1,
        mv_pairs,
        ci_pairs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparsedb_model::MetricScope;

    fn wire_ids(metrics: &[u16]) -> HashMap<MetricId, MetricScopeIds> {
        metrics
            .iter()
            .map(|&m| {
                (
                    MetricId(m),
                    MetricScopeIds {
                        function: MetricId(m * 2),
                        execution: MetricId(m * 2 + 1),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn empty_accumulator_yields_bare_terminator() {
        let acc = Accumulator::new();
        let out = format_thread(&acc, &[], &HashMap::new()).unwrap();
        assert_eq!(out.num_vals, 0);
        assert_eq!(out.num_nz_ctxs, 0);
        assert!(out.mv_pairs.is_empty());
        assert_eq!(out.ci_pairs, vec![ContextIndexPair { ctx_id: LAST_NODE_END, start_index: 0 }]);
    }

    #[test]
    fn non_line_context_emits_function_and_execution_independently() {
        let mut acc = Accumulator::new();
        acc.record(ContextId(5), MetricId(1), MetricScope::Function, 10.0);
        acc.record(ContextId(5), MetricId(1), MetricScope::Execution, 20.0);
        let contexts = [ContextInfo { id: ContextId(5), scope: LineScopeness::NotLine }];
        let out = format_thread(&acc, &contexts, &wire_ids(&[1])).unwrap();

        assert_eq!(out.num_vals, 2);
        assert_eq!(out.num_nz_ctxs, 1);
        assert_eq!(out.ci_pairs[0], ContextIndexPair { ctx_id: 5, start_index: 0 });
        assert!(out.ci_pairs[1].is_terminator());
        assert_eq!(out.mv_pairs[0], ValueMetricPair { value: 10.0, metric_id: 2 });
        assert_eq!(out.mv_pairs[1], ValueMetricPair { value: 20.0, metric_id: 3 });
    }

    #[test]
    fn line_scope_context_duplicates_function_value_into_execution_id() {
        let mut acc = Accumulator::new();
        acc.record(ContextId(2), MetricId(7), MetricScope::Function, 4.5);
        let contexts = [ContextInfo { id: ContextId(2), scope: LineScopeness::Line }];
        let out = format_thread(&acc, &contexts, &wire_ids(&[7])).unwrap();

        assert_eq!(out.num_vals, 2);
        assert_eq!(out.mv_pairs[0], ValueMetricPair { value: 4.5, metric_id: 14 });
        assert_eq!(out.mv_pairs[1], ValueMetricPair { value: 4.5, metric_id: 15 });
    }

    #[test]
    fn context_with_no_emitted_pairs_is_rewound_out_of_ci_pairs() {
        // A context present in the accumulator's map but whose single
        // metric has no registered scope mapping would error; instead
        // model "nothing to emit" directly via an empty metric map.
        let mut acc = Accumulator::new();
        acc.by_context.insert(ContextId(9), HashMap::new());
        acc.record(ContextId(10), MetricId(1), MetricScope::Function, 1.0);
        let contexts = [
            ContextInfo { id: ContextId(9), scope: LineScopeness::NotLine },
            ContextInfo { id: ContextId(10), scope: LineScopeness::NotLine },
        ];
        let out = format_thread(&acc, &contexts, &wire_ids(&[1])).unwrap();

        assert_eq!(out.num_nz_ctxs, 1);
        assert_eq!(out.ci_pairs.len(), 2);
        assert_eq!(out.ci_pairs[0].ctx_id, 10);
    }

    #[test]
    fn contexts_are_emitted_in_ascending_id_order_regardless_of_hashmap_order() {
        let mut acc = Accumulator::new();
        for id in [40u32, 3, 21] {
            acc.record(ContextId(id), MetricId(1), MetricScope::Function, id as f64);
        }
        let contexts: Vec<_> = [40u32, 3, 21]
            .iter()
            .map(|&id| ContextInfo { id: ContextId(id), scope: LineScopeness::NotLine })
            .collect();
        let out = format_thread(&acc, &contexts, &wire_ids(&[1])).unwrap();

        let ids: Vec<u32> = out.ci_pairs.iter().map(|p| p.ctx_id).collect();
        assert_eq!(ids, vec![3, 21, 40, LAST_NODE_END]);
    }

    #[test]
    fn missing_scope_mapping_is_reported() {
        let mut acc = Accumulator::new();
        acc.record(ContextId(1), MetricId(99), MetricScope::Function, 1.0);
        let contexts = [ContextInfo { id: ContextId(1), scope: LineScopeness::NotLine }];
        let err = format_thread(&acc, &contexts, &HashMap::new()).unwrap_err();
        assert!(matches!(err, FormatError::MissingScopeMapping(MetricId(99))));
    }
}
