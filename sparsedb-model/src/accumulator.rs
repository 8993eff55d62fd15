use std::collections::HashMap;

use crate::{ContextId, MetricId};

/// The two scopes a metric instance can live in (spec §1 GLOSSARY
/// "Metric", §3 `Accumulator`). `Execution` is the inclusive-execution
/// scope; on-disk field and variable names elsewhere in this codebase
/// call it "execution" to match the upstream format's naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricScope {
    Function,
    Execution,
}

/// One metric's accumulated value in each scope it was observed in.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerMetric {
    pub function: Option<f64>,
    pub execution: Option<f64>,
}

impl PerMetric {
    pub fn get(&self, scope: MetricScope) -> Option<f64> {
        match scope {
            MetricScope::Function => self.function,
            MetricScope::Execution => self.execution,
        }
    }

    pub fn set(&mut self, scope: MetricScope, value: f64) {
        match scope {
            MetricScope::Function => self.function = Some(value),
            MetricScope::Execution => self.execution = Some(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.function.is_none() && self.execution.is_none()
    }
}

/// One thread's finalized per-context metric map (spec §3
/// `Accumulator`): for each context with any accumulated values, a set
/// of `(metric-id, value)` entries in the function and execution
/// scopes.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    pub by_context: HashMap<ContextId, HashMap<MetricId, PerMetric>>,
}

impl Accumulator {
    pub fn new() -> Self {
        Accumulator::default()
    }

    pub fn record(&mut self, ctx: ContextId, metric: MetricId, scope: MetricScope, value: f64) {
        self.by_context
            .entry(ctx)
            .or_default()
            .entry(metric)
            .or_default()
            .set(scope, value);
    }
}
