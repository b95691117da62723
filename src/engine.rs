//! Execution engine: the safe-run wrapper around every assessment and the
//! bounded worker pool used for optional parallelism.
//!
//! Safe-run never propagates. Any error or panic inside a run closure is
//! recorded on the instance as a tagged failure and the run moves on; one
//! worker's failure never cancels its siblings. There is no cancellation or
//! timeout mechanism.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::model::{AssessmentStatus, Check, Metric, RunFailure};
use crate::registry::{
    CheckDef, CheckVerdict, MetricDef, MetricLookup, MetricVerdict, RunContext, ScopeTarget,
};

/// Classify an error chain into the failure kind recorded on the instance.
fn failure_kind(err: &anyhow::Error) -> &'static str {
    if err.downcast_ref::<std::io::Error>().is_some() {
        "IoError"
    } else if err.downcast_ref::<serde_json::Error>().is_some() {
        "JsonError"
    } else {
        "AssessmentError"
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "assessment panicked".to_string()
    }
}

pub fn safe_run_metric(
    metric: &mut Metric,
    def: &MetricDef,
    target: &ScopeTarget,
    ctx: &RunContext,
) {
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        (def.run)(target, ctx, &mut metric.details)
    }));
    metric.runtime_secs = started.elapsed().as_secs_f64();

    match outcome {
        Ok(Ok(MetricVerdict::Computed(value))) => {
            metric.status = AssessmentStatus::RunSuccess;
            metric.value = Some(value);
        }
        Ok(Ok(MetricVerdict::NotApplicable { reason })) => {
            metric.status = AssessmentStatus::NotApplicable;
            metric
                .details
                .insert("not_applicable_reason".to_string(), Value::from(reason.clone()));
            debug!(metric = %metric.name, reason = %reason, "metric not applicable");
        }
        Ok(Err(err)) => {
            metric.status = AssessmentStatus::RunError;
            metric.failure = Some(RunFailure {
                kind: failure_kind(&err).to_string(),
                message: format!("{err:#}"),
            });
            warn!(metric = %metric.name, scope = target.id(), error = %format!("{err:#}"), "metric run failed");
        }
        Err(payload) => {
            metric.status = AssessmentStatus::RunError;
            let message = panic_message(payload);
            metric.failure = Some(RunFailure {
                kind: "Panic".to_string(),
                message: message.clone(),
            });
            warn!(metric = %metric.name, scope = target.id(), error = %message, "metric run panicked");
        }
    }
}

/// Severity stays `NoSeverity` unless the closure evaluated successfully;
/// detail fields written before a failure are preserved.
pub fn safe_run_check(
    check: &mut Check,
    def: &CheckDef,
    target: &ScopeTarget,
    ctx: &RunContext,
    metrics: &MetricLookup,
) {
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        (def.run)(target, ctx, metrics, &check.parameters, &mut check.details)
    }));
    check.runtime_secs = started.elapsed().as_secs_f64();

    match outcome {
        Ok(Ok(CheckVerdict::Evaluated { severity, message })) => {
            check.status = AssessmentStatus::RunSuccess;
            check.severity = severity;
            check.message = message;
        }
        Ok(Ok(CheckVerdict::NotApplicable { reason })) => {
            check.status = AssessmentStatus::NotApplicable;
            check.message = reason.clone();
            debug!(check = %check.name, reason = %reason, "check not applicable");
        }
        Ok(Err(err)) => {
            check.status = AssessmentStatus::RunError;
            check.failure = Some(RunFailure {
                kind: failure_kind(&err).to_string(),
                message: format!("{err:#}"),
            });
            warn!(check = %check.name, scope = target.id(), error = %format!("{err:#}"), "check run failed");
        }
        Err(payload) => {
            check.status = AssessmentStatus::RunError;
            let message = panic_message(payload);
            check.failure = Some(RunFailure {
                kind: "Panic".to_string(),
                message: message.clone(),
            });
            warn!(check = %check.name, scope = target.id(), error = %message, "check run panicked");
        }
    }
}

/// Apply `f` to every item, either in place on the calling thread or on a
/// fixed pool of scoped workers pulling from a shared queue. The scope is
/// the join barrier; a poisoned queue lock is recovered, not propagated.
pub fn for_each_parallel<T, F>(items: &mut [T], workers: usize, f: F)
where
    T: Send,
    F: Fn(&mut T) + Send + Sync,
{
    if workers <= 1 || items.len() <= 1 {
        for item in items {
            f(item);
        }
        return;
    }

    let pool_size = workers.min(items.len());
    let queue = Mutex::new(items.iter_mut());
    thread::scope(|scope| {
        for _ in 0..pool_size {
            scope.spawn(|| {
                loop {
                    let next = {
                        let mut guard = match queue.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        guard.next()
                    };
                    match next {
                        Some(item) => f(item),
                        None => break,
                    }
                }
            });
        }
    });
}

fn pool_width(run: &RunConfig) -> usize {
    if run.parallel { run.workers } else { 1 }
}

/// Run every metric instance in place. Instances pair with their defs by
/// index.
pub fn run_metrics(
    defs: &[MetricDef],
    metrics: &mut [Metric],
    target: &ScopeTarget,
    ctx: &RunContext,
    run: &RunConfig,
) {
    let mut jobs: Vec<(usize, &mut Metric)> = metrics.iter_mut().enumerate().collect();
    for_each_parallel(&mut jobs, pool_width(run), |(index, metric)| {
        safe_run_metric(metric, &defs[*index], target, ctx);
    });
}

/// Run every check instance in place, against the already-run metrics.
pub fn run_checks(
    defs: &[CheckDef],
    checks: &mut [Check],
    metrics: &[Metric],
    target: &ScopeTarget,
    ctx: &RunContext,
    run: &RunConfig,
) {
    let lookup = MetricLookup::new(metrics);
    let mut jobs: Vec<(usize, &mut Check)> = checks.iter_mut().enumerate().collect();
    for_each_parallel(&mut jobs, pool_width(run), |(index, check)| {
        safe_run_check(check, &defs[*index], target, ctx, &lookup);
    });
}
