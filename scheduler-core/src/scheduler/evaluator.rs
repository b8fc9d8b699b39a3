/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The Assignment Evaluator: parallel `tryTask` fan-out for one task against
//! its candidate hosts (spec.md §4.5).

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use threadpool::ThreadPool;
use tracing::{error, warn};

use crate::constraint::{FitnessCalculator, GoodEnoughPredicate};
use crate::host::Host;
use crate::offer::Offer;
use crate::task::{AssignmentFailureReason, AssignmentResult, TaskRequest};
use crate::tracker::TaskTrackerSnapshot;

/// Candidate host data copied out of the [`HostRegistry`](crate::host::HostRegistry)
/// and [`OfferStore`](crate::offer::OfferStore) before fan-out, so worker
/// closures own everything they touch instead of borrowing across threads.
pub struct Candidate {
    pub hostname: String,
    pub host: Host,
    pub offers: Vec<Offer>,
}

const CHUNK_SIZE: usize = 10;
const HOSTS_PER_WORKER: usize = 30;

/// Outcome of evaluating one task against all its candidates.
pub struct EvaluationOutcome {
    pub best: Option<(AssignmentResult, Host)>,
    pub failures: Vec<AssignmentFailureReason>,
    pub trials: usize,
}

struct WorkerReport {
    best: Option<(AssignmentResult, Host)>,
    failures: Vec<AssignmentFailureReason>,
    trials: usize,
}

/// Evaluates one task against the current ordered set of candidate hosts,
/// in parallel (spec.md §4.5).
///
/// Workers (`ceil(|candidates| / 30)`, capped at the pool size) drain a
/// shared queue of 10-host chunks. The moment any worker finds a result
/// that satisfies `good_enough`, it signals the others to stop picking up
/// *new* chunks — each worker still finishes whatever chunk it already
/// holds, a best-effort, non-cancelling signal (spec.md §9).
pub struct AssignmentEvaluator {
    pool: ThreadPool,
    pool_size: usize,
}

impl AssignmentEvaluator {
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            pool: ThreadPool::new(pool_size),
            pool_size,
        }
    }

    pub fn evaluate(
        &self,
        task: Arc<TaskRequest>,
        candidates: Vec<Candidate>,
        tracker: TaskTrackerSnapshot,
        fitness_calculator: FitnessCalculator,
        good_enough: GoodEnoughPredicate,
    ) -> EvaluationOutcome {
        if candidates.is_empty() {
            return EvaluationOutcome {
                best: None,
                failures: Vec::new(),
                trials: 0,
            };
        }

        let worker_count = candidates
            .len()
            .div_ceil(HOSTS_PER_WORKER)
            .min(self.pool_size)
            .max(1);

        let chunks: VecDeque<Vec<Candidate>> = candidates
            .into_iter()
            .collect::<Vec<_>>()
            .chunks(CHUNK_SIZE)
            .map(|c| c.to_vec_owned())
            .collect();

        let queue = Arc::new(Mutex::new(chunks));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<WorkerReport>();

        for _ in 0..worker_count {
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            let tx = tx.clone();
            let task = Arc::clone(&task);
            let tracker = tracker.clone();
            let fitness_calculator = fitness_calculator.clone();
            let good_enough = good_enough.clone();

            self.pool.execute(move || {
                let report = Self::run_worker(&queue, &stop, &task, &tracker, &fitness_calculator, &good_enough);
                let _ = tx.send(report);
            });
        }
        drop(tx);

        let mut best: Option<(AssignmentResult, Host)> = None;
        let mut failures = Vec::new();
        let mut trials = 0usize;

        for report in rx.iter().take(worker_count) {
            trials += report.trials;
            failures.extend(report.failures);
            if let Some((candidate_result, candidate_host)) = report.best {
                let replace = match &best {
                    // Ties broken by later-scanned wins — an acceptable
                    // non-determinism documented as such (spec.md §4.5).
                    Some((current, _)) => candidate_result.fitness >= current.fitness,
                    None => true,
                };
                if replace {
                    best = Some((candidate_result, candidate_host));
                }
            }
        }

        EvaluationOutcome { best, failures, trials }
    }

    fn run_worker(
        queue: &Mutex<VecDeque<Vec<Candidate>>>,
        stop: &AtomicBool,
        task: &TaskRequest,
        tracker: &TaskTrackerSnapshot,
        fitness_calculator: &FitnessCalculator,
        good_enough: &GoodEnoughPredicate,
    ) -> WorkerReport {
        let mut local_best: Option<(AssignmentResult, Host)> = None;
        let mut local_failures = Vec::new();
        let mut trials = 0usize;

        loop {
            let chunk = {
                let mut q = queue.lock().unwrap();
                if stop.load(Ordering::Relaxed) {
                    q.clear();
                }
                q.pop_front()
            };
            let Some(chunk) = chunk else { break };

            for candidate in chunk {
                trials += 1;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    candidate.host.try_task(task, &candidate.offers, tracker, fitness_calculator)
                }));

                let result = match outcome {
                    Ok(result) => result,
                    Err(payload) => {
                        let detail = payload
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "non-string panic payload".to_string());
                        error!(host = %candidate.hostname, detail = %detail, "constraint/fitness plugin panicked");
                        local_failures.push(AssignmentFailureReason::PluginPanicked { detail });
                        continue;
                    }
                };

                if result.successful {
                    let is_new_best = local_best
                        .as_ref()
                        .map(|(best, _)| result.fitness >= best.fitness)
                        .unwrap_or(true);
                    if is_new_best {
                        local_best = Some((result, candidate.host));
                    }
                } else {
                    local_failures.extend(result.failures);
                }
            }

            if let Some((best, _)) = &local_best {
                if good_enough.is_good_enough(best.fitness) {
                    stop.store(true, Ordering::Relaxed);
                }
            }
        }

        if local_failures.len() > 64 {
            warn!(count = local_failures.len(), "large number of per-host failures collected for one task");
        }

        WorkerReport {
            best: local_best,
            failures: local_failures,
            trials,
        }
    }
}

trait ToVecOwned {
    fn to_vec_owned(&self) -> Vec<Candidate>;
}

impl ToVecOwned for [Candidate] {
    fn to_vec_owned(&self) -> Vec<Candidate> {
        self.iter()
            .map(|c| Candidate {
                hostname: c.hostname.clone(),
                host: c.host.clone(),
                offers: c.offers.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceVector;

    fn candidate(hostname: &str, cpu: f64) -> Candidate {
        let host = Host::new(hostname);
        let offer = Offer::new(format!("{hostname}-o"), hostname, format!("{hostname}-vm"), ResourceVector::new(cpu, 0.0, 0.0, 0.0, 0.0));
        Candidate {
            hostname: hostname.to_string(),
            host,
            offers: vec![offer],
        }
    }

    #[test]
    fn picks_best_fitness_among_successes() {
        let evaluator = AssignmentEvaluator::new(4);
        let task = Arc::new(TaskRequest::new("t1", "default", ResourceVector::new(1.0, 0.0, 0.0, 0.0, 0.0)));
        let candidates = vec![candidate("h1", 4.0), candidate("h2", 4.0)];
        let fitness = FitnessCalculator::new(|_, host, _| if host.hostname == "h2" { 0.9 } else { 0.1 });

        let outcome = evaluator.evaluate(
            task,
            candidates,
            TaskTrackerSnapshot::empty(),
            fitness,
            GoodEnoughPredicate::default(),
        );
        let (best, _) = outcome.best.expect("expected a winner");
        assert_eq!(best.hostname, "h2");
    }

    #[test]
    fn returns_failures_when_nothing_fits() {
        let evaluator = AssignmentEvaluator::new(2);
        let task = Arc::new(TaskRequest::new("t1", "default", ResourceVector::new(100.0, 0.0, 0.0, 0.0, 0.0)));
        let candidates = vec![candidate("h1", 1.0), candidate("h2", 1.0)];

        let outcome = evaluator.evaluate(
            task,
            candidates,
            TaskTrackerSnapshot::empty(),
            FitnessCalculator::default(),
            GoodEnoughPredicate::default(),
        );
        assert!(outcome.best.is_none());
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.trials, 2);
    }

    #[test]
    fn empty_candidates_short_circuits() {
        let evaluator = AssignmentEvaluator::new(2);
        let task = Arc::new(TaskRequest::new("t1", "default", ResourceVector::zero()));
        let outcome = evaluator.evaluate(
            task,
            Vec::new(),
            TaskTrackerSnapshot::empty(),
            FitnessCalculator::default(),
            GoodEnoughPredicate::default(),
        );
        assert!(outcome.best.is_none());
        assert_eq!(outcome.trials, 0);
    }
}
