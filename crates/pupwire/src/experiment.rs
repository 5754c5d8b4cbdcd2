//! Run device commands as a timed sequence of steps.
//!
//! Steps start in the order they were added and run concurrently unless a step
//! is marked [`wait_for`](StepOptions::wait_for), in which case the experiment
//! waits for it and every step started before it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

type StepFuture = Pin<Box<dyn Future<Output = bool> + Send + 'static>>;

/// Timing of a single step.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct StepOptions {
    /// Pause before the command is issued
    pub delay_before: Duration,
    /// Pause after the command returned, before the step counts as done
    pub delay_after: Duration,
    /// Let no later step start before this one and all earlier ones are done
    pub wait_for: bool,
}

impl StepOptions {
    /// Options for a step the experiment waits for.
    pub fn wait() -> Self {
        Self { wait_for: true, ..Self::default() }
    }
}

struct Step {
    id: String,
    options: StepOptions,
    command: StepFuture,
}

/// An ordered list of device commands.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use pupwire::{Device, Direction, Experiment, MotionOptions, StepOptions};
/// # async fn run(motor: Arc<Device>) {
/// let report = Experiment::new("wiggle")
///     .step_with("left", StepOptions::wait(), {
///         let motor = motor.clone();
///         async move {
///             motor.start_move_for_degrees(90, 50, Direction::Forward, MotionOptions::default()).await
///         }
///     })
///     .step("right", async move {
///         motor.start_move_for_degrees(90, 50, Direction::Reverse, MotionOptions::default()).await
///     })
///     .run()
///     .await;
/// assert!(report.all_succeeded());
/// # }
/// ```
pub struct Experiment {
    name: String,
    steps: Vec<Step>,
}

impl Experiment {
    /// An experiment without steps.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), steps: Vec::new() }
    }

    /// Add a step that starts right away and is not waited for.
    pub fn step<F>(self, id: impl Into<String>, command: F) -> Self
    where
        F: Future<Output = bool> + Send + 'static,
    {
        self.step_with(id, StepOptions::default(), command)
    }

    /// Add a step with explicit timing.
    pub fn step_with<F>(mut self, id: impl Into<String>, options: StepOptions, command: F) -> Self
    where
        F: Future<Output = bool> + Send + 'static,
    {
        self.steps.push(Step { id: id.into(), options, command: Box::pin(command) });
        self
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if the experiment has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step and collect their results.
    ///
    /// Must be called within a tokio runtime. A step that panics counts as
    /// failed.
    pub async fn run(self) -> ExperimentReport {
        info!("Starting experiment {} with {} steps", self.name, self.steps.len());
        let mut report = ExperimentReport { name: self.name, results: HashMap::new() };
        let mut running = JoinSet::new();

        for Step { id, options, command } in self.steps {
            report.results.insert(id.clone(), false);
            debug!("Starting step {}", id);
            running.spawn(async move {
                tokio::time::sleep(options.delay_before).await;
                let succeeded = command.await;
                tokio::time::sleep(options.delay_after).await;
                (id, succeeded)
            });
            if options.wait_for {
                join_all(&mut running, &mut report).await;
            }
        }
        join_all(&mut running, &mut report).await;

        info!(
            "Experiment {} done, {} of {} steps succeeded",
            report.name,
            report.results.values().filter(|ok| **ok).count(),
            report.results.len()
        );
        report
    }
}

async fn join_all(running: &mut JoinSet<(String, bool)>, report: &mut ExperimentReport) {
    while let Some(joined) = running.join_next().await {
        match joined {
            Ok((id, succeeded)) => {
                debug!("Step {} finished: {}", id, succeeded);
                report.results.insert(id, succeeded);
            }
            Err(err) => error!("Step of {} did not finish: {}", report.name, err),
        }
    }
}

/// Outcome of an [`Experiment`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ExperimentReport {
    /// Name of the experiment
    pub name: String,
    /// Result of every step by id
    pub results: HashMap<String, bool>,
}

impl ExperimentReport {
    /// Result of the step `id`, `None` if there is no such step.
    pub fn get(&self, id: &str) -> Option<bool> {
        self.results.get(id).copied()
    }

    /// True if every step returned `true`.
    pub fn all_succeeded(&self) -> bool {
        self.results.values().all(|ok| *ok)
    }
}
