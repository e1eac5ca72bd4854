/// Restart dispatch: reconciles the configured targets against supervisord's
/// live process list and bounces every matching RUNNING process.
///
/// Every attempt fetches a fresh process list; nothing is cached between
/// ticks.  Each candidate gets at most one stop + start per call and failures
/// are reported, never retried.
use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;

use crate::supervisor::{ControlError, ProcessControl, ProcessState};

/// Which processes a restart applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessTargets {
    /// Every RUNNING process known to supervisord.
    Any,
    /// Bare program names or `group:name` namespecs.
    Named(BTreeSet<String>),
}

impl ProcessTargets {
    fn matches(&self, name: &str, namespec: &str) -> bool {
        match self {
            ProcessTargets::Any => true,
            ProcessTargets::Named(names) => names.contains(name) || names.contains(namespec),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    Restarted,
    /// The process matched but was not RUNNING; nothing was done.
    NotRunning(ProcessState),
    /// Stop failed; the start that followed succeeded.
    StopFailed(String),
    StartFailed(String),
    /// A named target matched no live process.
    NotFound,
}

/// Per-identifier results of one restart attempt, in process-list order
/// followed by unmatched targets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestartReport {
    pub outcomes: Vec<(String, RestartOutcome)>,
}

impl RestartReport {
    #[cfg(test)]
    pub fn outcome(&self, id: &str) -> Option<&RestartOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == id)
            .map(|(_, outcome)| outcome)
    }

    pub fn restarted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, RestartOutcome::Restarted | RestartOutcome::StopFailed(_)))
            .count()
    }

    pub fn not_found(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == RestartOutcome::NotFound)
            .map(|(name, _)| name.as_str())
    }
}

pub struct RestartDispatcher<C> {
    control: C,
    targets: ProcessTargets,
    /// Upper bound of the random delay taken before contacting supervisord.
    dither: Option<Duration>,
}

impl<C: ProcessControl> RestartDispatcher<C> {
    pub fn new(control: C, targets: ProcessTargets, dither: Option<Duration>) -> Self {
        Self {
            control,
            targets,
            dither,
        }
    }

    /// Restarts every matching RUNNING process.
    ///
    /// Returns `Err` only when the process list could not be fetched, in which
    /// case no stop or start was attempted.
    pub async fn restart(&self) -> Result<RestartReport, ControlError> {
        if let Some(max) = self.dither {
            let delay = dither_delay(max);
            tracing::debug!("[restart] Dithering for {delay:?}");
            tokio::time::sleep(delay).await;
        }

        let processes = match self.control.all_process_info().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("[restart] Unable to get process info: {e}. No action taken.");
                return Err(e);
            }
        };

        let mut waiting = match &self.targets {
            ProcessTargets::Any => BTreeSet::new(),
            ProcessTargets::Named(names) => names.clone(),
        };
        let mut report = RestartReport::default();

        for process in &processes {
            let namespec = process.namespec();
            if !self.targets.matches(&process.name, &namespec) {
                continue;
            }
            waiting.remove(&process.name);
            waiting.remove(&namespec);

            let outcome = if process.state == ProcessState::Running {
                self.bounce(&namespec).await
            } else {
                tracing::warn!(
                    "[restart] Process {namespec} is not in RUNNING state ({}: {}), no action taken",
                    process.state.name(),
                    process.description
                );
                RestartOutcome::NotRunning(process.state)
            };
            report.outcomes.push((namespec, outcome));
        }

        if !waiting.is_empty() {
            let names: Vec<&str> = waiting.iter().map(String::as_str).collect();
            tracing::warn!(
                "[restart] Programs specified could not be found: {}",
                names.join(", ")
            );
            report
                .outcomes
                .extend(waiting.into_iter().map(|name| (name, RestartOutcome::NotFound)));
        }

        Ok(report)
    }

    /// Stops then starts one process. The start is attempted even when the
    /// stop fails, since the process may have exited on its own in between.
    async fn bounce(&self, namespec: &str) -> RestartOutcome {
        tracing::info!("[restart] Restarting process: {namespec}");

        let stop_error = match self.control.stop_process(namespec).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!("[restart] Unable to stop process {namespec}: {e}");
                Some(e.to_string())
            }
        };

        match self.control.start_process(namespec).await {
            Err(e) => {
                tracing::error!("[restart] Unable to start process {namespec}: {e}");
                RestartOutcome::StartFailed(e.to_string())
            }
            Ok(()) => {
                tracing::info!("[restart] Restarted process {namespec}");
                match stop_error {
                    Some(reason) => RestartOutcome::StopFailed(reason),
                    None => RestartOutcome::Restarted,
                }
            }
        }
    }
}

/// Uniformly random duration in `[0, max]`.
fn dither_delay(max: Duration) -> Duration {
    max.mul_f64(rand::thread_rng().gen_range(0.0..=1.0))
}
