//! Phase scheduling.
//!
//! A run follows a fixed timeline measured from the moment the scheduler starts:
//!
//! | offset    | action                                                     |
//! |-----------|------------------------------------------------------------|
//! | 0         | start ticking the traffic generator                        |
//! | 7 units   | set the fault flag, send the fault marker                  |
//! | 10 units  | clear the fault flag, send the rollback marker             |
//! | 11 units  | stop ticking                                               |
//!
//! The unit is one minute in normal operation. Phases fire exactly once, in order, and a failure in any downstream
//! call never stops the timeline.
//!
//! Requests dispatched by ticks run on their own tasks. Stopping the traffic stops new ticks from firing, but requests
//! already in flight are left to finish on their own, and may be cut short if the process exits right afterwards.

use std::{sync::Arc, time::Duration};

use snafu::{ensure, OptionExt as _, Snafu};
use tokio::{
    select,
    task::JoinHandle,
    time::{interval_at, sleep_until, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    fault::FaultState,
    marker::MarkerNotifier,
    traffic::{RequestTarget, TrafficGenerator},
};

/// Marker message sent when the fault window opens.
pub const FAULT_MARKER_MESSAGE: &str = "Add in new products to the store";

/// Marker message sent when the fault window closes.
pub const ROLLBACK_MARKER_MESSAGE: &str = "(Rollback) Add in new products to the store";

const FAULT_START_UNITS: u32 = 7;
const FAULT_END_UNITS: u32 = 10;
const STOP_UNITS: u32 = 11;

/// Phase plan error.
#[derive(Debug, Eq, PartialEq, Snafu)]
#[snafu(context(suffix(false)))]
pub enum PlanError {
    /// The plan has no phases.
    #[snafu(display("phase plan must not be empty"))]
    Empty,

    /// A phase is scheduled earlier than the phase before it.
    #[snafu(display("phase {} is scheduled before the phase preceding it", index))]
    OutOfOrder {
        /// Index of the offending phase.
        index: usize,
    },

    /// The plan does not start traffic exactly once, as its first phase.
    #[snafu(display("phase plan must start traffic exactly once, as its first phase"))]
    MissingStart,

    /// The plan does not stop traffic exactly once, as its last phase.
    #[snafu(display("phase plan must stop traffic exactly once, as its last phase"))]
    MissingStop,

    /// A phase offset does not fit in a `Duration`.
    #[snafu(display("offset of {} units overflows", units))]
    OffsetOverflow {
        /// Offset, in units.
        units: u32,
    },

    /// Fault phases do not alternate between injecting and resolving, starting with injecting.
    #[snafu(display("fault phase {} does not alternate with the previous fault phase", index))]
    UnbalancedFault {
        /// Index of the offending phase.
        index: usize,
    },
}

/// What happens when a phase fires.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PhaseAction {
    /// Start ticking the traffic generator.
    StartTraffic,

    /// Set the fault flag and send a marker with the given message.
    InjectFault {
        /// Marker message.
        marker: String,
    },

    /// Clear the fault flag and send a marker with the given message.
    ResolveFault {
        /// Marker message.
        marker: String,
    },

    /// Stop ticking the traffic generator.
    StopTraffic,
}

impl PhaseAction {
    fn name(&self) -> &'static str {
        match self {
            Self::StartTraffic => "start_traffic",
            Self::InjectFault { .. } => "inject_fault",
            Self::ResolveFault { .. } => "resolve_fault",
            Self::StopTraffic => "stop_traffic",
        }
    }
}

/// A single phase: an action and when it fires, relative to the start of the run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Phase {
    /// Offset from the start of the run.
    pub offset: Duration,

    /// Action to take.
    pub action: PhaseAction,
}

impl Phase {
    fn new(offset: Duration, action: PhaseAction) -> Self {
        Self { offset, action }
    }
}

/// An ordered, validated list of phases.
#[derive(Clone, Debug)]
pub struct PhasePlan {
    phases: Vec<Phase>,
}

impl PhasePlan {
    /// Creates the standard plan, with every offset a multiple of `unit`.
    ///
    /// # Errors
    ///
    /// If `unit` is so large that the phase offsets overflow, an error is returned.
    pub fn standard(unit: Duration) -> Result<Self, PlanError> {
        let offset = |units: u32| unit.checked_mul(units).context(OffsetOverflow { units });

        Self::new(vec![
            Phase::new(Duration::ZERO, PhaseAction::StartTraffic),
            Phase::new(
                offset(FAULT_START_UNITS)?,
                PhaseAction::InjectFault {
                    marker: FAULT_MARKER_MESSAGE.to_string(),
                },
            ),
            Phase::new(
                offset(FAULT_END_UNITS)?,
                PhaseAction::ResolveFault {
                    marker: ROLLBACK_MARKER_MESSAGE.to_string(),
                },
            ),
            Phase::new(offset(STOP_UNITS)?, PhaseAction::StopTraffic),
        ])
    }

    /// Creates a plan from the given phases.
    ///
    /// # Errors
    ///
    /// If the phases are empty, out of order, do not start traffic first and stop it last, or do not alternate fault
    /// injection and resolution, an error is returned.
    pub fn new(phases: Vec<Phase>) -> Result<Self, PlanError> {
        ensure!(!phases.is_empty(), Empty);

        for (index, pair) in phases.windows(2).enumerate() {
            ensure!(pair[0].offset <= pair[1].offset, OutOfOrder { index: index + 1 });
        }

        let starts = phases.iter().filter(|p| p.action == PhaseAction::StartTraffic).count();
        ensure!(starts == 1 && phases[0].action == PhaseAction::StartTraffic, MissingStart);

        let stops = phases.iter().filter(|p| p.action == PhaseAction::StopTraffic).count();
        ensure!(
            stops == 1 && phases[phases.len() - 1].action == PhaseAction::StopTraffic,
            MissingStop
        );

        let mut fault_active = false;
        for (index, phase) in phases.iter().enumerate() {
            match phase.action {
                PhaseAction::InjectFault { .. } => {
                    ensure!(!fault_active, UnbalancedFault { index });
                    fault_active = true;
                }
                PhaseAction::ResolveFault { .. } => {
                    ensure!(fault_active, UnbalancedFault { index });
                    fault_active = false;
                }
                _ => {}
            }
        }

        Ok(Self { phases })
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScheduleOutcome {
    /// Every phase fired.
    Completed,

    /// The run was interrupted before every phase fired.
    Interrupted,
}

/// Summary of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScheduleReport {
    /// How the run ended.
    pub outcome: ScheduleOutcome,

    /// Number of ticks that fired.
    pub ticks: u64,
}

struct RunningTraffic {
    stop: CancellationToken,
    task: JoinHandle<u64>,
}

impl RunningTraffic {
    async fn stop(self) -> u64 {
        self.stop.cancel();
        match self.task.await {
            Ok(ticks) => ticks,
            Err(e) => {
                warn!(error = %e, "Traffic task did not stop cleanly.");
                0
            }
        }
    }
}

/// Drives a [`PhasePlan`].
pub struct PhaseScheduler<T, N> {
    plan: PhasePlan,
    fault: FaultState,
    generator: TrafficGenerator<T>,
    notifier: Arc<N>,
    tick_interval: Duration,
}

impl<T, N> PhaseScheduler<T, N>
where
    T: RequestTarget,
    N: MarkerNotifier,
{
    /// Creates a new `PhaseScheduler`.
    ///
    /// `fault` should be the same flag the generator reads.
    pub fn new(
        plan: PhasePlan, fault: FaultState, generator: TrafficGenerator<T>, notifier: Arc<N>, tick_interval: Duration,
    ) -> Self {
        Self {
            plan,
            fault,
            generator,
            notifier,
            tick_interval,
        }
    }

    /// Runs every phase of the plan in order, returning once the last phase has fired.
    ///
    /// If `shutdown` is cancelled first, traffic is stopped and the run ends early.
    pub async fn run(self, shutdown: CancellationToken) -> ScheduleReport {
        let Self {
            plan,
            fault,
            generator,
            notifier,
            tick_interval,
        } = self;

        let start = Instant::now();
        let mut generator = Some(generator);
        let mut traffic: Option<RunningTraffic> = None;
        let mut ticks = 0;

        for phase in plan.phases {
            select! {
                _ = sleep_until(start + phase.offset) => {}
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping traffic generation early.");
                    if let Some(traffic) = traffic.take() {
                        ticks += traffic.stop().await;
                    }
                    return ScheduleReport {
                        outcome: ScheduleOutcome::Interrupted,
                        ticks,
                    };
                }
            }

            info!(offset = ?phase.offset, action = phase.action.name(), "Entering phase.");

            match phase.action {
                PhaseAction::StartTraffic => {
                    if let Some(generator) = generator.take() {
                        traffic = Some(start_traffic(generator, tick_interval));
                    }
                }
                PhaseAction::InjectFault { marker } => {
                    fault.set(true);
                    emit_marker(&notifier, marker);
                }
                PhaseAction::ResolveFault { marker } => {
                    fault.set(false);
                    emit_marker(&notifier, marker);
                }
                PhaseAction::StopTraffic => {
                    if let Some(traffic) = traffic.take() {
                        ticks += traffic.stop().await;
                    }
                    info!(ticks, "Traffic generation stopped");
                }
            }
        }

        ScheduleReport {
            outcome: ScheduleOutcome::Completed,
            ticks,
        }
    }
}

fn start_traffic<T: RequestTarget>(mut generator: TrafficGenerator<T>, period: Duration) -> RunningTraffic {
    let stop = CancellationToken::new();
    let task_stop = stop.clone();

    let task = tokio::spawn(async move {
        // The first tick fires one full period after traffic starts, not immediately.
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = 0;
        loop {
            select! {
                biased;
                _ = task_stop.cancelled() => break,
                _ = ticker.tick() => {
                    // Dispatch handles are intentionally dropped: in-flight requests are not awaited.
                    let _ = generator.tick();
                    ticks += 1;
                }
            }
        }

        ticks
    });

    RunningTraffic { stop, task }
}

fn emit_marker<N: MarkerNotifier>(notifier: &Arc<N>, message: String) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.send_marker(&message).await {
            warn!(marker = %message, "Failed to send marker: {:#}", e);
        }
    });
}
