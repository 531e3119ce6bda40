//! Status state machine
//!
//! Derives an entity's lifecycle state from the last condition of its Run
//! and, while that condition is still `Unknown`, from the Run's pod:
//!
//! ```text
//!   ""  ──dispatch──▶ Scheduling ──pod running──▶ Running
//!                        │                           │
//!                        └──────┬────────────────────┘
//!                               ▼
//!                 Succeeded (condition True)
//!                 Failed    (condition False, or pod evicted)
//! ```
//!
//! A pod that already reached `Succeeded`/`Failed` while the Run condition
//! is still `Unknown` yields no new state: the Run condition settles on a
//! later pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kiln_common::crd::{EntityState, EntityStatus};

/// Pod status reason set by the kubelet on eviction
pub const EVICTED_REASON: &str = "Evicted";

/// Status reason recorded on an entity whose pod was evicted
pub const POD_EVICTED_REASON: &str = "Pod evicted";

/// Status of a Run condition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The Run completed successfully
    True,
    /// The Run failed (including timeouts)
    False,
    /// The Run is still in progress
    #[default]
    Unknown,
}

/// One condition of a Run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCondition {
    /// Condition status
    pub status: ConditionStatus,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// What the execution backend reports about a Run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunObservation {
    /// Conditions in the order reported; the last one is authoritative
    pub conditions: Vec<RunCondition>,
    /// Pod executing the Run, once assigned
    pub pod_name: Option<String>,
}

impl RunObservation {
    /// The authoritative condition
    pub fn last_condition(&self) -> Option<&RunCondition> {
        self.conditions.last()
    }
}

/// Pod lifecycle phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PodPhase {
    /// Accepted, containers not running yet
    Pending,
    /// At least one container running
    Running,
    /// All containers exited successfully
    Succeeded,
    /// All containers exited, at least one failed
    Failed,
    /// Phase could not be determined
    #[default]
    Unknown,
}

impl PodPhase {
    /// Parse the `status.phase` string of a Pod
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// What the cluster reports about a Run's pod
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodObservation {
    /// Pod phase
    pub phase: PodPhase,
    /// Pod status reason (e.g. "Evicted")
    pub reason: Option<String>,
    /// Pod status message
    pub message: Option<String>,
    /// Exit code of the first terminated container
    pub exit_code: Option<i32>,
}

/// Result of one state derivation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Derivation {
    /// New lifecycle state
    pub state: EntityState,
    /// Machine-readable reason, cleared when `None`
    pub reason: Option<String>,
    /// Human-readable message, cleared when `None`
    pub message: Option<String>,
    /// Pod executing the Run, kept when `None`
    pub pod_name: Option<String>,
    /// Exit code of the job container, kept when `None`
    pub exit_code: Option<i32>,
    /// Whether results should be captured from the result store
    pub capture_results: bool,
}

impl Derivation {
    fn new(state: EntityState) -> Self {
        Self {
            state,
            reason: None,
            message: None,
            pod_name: None,
            exit_code: None,
            capture_results: false,
        }
    }
}

/// Derive the entity state from its Run and the Run's pod
///
/// `run` is `None` right after dispatch. Returns `None` when the
/// observation carries no new information and the current status stands.
pub fn derive_state(
    run: Option<&RunObservation>,
    pod: Option<&PodObservation>,
) -> Option<Derivation> {
    let Some(run) = run else {
        return Some(Derivation::new(EntityState::Scheduling));
    };
    let pod_name = run.pod_name.clone();
    let exit_code = pod.and_then(|p| p.exit_code);

    let Some(condition) = run.last_condition() else {
        return Some(Derivation {
            pod_name,
            ..Derivation::new(EntityState::Scheduling)
        });
    };

    let derivation = match condition.status {
        ConditionStatus::True => Derivation {
            reason: condition.reason.clone(),
            message: condition.message.clone(),
            exit_code,
            capture_results: true,
            ..Derivation::new(EntityState::Succeeded)
        },
        ConditionStatus::False => Derivation {
            reason: condition.reason.clone(),
            message: condition.message.clone(),
            exit_code,
            ..Derivation::new(EntityState::Failed)
        },
        ConditionStatus::Unknown => {
            let Some(pod) = pod.filter(|_| pod_name.is_some()) else {
                return Some(Derivation {
                    pod_name,
                    ..Derivation::new(EntityState::Scheduling)
                });
            };
            if pod.reason.as_deref() == Some(EVICTED_REASON) {
                Derivation {
                    reason: Some(POD_EVICTED_REASON.to_string()),
                    message: pod.message.clone(),
                    exit_code,
                    ..Derivation::new(EntityState::Failed)
                }
            } else {
                match pod.phase {
                    PodPhase::Pending | PodPhase::Unknown => {
                        Derivation::new(EntityState::Scheduling)
                    }
                    PodPhase::Running => Derivation::new(EntityState::Running),
                    PodPhase::Succeeded | PodPhase::Failed => return None,
                }
            }
        }
    };

    Some(Derivation {
        pod_name,
        ..derivation
    })
}

/// Merge a derivation into the current status
///
/// `created_at` is stamped when the entity first leaves the initial state;
/// `updated_at` only when something observable changed.
pub fn apply_derivation(
    current: Option<&EntityStatus>,
    derivation: &Derivation,
    now: DateTime<Utc>,
) -> EntityStatus {
    let previous = current.cloned().unwrap_or_default();
    let mut next = previous.clone();

    next.state = derivation.state;
    next.reason = derivation.reason.clone();
    next.message = derivation.message.clone();
    if derivation.pod_name.is_some() {
        next.pod_name = derivation.pod_name.clone();
    }
    if derivation.exit_code.is_some() {
        next.exit_code = derivation.exit_code;
    }
    if next.created_at.is_none() && next.state.is_set() {
        next.created_at = Some(now);
    }
    if !next.same_observation(&previous) {
        next.updated_at = Some(now);
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(status: ConditionStatus) -> RunCondition {
        RunCondition {
            status,
            ..Default::default()
        }
    }

    fn run(conditions: Vec<RunCondition>, pod_name: Option<&str>) -> RunObservation {
        RunObservation {
            conditions,
            pod_name: pod_name.map(str::to_string),
        }
    }

    fn pod(phase: PodPhase) -> PodObservation {
        PodObservation {
            phase,
            ..Default::default()
        }
    }

    fn state_of(run: &RunObservation, pod: Option<&PodObservation>) -> EntityState {
        derive_state(Some(run), pod).unwrap().state
    }

    #[test]
    fn fresh_dispatch_is_scheduling() {
        let d = derive_state(None, None).unwrap();
        assert_eq!(d.state, EntityState::Scheduling);
        assert!(!d.capture_results);
    }

    #[test]
    fn run_without_conditions_is_scheduling() {
        assert_eq!(state_of(&run(vec![], None), None), EntityState::Scheduling);
    }

    #[test]
    fn true_condition_succeeds_and_captures_results() {
        let r = run(
            vec![RunCondition {
                status: ConditionStatus::True,
                reason: Some("exit code 0".into()),
                message: Some("Emulated success".into()),
            }],
            Some("wine-pod"),
        );
        let d = derive_state(Some(&r), None).unwrap();
        assert_eq!(d.state, EntityState::Succeeded);
        assert_eq!(d.reason.as_deref(), Some("exit code 0"));
        assert_eq!(d.message.as_deref(), Some("Emulated success"));
        assert!(d.capture_results);
    }

    #[test]
    fn false_condition_fails_with_condition_message() {
        let r = run(
            vec![
                cond(ConditionStatus::Unknown),
                RunCondition {
                    status: ConditionStatus::False,
                    reason: Some("TaskRunTimeout".into()),
                    message: Some("timed out".into()),
                },
            ],
            Some("wine-pod"),
        );
        let d = derive_state(Some(&r), None).unwrap();
        assert_eq!(d.state, EntityState::Failed);
        assert_eq!(d.reason.as_deref(), Some("TaskRunTimeout"));
        assert!(!d.capture_results);
    }

    #[test]
    fn only_the_last_condition_counts() {
        let r = run(
            vec![cond(ConditionStatus::False), cond(ConditionStatus::True)],
            None,
        );
        assert_eq!(state_of(&r, None), EntityState::Succeeded);
    }

    #[test]
    fn evicted_pod_fails_the_entity() {
        let r = run(vec![cond(ConditionStatus::Unknown)], Some("wine-pod"));
        let p = PodObservation {
            phase: PodPhase::Failed,
            reason: Some("Evicted".into()),
            message: Some("Pod was evicted".into()),
            exit_code: None,
        };
        let d = derive_state(Some(&r), Some(&p)).unwrap();
        assert_eq!(d.state, EntityState::Failed);
        assert_eq!(d.reason.as_deref(), Some("Pod evicted"));
        assert_eq!(d.message.as_deref(), Some("Pod was evicted"));
    }

    #[test]
    fn eviction_preempts_phase() {
        let r = run(vec![cond(ConditionStatus::Unknown)], Some("wine-pod"));
        let p = PodObservation {
            reason: Some("Evicted".into()),
            ..pod(PodPhase::Running)
        };
        assert_eq!(state_of(&r, Some(&p)), EntityState::Failed);
    }

    #[test]
    fn running_pod_is_running() {
        let r = run(vec![cond(ConditionStatus::Unknown)], Some("wine-pod"));
        let d = derive_state(Some(&r), Some(&pod(PodPhase::Running))).unwrap();
        assert_eq!(d.state, EntityState::Running);
        assert_eq!(d.reason, None);
        assert_eq!(d.message, None);
        assert_eq!(d.pod_name.as_deref(), Some("wine-pod"));
    }

    #[test]
    fn pending_or_unknown_pod_is_scheduling() {
        let r = run(vec![cond(ConditionStatus::Unknown)], Some("wine-pod"));
        for phase in [PodPhase::Pending, PodPhase::Unknown] {
            assert_eq!(state_of(&r, Some(&pod(phase))), EntityState::Scheduling);
        }
    }

    #[test]
    fn no_pod_name_is_scheduling() {
        let r = run(vec![cond(ConditionStatus::Unknown)], None);
        assert_eq!(state_of(&r, None), EntityState::Scheduling);
        // A stray pod observation without an assigned pod is ignored.
        assert_eq!(
            state_of(&r, Some(&pod(PodPhase::Running))),
            EntityState::Scheduling
        );
    }

    #[test]
    fn terminal_pod_under_unknown_condition_waits_for_the_run() {
        let r = run(vec![cond(ConditionStatus::Unknown)], Some("wine-pod"));
        assert_eq!(derive_state(Some(&r), Some(&pod(PodPhase::Succeeded))), None);
        assert_eq!(derive_state(Some(&r), Some(&pod(PodPhase::Failed))), None);
    }

    #[test]
    fn exit_code_is_kept_on_terminal_states_only() {
        let p = PodObservation {
            exit_code: Some(3),
            ..pod(PodPhase::Failed)
        };
        let failed = run(vec![cond(ConditionStatus::False)], Some("wine-pod"));
        assert_eq!(derive_state(Some(&failed), Some(&p)).unwrap().exit_code, Some(3));

        let p = PodObservation {
            exit_code: Some(3),
            ..pod(PodPhase::Running)
        };
        let running = run(vec![cond(ConditionStatus::Unknown)], Some("wine-pod"));
        assert_eq!(derive_state(Some(&running), Some(&p)).unwrap().exit_code, None);
    }

    #[test]
    fn apply_stamps_created_at_once() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(30);

        let scheduling = apply_derivation(None, &Derivation::new(EntityState::Scheduling), t0);
        assert_eq!(scheduling.created_at, Some(t0));
        assert_eq!(scheduling.updated_at, Some(t0));

        let running = apply_derivation(
            Some(&scheduling),
            &Derivation::new(EntityState::Running),
            t1,
        );
        assert_eq!(running.created_at, Some(t0));
        assert_eq!(running.updated_at, Some(t1));
    }

    #[test]
    fn apply_without_change_keeps_updated_at() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(30);
        let running = apply_derivation(None, &Derivation::new(EntityState::Running), t0);
        let again = apply_derivation(Some(&running), &Derivation::new(EntityState::Running), t1);
        assert_eq!(again, running);
    }

    #[test]
    fn apply_clears_stale_reason_and_keeps_pod_name() {
        let t0 = Utc::now();
        let current = EntityStatus {
            pod_name: Some("wine-pod".into()),
            ..EntityStatus::with_state(EntityState::Scheduling).reason("Pending")
        };
        let next = apply_derivation(Some(&current), &Derivation::new(EntityState::Running), t0);
        assert_eq!(next.reason, None);
        assert_eq!(next.pod_name.as_deref(), Some("wine-pod"));
    }
}
