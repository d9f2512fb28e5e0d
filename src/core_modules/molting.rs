// THEORY:
// A larva about to molt goes quiet for many hours, then bursts back into
// activity once the old skin is shed. The `MoltingMachine` watches the movement
// index for exactly that shape. It is the engine's central stateful component,
// and like a smart chunk it learns what "normal" looks like before deciding that
// the present is unusual.
//
// Key principles:
// 1.  **Adaptive baseline**: an exponentially smoothed movement index (α = 0.06)
//     per stage. Stillness is judged relative to this baseline (the drop ratio)
//     as well as against the stage's absolute molting band.
// 2.  **Hysteresis through dwell time**: a single quiet sample only makes the
//     machine suspicious (PRE_MOLTING). It must stay quiet for the stage's
//     minimum hours before it commits to MOLTING.
// 3.  **Explicit transitions**: `next_state` is a pure function of the current
//     state and the facts of this cycle, testable without any clock or I/O.
// 4.  **Stage changes start over**: a new stage means new bands, so the state
//     and the baseline are cleared.
//
// The "max duration exceeded" flag is reported for operators. It never drives a
// transition.

use crate::core_modules::stage_thresholds::{molting_thresholds, MoltingThresholds};
use crate::core_modules::utils::time::ms_to_iso;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

const BASELINE_ALPHA: f64 = 0.06;
const BASELINE_FLOOR: f64 = 1e-6;
const POST_MOLTING_DWELL_SECS: i64 = 2 * 3600;
/// Activity above `molting_high * REBOUND_FACTOR` marks the end of a molt.
const REBOUND_FACTOR: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MoltingState {
    #[default]
    Normal,
    PreMolting,
    Molting,
    PostMolting,
}

impl MoltingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoltingState::Normal => "NORMAL",
            MoltingState::PreMolting => "PRE_MOLTING",
            MoltingState::Molting => "MOLTING",
            MoltingState::PostMolting => "POST_MOLTING",
        }
    }

    /// States during which an overlong dwell is worth flagging.
    fn is_watching_duration(&self) -> bool {
        matches!(self, MoltingState::PreMolting | MoltingState::Molting)
    }
}

impl fmt::Display for MoltingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The facts of one cycle that the transition function needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionInput {
    pub movement_index: f64,
    /// Movement inside the molting band with a large enough drop below baseline.
    pub molting_candidate: bool,
    /// Whole seconds spent in the current state.
    pub dwell_secs: i64,
    pub min_molting_dwell_secs: i64,
    pub molting_high: f64,
}

/// Pure transition function. Any condition not listed leaves the state alone.
pub fn next_state(state: MoltingState, input: &TransitionInput) -> MoltingState {
    match state {
        MoltingState::Normal if input.molting_candidate => MoltingState::PreMolting,
        MoltingState::PreMolting if !input.molting_candidate => MoltingState::Normal,
        MoltingState::PreMolting if input.dwell_secs >= input.min_molting_dwell_secs => MoltingState::Molting,
        MoltingState::Molting if input.movement_index > input.molting_high * REBOUND_FACTOR => {
            MoltingState::PostMolting
        }
        MoltingState::PostMolting if input.dwell_secs >= POST_MOLTING_DWELL_SECS => MoltingState::Normal,
        unchanged => unchanged,
    }
}

/// Report of the machine at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoltingSnapshot {
    pub state: MoltingState,
    pub since_ts_ms: Option<i64>,
    pub since_iso: Option<String>,
    pub updated_ts_ms: i64,
    pub updated_iso: Option<String>,
    pub duration_sec: i64,
    pub stage: Option<String>,
    pub baseline_mi: Option<f64>,
    /// Clamped movement index used by the update that produced this snapshot.
    pub movement_index: Option<f64>,
    pub drop_ratio: Option<f64>,
    pub max_duration_exceeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<MoltingThresholds>,
}

#[derive(Debug, Clone, Default)]
pub struct MoltingMachine {
    state: MoltingState,
    since_ts_ms: Option<i64>,
    stage_key: String,
    baseline_mi: Option<f64>,
}

impl MoltingMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MoltingState {
        self.state
    }

    pub fn baseline_mi(&self) -> Option<f64> {
        self.baseline_mi
    }

    pub fn stage_key(&self) -> &str {
        &self.stage_key
    }

    pub fn reset(&mut self) {
        self.state = MoltingState::Normal;
        self.since_ts_ms = None;
        self.stage_key.clear();
        self.baseline_mi = None;
    }

    fn clear_progress(&mut self) {
        self.state = MoltingState::Normal;
        self.since_ts_ms = None;
        self.baseline_mi = None;
    }

    fn dwell_secs(&self, ts_ms: i64) -> i64 {
        match self.since_ts_ms {
            Some(since) => (ts_ms - since).div_euclid(1000).max(0),
            None => 0,
        }
    }

    /// Feeds one cycle into the machine.
    ///
    /// A missing movement index leaves every field untouched. An unknown stage
    /// holds the machine in NORMAL with no baseline.
    pub fn update(&mut self, ts_ms: i64, stage_key: &str, movement_index: Option<f64>) -> MoltingSnapshot {
        let Some(raw_mi) = movement_index else {
            return self.snapshot(ts_ms);
        };

        let stage = stage_key.trim().to_lowercase();
        if stage != self.stage_key {
            self.stage_key = stage;
            self.clear_progress();
        }

        let Some(thresholds) = molting_thresholds(&self.stage_key) else {
            self.clear_progress();
            return self.snapshot(ts_ms);
        };

        let mi = raw_mi.clamp(0.0, 1.0);
        let baseline = match self.baseline_mi {
            None => mi,
            Some(previous) => previous * (1.0 - BASELINE_ALPHA) + mi * BASELINE_ALPHA,
        };
        self.baseline_mi = Some(baseline);

        let drop_ratio = (1.0 - mi / baseline.max(BASELINE_FLOOR)).clamp(0.0, 1.0);
        let (molting_low, molting_high) = thresholds.molting_mi;
        let in_band = mi >= molting_low && mi <= molting_high;
        let molting_candidate = in_band && drop_ratio >= thresholds.drop_ratio_min;

        let input = TransitionInput {
            movement_index: mi,
            molting_candidate,
            dwell_secs: self.dwell_secs(ts_ms),
            min_molting_dwell_secs: thresholds.min_duration_secs(),
            molting_high,
        };
        let next = next_state(self.state, &input);
        if next != self.state {
            info!(
                from = %self.state,
                to = %next,
                stage = %self.stage_key,
                movement_index = mi,
                drop_ratio,
                baseline_mi = baseline,
                "molting state changed"
            );
            self.state = next;
            self.since_ts_ms = Some(ts_ms);
        }

        let mut snapshot = self.snapshot(ts_ms);
        snapshot.movement_index = Some(mi);
        snapshot.drop_ratio = Some(drop_ratio);
        snapshot
    }

    /// Read-only view at `ts_ms`; only the dwell duration depends on the argument.
    pub fn snapshot(&self, ts_ms: i64) -> MoltingSnapshot {
        let thresholds = molting_thresholds(&self.stage_key).copied();
        let duration_sec = self.dwell_secs(ts_ms);
        let max_duration_exceeded = thresholds
            .as_ref()
            .is_some_and(|th| self.state.is_watching_duration() && duration_sec > th.max_duration_secs());

        MoltingSnapshot {
            state: self.state,
            since_ts_ms: self.since_ts_ms,
            since_iso: self.since_ts_ms.and_then(ms_to_iso),
            updated_ts_ms: ts_ms,
            updated_iso: ms_to_iso(ts_ms),
            duration_sec,
            stage: (!self.stage_key.is_empty()).then(|| self.stage_key.clone()),
            baseline_mi: self.baseline_mi,
            movement_index: None,
            drop_ratio: None,
            max_duration_exceeded,
            thresholds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 3_600_000;
    const T0: i64 = 1_700_000_000_000;

    fn candidate_input(dwell_secs: i64) -> TransitionInput {
        TransitionInput {
            movement_index: 0.08,
            molting_candidate: true,
            dwell_secs,
            min_molting_dwell_secs: 16 * 3600,
            molting_high: 0.10,
        }
    }

    #[test]
    fn transition_table() {
        let quiet = candidate_input(0);
        assert_eq!(next_state(MoltingState::Normal, &quiet), MoltingState::PreMolting);
        assert_eq!(next_state(MoltingState::PreMolting, &quiet), MoltingState::PreMolting);
        assert_eq!(
            next_state(MoltingState::PreMolting, &candidate_input(16 * 3600)),
            MoltingState::Molting
        );

        let active = TransitionInput { molting_candidate: false, movement_index: 0.3, ..quiet };
        assert_eq!(next_state(MoltingState::PreMolting, &active), MoltingState::Normal);
        assert_eq!(next_state(MoltingState::Normal, &active), MoltingState::Normal);
        assert_eq!(next_state(MoltingState::Molting, &active), MoltingState::PostMolting);

        let at_rebound_edge = TransitionInput { movement_index: 0.20, ..active };
        assert_eq!(next_state(MoltingState::Molting, &at_rebound_edge), MoltingState::Molting);

        let post_short = TransitionInput { dwell_secs: 2 * 3600 - 1, ..active };
        assert_eq!(next_state(MoltingState::PostMolting, &post_short), MoltingState::PostMolting);
        let post_long = TransitionInput { dwell_secs: 2 * 3600, ..active };
        assert_eq!(next_state(MoltingState::PostMolting, &post_long), MoltingState::Normal);
    }

    #[test]
    fn missing_movement_does_not_mutate() {
        let mut machine = MoltingMachine::new();
        let snapshot = machine.update(T0, "larva_3", None);
        assert_eq!(snapshot.state, MoltingState::Normal);
        assert!(snapshot.stage.is_none());
        assert!(machine.baseline_mi().is_none());
        assert!(machine.stage_key().is_empty());
    }

    #[test]
    fn first_sample_seeds_baseline_then_smooths() {
        let mut machine = MoltingMachine::new();
        machine.update(T0, "larva_3", Some(0.30));
        assert_eq!(machine.baseline_mi(), Some(0.30));
        machine.update(T0 + 1000, "larva_3", Some(0.50));
        let expected = 0.30 * 0.94 + 0.50 * 0.06;
        assert!((machine.baseline_mi().unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn larva_3_reaches_molting_at_exactly_sixteen_hours() {
        let mut machine = MoltingMachine::new();
        machine.update(T0, "larva_3", Some(0.30));

        let entered = T0 + 1000;
        let snap = machine.update(entered, "larva_3", Some(0.08));
        assert_eq!(snap.state, MoltingState::PreMolting);
        assert!(snap.drop_ratio.unwrap() >= 0.65);
        assert_eq!(snap.since_ts_ms, Some(entered));

        let snap = machine.update(entered + 8 * HOUR_MS, "larva_3", Some(0.08));
        assert_eq!(snap.state, MoltingState::PreMolting);
        assert_eq!(snap.since_ts_ms, Some(entered));

        let snap = machine.update(entered + 16 * HOUR_MS - 1000, "larva_3", Some(0.08));
        assert_eq!(snap.state, MoltingState::PreMolting);
        assert_eq!(snap.duration_sec, 16 * 3600 - 1);

        let snap = machine.update(entered + 16 * HOUR_MS, "larva_3", Some(0.08));
        assert_eq!(snap.state, MoltingState::Molting);
        assert_eq!(snap.since_ts_ms, Some(entered + 16 * HOUR_MS));
        assert_eq!(snap.duration_sec, 0);
    }

    #[test]
    fn rebound_and_recovery() {
        let mut machine = MoltingMachine::new();
        machine.update(T0, "larva_3", Some(0.30));
        machine.update(T0 + 1000, "larva_3", Some(0.08));
        machine.update(T0 + 1000 + 16 * HOUR_MS, "larva_3", Some(0.08));
        assert_eq!(machine.state(), MoltingState::Molting);

        let rebound_at = T0 + 20 * HOUR_MS;
        let snap = machine.update(rebound_at, "larva_3", Some(0.25));
        assert_eq!(snap.state, MoltingState::PostMolting);

        let snap = machine.update(rebound_at + HOUR_MS, "larva_3", Some(0.25));
        assert_eq!(snap.state, MoltingState::PostMolting);

        let snap = machine.update(rebound_at + 2 * HOUR_MS, "larva_3", Some(0.25));
        assert_eq!(snap.state, MoltingState::Normal);
    }

    /// Drives a larva_3 machine into `target`, finishing at `T0 + 20h`.
    fn machine_in(target: MoltingState) -> MoltingMachine {
        let mut machine = MoltingMachine::new();
        machine.update(T0, "larva_3", Some(0.30));
        machine.update(T0 + 1000, "larva_3", Some(0.08));
        if matches!(target, MoltingState::Molting | MoltingState::PostMolting) {
            machine.update(T0 + 1000 + 16 * HOUR_MS, "larva_3", Some(0.08));
        }
        if target == MoltingState::PostMolting {
            machine.update(T0 + 20 * HOUR_MS, "larva_3", Some(0.25));
        }
        assert_eq!(machine.state(), target);
        machine
    }

    #[test]
    fn stage_change_always_resets() {
        for prior in [MoltingState::PreMolting, MoltingState::Molting, MoltingState::PostMolting] {
            let mut machine = machine_in(prior);
            let snap = machine.update(T0 + 21 * HOUR_MS, " LARVA_4 ", Some(0.20));
            assert_eq!(snap.state, MoltingState::Normal, "from {prior}");
            assert_eq!(snap.stage.as_deref(), Some("larva_4"));
            // the new stage's first sample seeds a fresh baseline
            assert_eq!(snap.baseline_mi, Some(0.20), "from {prior}");
            assert!(snap.since_ts_ms.is_none(), "from {prior}");
        }
    }

    #[test]
    fn unknown_stage_stays_normal_without_thresholds() {
        let mut machine = MoltingMachine::new();
        let snap = machine.update(T0, "cocoon", Some(0.01));
        assert_eq!(snap.state, MoltingState::Normal);
        assert!(snap.baseline_mi.is_none());
        assert!(snap.thresholds.is_none());
        assert!(snap.movement_index.is_none());
        assert_eq!(snap.stage.as_deref(), Some("cocoon"));
    }

    #[test]
    fn snapshot_is_idempotent() {
        let mut machine = MoltingMachine::new();
        machine.update(T0, "larva_2", Some(0.30));
        machine.update(T0 + 1000, "larva_2", Some(0.06));
        let first = machine.snapshot(T0 + 5000);
        let second = machine.snapshot(T0 + 5000);
        assert_eq!(first, second);
        assert_eq!(first.duration_sec, 4);
        assert!(first.movement_index.is_none());
    }

    #[test]
    fn overlong_pre_molting_is_flagged_but_not_acted_on() {
        let mut machine = MoltingMachine::new();
        machine.update(T0, "larva_1", Some(0.40));
        machine.update(T0 + 1000, "larva_1", Some(0.10));
        assert_eq!(machine.state(), MoltingState::PreMolting);

        let th = molting_thresholds("larva_1").unwrap();
        let late = T0 + 1000 + (th.max_duration_secs() + 1) * 1000;
        let snap = machine.snapshot(late);
        assert!(snap.max_duration_exceeded);
        assert_eq!(snap.state, MoltingState::PreMolting);

        let at_limit = machine.snapshot(T0 + 1000 + th.max_duration_secs() * 1000);
        assert!(!at_limit.max_duration_exceeded);
    }

    #[test]
    fn serialises_state_names_and_threshold_bands() {
        let mut machine = MoltingMachine::new();
        machine.update(T0, "larva_3", Some(0.30));
        machine.update(T0 + 1000, "larva_3", Some(0.08));
        let json = serde_json::to_value(machine.snapshot(T0 + 1000)).unwrap();
        assert_eq!(json["state"], "PRE_MOLTING");
        assert_eq!(json["thresholds"]["molting_mi"], serde_json::json!([0.04, 0.10]));
        assert_eq!(json["stage"], "larva_3");
        assert!(json["since_iso"].as_str().unwrap().ends_with('Z'));
    }
}
