//! Light state model
//!
//! Logical state of the lamp as commanded by the host, the planner that turns
//! a capability change into command frames, and the derived power estimate.

use crate::domain::models::{Capability, CapabilitySink, CapabilityValue};
use crate::domain::settings::StatePolicy;
use crate::error::ProtocolError;
use crate::infrastructure::bluetooth::protocol::{self, CommandFrame, Opcode, SCENE_LAST, SCENE_OFF};
use crate::infrastructure::bluetooth::timer::lock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const LAMP_WATT_MIN: f64 = 0.5;
pub const LAMP_WATT_MAX: f64 = 75.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightMode {
    /// Uplight, hue and saturation
    #[default]
    Color,
    /// Downlight, color temperature only
    Temperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightState {
    pub onoff: bool,
    pub dim: f64,
    pub hue: f64,
    pub saturation: f64,
    pub mode: LightMode,
    pub temperature: f64,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            onoff: false,
            dim: 0.5,
            hue: 0.0,
            saturation: 1.0,
            mode: LightMode::Color,
            temperature: 0.5,
        }
    }
}

impl LightState {
    /// Last known values from the host, defaults for anything it has not stored yet
    pub fn from_capabilities(sink: &dyn CapabilitySink) -> Self {
        let defaults = Self::default();
        let number = |capability, fallback| {
            sink.capability_value(capability)
                .and_then(|value| value.as_number())
                .unwrap_or(fallback)
        };

        Self {
            onoff: sink
                .capability_value(Capability::Onoff)
                .and_then(|value| value.as_bool())
                .unwrap_or(defaults.onoff),
            dim: number(Capability::Dim, defaults.dim),
            hue: number(Capability::LightHue, defaults.hue),
            saturation: number(Capability::LightSaturation, defaults.saturation),
            mode: sink
                .capability_value(Capability::LightMode)
                .and_then(|value| value.as_mode())
                .unwrap_or(defaults.mode),
            temperature: number(Capability::LightTemperature, defaults.temperature),
        }
    }

    /// Approximate draw in watts; 0 when off
    pub fn estimated_power_watts(&self) -> f64 {
        if self.onoff {
            LAMP_WATT_MIN + (LAMP_WATT_MAX - LAMP_WATT_MIN) * self.dim
        } else {
            0.0
        }
    }

    pub fn merge(&mut self, change: &LightChange) {
        if let Some(onoff) = change.onoff {
            self.onoff = onoff;
        }
        if let Some(dim) = change.dim {
            self.dim = dim;
        }
        if let Some(hue) = change.hue {
            self.hue = hue;
        }
        if let Some(saturation) = change.saturation {
            self.saturation = saturation;
        }
        if let Some(mode) = change.mode {
            self.mode = mode;
        }
        if let Some(temperature) = change.temperature {
            self.temperature = temperature;
        }
    }

    pub fn merged(mut self, change: &LightChange) -> Self {
        self.merge(change);
        self
    }

    /// Capabilities whose value differs in `other`
    pub fn changes(&self, other: &LightState) -> Vec<(Capability, CapabilityValue)> {
        let mut changes = Vec::new();
        if self.onoff != other.onoff {
            changes.push((Capability::Onoff, CapabilityValue::Bool(other.onoff)));
        }
        if self.dim != other.dim {
            changes.push((Capability::Dim, CapabilityValue::Number(other.dim)));
        }
        if self.hue != other.hue {
            changes.push((Capability::LightHue, CapabilityValue::Number(other.hue)));
        }
        if self.saturation != other.saturation {
            changes.push((Capability::LightSaturation, CapabilityValue::Number(other.saturation)));
        }
        if self.mode != other.mode {
            changes.push((Capability::LightMode, CapabilityValue::Mode(other.mode)));
        }
        if self.temperature != other.temperature {
            changes.push((
                Capability::LightTemperature,
                CapabilityValue::Number(other.temperature),
            ));
        }
        changes
    }
}

/// A partial capability update from the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LightChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onoff: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<f64>,
    #[serde(default, rename = "light_hue", skip_serializing_if = "Option::is_none")]
    pub hue: Option<f64>,
    #[serde(default, rename = "light_saturation", skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f64>,
    #[serde(default, rename = "light_mode", skip_serializing_if = "Option::is_none")]
    pub mode: Option<LightMode>,
    #[serde(default, rename = "light_temperature", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl LightChange {
    pub fn power(on: bool) -> Self {
        Self {
            onoff: Some(on),
            ..Default::default()
        }
    }

    pub fn dim(dim: f64) -> Self {
        Self {
            dim: Some(dim),
            ..Default::default()
        }
    }

    pub fn color(hue: f64, saturation: f64) -> Self {
        Self {
            hue: Some(hue),
            saturation: Some(saturation),
            mode: Some(LightMode::Color),
            ..Default::default()
        }
    }

    pub fn temperature(temperature: f64) -> Self {
        Self {
            temperature: Some(temperature),
            mode: Some(LightMode::Temperature),
            ..Default::default()
        }
    }

    pub fn with_dim(mut self, dim: f64) -> Self {
        self.dim = Some(dim);
        self
    }

    pub fn field_count(&self) -> usize {
        [
            self.onoff.is_some(),
            self.dim.is_some(),
            self.hue.is_some(),
            self.saturation.is_some(),
            self.mode.is_some(),
            self.temperature.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }

    /// Only the brightness changes; `onoff: true` may ride along
    pub(crate) fn is_dim_only(&self) -> bool {
        self.dim.is_some()
            && self.onoff != Some(false)
            && self.hue.is_none()
            && self.saturation.is_none()
            && self.mode.is_none()
            && self.temperature.is_none()
    }

    fn without_power(mut self) -> Self {
        self.onoff = None;
        self
    }
}

/// A frame plus the state it establishes once the lamp confirms it
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCommand {
    pub frame: CommandFrame,
    pub effect: LightChange,
}

impl PlannedCommand {
    pub fn new(frame: CommandFrame, effect: LightChange) -> Self {
        Self { frame, effect }
    }

    /// Scene select, which also switches power
    pub fn scene(id: u8) -> Self {
        Self::new(protocol::encode_scene(id), LightChange::power(id != SCENE_OFF))
    }

    /// A frame that carries no state, such as a scene-name query
    pub fn bare(frame: CommandFrame) -> Self {
        Self::new(frame, LightChange::default())
    }
}

/// Frames needed to move the lamp from `state` by `change`
///
/// Any light change wakes a lamp that is off, so those plans start with a
/// select of the reserved "last scene".
pub fn plan(state: &LightState, change: &LightChange) -> Result<Vec<PlannedCommand>, ProtocolError> {
    if change.is_empty() {
        return Ok(Vec::new());
    }

    match change.onoff {
        Some(on) if change.field_count() == 1 => {
            return Ok(vec![PlannedCommand::scene(if on { SCENE_LAST } else { SCENE_OFF })]);
        }
        Some(false) => {
            let mut off = PlannedCommand::scene(SCENE_OFF);
            off.effect = *change;
            return Ok(vec![off]);
        }
        _ => {}
    }

    let mut planned = Vec::with_capacity(2);
    if !state.onoff {
        planned.push(PlannedCommand::scene(SCENE_LAST));
    }

    if change.is_dim_only() {
        let dim = change.dim.unwrap_or(state.dim);
        planned.push(PlannedCommand::new(protocol::encode_dim(dim)?, change.without_power()));
        return Ok(planned);
    }

    // the frame sets every value it encodes, so its effect carries all of them
    let target = state.merged(change);
    let (frame, effect) = match target.mode {
        LightMode::Color => (
            protocol::encode_color(target.hue, target.saturation, target.dim)?,
            LightChange::color(target.hue, target.saturation).with_dim(target.dim),
        ),
        LightMode::Temperature => (
            protocol::encode_temperature(target.temperature, target.dim)?,
            LightChange::temperature(target.temperature).with_dim(target.dim),
        ),
    };
    planned.push(PlannedCommand::new(frame, effect));

    Ok(planned)
}

/// Shared light state of one lamp, mirrored to the host
pub struct LightStateModel {
    state: Mutex<LightState>,
    policy: StatePolicy,
    sink: Arc<dyn CapabilitySink>,
}

impl LightStateModel {
    pub fn new(sink: Arc<dyn CapabilitySink>, policy: StatePolicy) -> Self {
        Self {
            state: Mutex::new(LightState::from_capabilities(sink.as_ref())),
            policy,
            sink,
        }
    }

    pub fn snapshot(&self) -> LightState {
        *lock(&self.state)
    }

    /// State the lamp reaches once `queued` effects have been delivered
    pub fn commanded(&self, queued: &[LightChange]) -> LightState {
        queued
            .iter()
            .fold(self.snapshot(), |state, effect| state.merged(effect))
    }

    /// Plan `change` after the frames still `queued`; with the optimistic
    /// policy the state moves right away
    pub fn apply_change(
        &self,
        change: &LightChange,
        queued: &[LightChange],
    ) -> Result<Vec<PlannedCommand>, ProtocolError> {
        let planned = plan(&self.commanded(queued), change)?;
        if self.policy == StatePolicy::Optimistic {
            self.update(|state| {
                for command in &planned {
                    state.merge(&command.effect);
                }
            });
        }
        Ok(planned)
    }

    /// Plan a scene select; the optimistic policy switches power right away
    pub fn apply_scene(&self, id: u8) -> PlannedCommand {
        let command = PlannedCommand::scene(id);
        if self.policy == StatePolicy::Optimistic {
            self.update(|state| state.merge(&command.effect));
        }
        command
    }

    /// Merge a change that reached the lamp some other way
    pub fn record(&self, change: &LightChange) {
        self.update(|state| state.merge(change));
    }

    /// The lamp accepted `command`
    pub fn confirm(&self, command: &PlannedCommand) {
        let opcode = command.frame.opcode();
        self.update(|state| {
            if self.policy == StatePolicy::Confirmed {
                state.merge(&command.effect);
            }
            if opcode.is_light_change() {
                // any light change turns the lamp on, except selecting the off scene
                state.onoff =
                    !(opcode == Opcode::SelectScene && command.frame.scene_id() == Some(SCENE_OFF));
            }
        });
    }

    /// Push the derived power value, e.g. at device init
    pub fn publish_power(&self) {
        let watts = self.snapshot().estimated_power_watts();
        self.sink
            .set_capability_value(Capability::MeasurePower, CapabilityValue::Number(watts));
    }

    fn update(&self, apply: impl FnOnce(&mut LightState)) {
        let (before, after) = {
            let mut state = lock(&self.state);
            let before = *state;
            apply(&mut state);
            (before, *state)
        };

        let changes = before.changes(&after);
        if changes.is_empty() {
            return;
        }
        debug!(?after, "light state changed");
        for (capability, value) in changes {
            self.sink.set_capability_value(capability, value);
        }
        if before.estimated_power_watts() != after.estimated_power_watts() {
            self.publish_power();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    fn opcodes(planned: &[PlannedCommand]) -> Vec<Vec<u8>> {
        planned.iter().map(|c| c.frame.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_power_estimate() {
        let mut state = LightState {
            onoff: true,
            dim: 0.6,
            ..Default::default()
        };
        assert!((state.estimated_power_watts() - 45.2).abs() < 1e-9);
        state.dim = 1.0;
        assert_eq!(state.estimated_power_watts(), LAMP_WATT_MAX);
        state.onoff = false;
        assert_eq!(state.estimated_power_watts(), 0.0);
    }

    #[test]
    fn test_off_alone_is_a_single_scene_select() {
        let state = LightState {
            onoff: true,
            ..Default::default()
        };
        let planned = plan(&state, &LightChange::power(false)).unwrap();
        assert_eq!(opcodes(&planned), vec![vec![0xA0, 0x02, 0x05, 0x00]]);

        let planned = plan(&LightState::default(), &LightChange::power(true)).unwrap();
        assert_eq!(opcodes(&planned), vec![vec![0xA0, 0x02, 0x05, 0xFF]]);
    }

    #[test]
    fn test_dim_while_off_wakes_the_lamp_first() {
        let planned = plan(&LightState::default(), &LightChange::dim(0.6)).unwrap();
        assert_eq!(
            opcodes(&planned),
            vec![vec![0xA0, 0x02, 0x05, 0xFF], vec![0xA0, 0x01, 0x03, 60]]
        );

        let on = LightState {
            onoff: true,
            ..Default::default()
        };
        let planned = plan(&on, &LightChange::dim(0.6).with_dim(0.3)).unwrap();
        assert_eq!(opcodes(&planned), vec![vec![0xA0, 0x01, 0x03, 30]]);
    }

    #[test]
    fn test_flow_dimming_sends_brightness_only() {
        let on = LightState {
            onoff: true,
            mode: LightMode::Temperature,
            ..Default::default()
        };
        let change = LightChange {
            onoff: Some(true),
            dim: Some(0.2),
            ..Default::default()
        };
        let planned = plan(&on, &change).unwrap();
        assert_eq!(opcodes(&planned), vec![vec![0xA0, 0x01, 0x03, 20]]);
        assert_eq!(planned[0].effect, LightChange::dim(0.2));
    }

    #[test]
    fn test_color_and_temperature_use_merged_state() {
        let on = LightState {
            onoff: true,
            dim: 1.0,
            ..Default::default()
        };
        let planned = plan(&on, &LightChange::color(0.5, 1.0)).unwrap();
        assert_eq!(
            opcodes(&planned),
            vec![vec![0xA0, 0x01, 0x02, 0x01, 0x00, 0x00, 0xFF, 0x80, 0x00, 100]]
        );
        assert_eq!(planned[0].effect, LightChange::color(0.5, 1.0).with_dim(1.0));

        let planned = plan(&on, &LightChange::temperature(1.0).with_dim(0.5)).unwrap();
        assert_eq!(
            opcodes(&planned),
            vec![vec![0xA0, 0x01, 0x02, 0x02, 0x00, 0x00, 0x0A, 0x8C, 50]]
        );
        assert_eq!(planned[0].effect, LightChange::temperature(1.0).with_dim(0.5));
    }

    #[test]
    fn test_multi_field_off_selects_off_scene() {
        let on = LightState {
            onoff: true,
            ..Default::default()
        };
        let change = LightChange {
            onoff: Some(false),
            dim: Some(0.9),
            ..Default::default()
        };
        let planned = plan(&on, &change).unwrap();
        assert_eq!(opcodes(&planned), vec![vec![0xA0, 0x02, 0x05, 0x00]]);
        assert_eq!(planned[0].effect, change);
    }

    #[test]
    fn test_out_of_range_change_is_rejected() {
        assert!(plan(&LightState::default(), &LightChange::dim(1.5)).is_err());
    }

    #[test]
    fn test_initial_state_reads_host_values() {
        let sink = RecordingSink::with_values(&[
            (Capability::Onoff, CapabilityValue::Bool(true)),
            (Capability::Dim, CapabilityValue::Number(0.8)),
            (Capability::LightMode, CapabilityValue::Mode(LightMode::Temperature)),
        ]);
        let state = LightState::from_capabilities(sink.as_ref());
        assert!(state.onoff);
        assert_eq!(state.dim, 0.8);
        assert_eq!(state.mode, LightMode::Temperature);
        assert_eq!(state.saturation, 1.0);
        assert_eq!(state.temperature, 0.5);
    }

    #[test]
    fn test_optimistic_policy_updates_at_submit() {
        let sink = RecordingSink::new();
        let model = LightStateModel::new(sink.clone(), StatePolicy::Optimistic);
        model.apply_change(&LightChange::dim(0.6), &[]).unwrap();

        let state = model.snapshot();
        assert!(state.onoff);
        assert_eq!(state.dim, 0.6);
        assert_eq!(sink.value(Capability::Onoff), Some(CapabilityValue::Bool(true)));
        let watts = sink.value(Capability::MeasurePower).and_then(|v| v.as_number()).unwrap();
        assert!((watts - 45.2).abs() < 1e-9);
    }

    #[test]
    fn test_confirmed_policy_waits_for_acknowledgement() {
        let sink = RecordingSink::new();
        let model = LightStateModel::new(sink.clone(), StatePolicy::Confirmed);
        let planned = model.apply_change(&LightChange::dim(0.6), &[]).unwrap();
        assert_eq!(model.snapshot(), LightState::default());

        model.confirm(&planned[0]);
        assert!(model.snapshot().onoff);
        assert_eq!(model.snapshot().dim, 0.5);

        model.confirm(&planned[1]);
        assert!((model.snapshot().estimated_power_watts() - 45.2).abs() < 1e-9);
    }

    #[test]
    fn test_plan_follows_queued_effects() {
        let model = LightStateModel::new(RecordingSink::new(), StatePolicy::Confirmed);
        let queued: Vec<LightChange> = model
            .apply_change(&LightChange::dim(0.6), &[])
            .unwrap()
            .into_iter()
            .map(|c| c.effect)
            .collect();

        let planned = model.apply_change(&LightChange::color(0.3, 1.0), &queued).unwrap();
        assert_eq!(
            opcodes(&planned),
            vec![vec![0xA0, 0x01, 0x02, 0x01, 0x00, 0x00, 0xFF, 0x4C, 0xCD, 60]]
        );
        assert_eq!(planned[0].effect.dim, Some(0.6));
        assert_eq!(model.snapshot(), LightState::default());
    }

    #[test]
    fn test_off_scene_confirmation_turns_lamp_off() {
        let sink = RecordingSink::with_values(&[(Capability::Onoff, CapabilityValue::Bool(true))]);
        let model = LightStateModel::new(sink.clone(), StatePolicy::Confirmed);
        model.confirm(&PlannedCommand::scene(SCENE_OFF));
        assert!(!model.snapshot().onoff);
        assert_eq!(sink.value(Capability::MeasurePower), Some(CapabilityValue::Number(0.0)));

        // a scene-name query is not a light change
        model.confirm(&PlannedCommand::bare(protocol::encode_scene_query(1)));
        assert!(!model.snapshot().onoff);
    }
}
