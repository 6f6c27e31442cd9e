//! Dosing settings written by older releases as a single key/value entry.

use log::warn;
use serde::Deserialize;

use crate::db::models::{
    dosing::validation::validate_dosing, DailySchedule, DosingSettings, DosingStrategy,
    GlucoseRange, GlucoseRangeSchedule, GlucoseThreshold, InsulinModel, OverridePreset,
    TemporaryOverride,
};
use crate::kv_store::{get_typed, KeyValueStore};

pub const LEGACY_SETTINGS_KEY: &str = "legacy.loop_settings";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LegacyLoopSettings {
    dosing_enabled: bool,
    glucose_target_range_schedule: Option<GlucoseRangeSchedule>,
    pre_meal_target_range: Option<GlucoseRange>,
    legacy_workout_target_range: Option<GlucoseRange>,
    override_presets: Vec<OverridePreset>,
    schedule_override: Option<TemporaryOverride>,
    pre_meal_override: Option<TemporaryOverride>,
    maximum_basal_rate_per_hour: Option<f64>,
    maximum_bolus: Option<f64>,
    suspend_threshold: Option<GlucoseThreshold>,
    basal_rate_schedule: Option<DailySchedule<f64>>,
    insulin_sensitivity_schedule: Option<DailySchedule<f64>>,
    carb_ratio_schedule: Option<DailySchedule<f64>>,
    default_rapid_acting_model: Option<InsulinModel>,
    dosing_strategy: Option<DosingStrategy>,
}

impl From<LegacyLoopSettings> for DosingSettings {
    fn from(legacy: LegacyLoopSettings) -> Self {
        let glucose_unit = legacy
            .glucose_target_range_schedule
            .as_ref()
            .map(|schedule| schedule.unit)
            .or_else(|| legacy.suspend_threshold.map(|threshold| threshold.unit));

        Self {
            dosing_enabled: legacy.dosing_enabled,
            glucose_unit,
            glucose_target_range_schedule: legacy.glucose_target_range_schedule,
            pre_meal_target_range: legacy.pre_meal_target_range,
            workout_target_range: legacy.legacy_workout_target_range,
            override_presets: legacy.override_presets,
            schedule_override: legacy.schedule_override,
            pre_meal_override: legacy.pre_meal_override,
            maximum_basal_rate_per_hour: legacy.maximum_basal_rate_per_hour,
            maximum_bolus: legacy.maximum_bolus,
            suspend_threshold: legacy.suspend_threshold,
            basal_rate_schedule: legacy.basal_rate_schedule,
            insulin_sensitivity_schedule: legacy.insulin_sensitivity_schedule,
            carb_ratio_schedule: legacy.carb_ratio_schedule,
            default_rapid_acting_model: legacy.default_rapid_acting_model,
            automatic_dosing_strategy: legacy.dosing_strategy.unwrap_or_default(),
        }
    }
}

/// Legacy dosing settings, if present and valid.
pub fn read_legacy_settings(store: &dyn KeyValueStore) -> Option<DosingSettings> {
    let legacy: LegacyLoopSettings = get_typed(store, LEGACY_SETTINGS_KEY)?;
    let settings = DosingSettings::from(legacy);
    match validate_dosing(&settings) {
        Ok(()) => Some(settings),
        Err(err) => {
            warn!("Ignoring invalid legacy settings: {err}");
            None
        }
    }
}
