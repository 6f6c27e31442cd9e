//! Dosing configuration carried inside every settings snapshot.
//!
//! The loop algorithm that consumes these values lives elsewhere; here they are plain
//! values compared field by field when deciding whether a new snapshot is needed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum GlucoseUnit {
    MilligramsPerDeciliter,
    MillimolesPerLiter,
}

impl Default for GlucoseUnit {
    fn default() -> Self {
        GlucoseUnit::MilligramsPerDeciliter
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseThreshold {
    pub unit: GlucoseUnit,
    pub value: f64,
}

/// One entry of a repeating daily schedule, effective from `start_offset_secs` after midnight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleItem<T> {
    pub start_offset_secs: u32,
    pub value: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailySchedule<T> {
    pub items: Vec<ScheduleItem<T>>,
    pub time_zone_offset_secs: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseRangeSchedule {
    pub unit: GlucoseUnit,
    pub schedule: DailySchedule<GlucoseRange>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OverrideEnactor {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "secs")]
pub enum OverrideDuration {
    Finite(u64),
    Indefinite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryOverride {
    pub name: Option<String>,
    pub target_range: Option<GlucoseRange>,
    pub insulin_needs_scale_factor: Option<f64>,
    pub start: DateTime<Utc>,
    pub duration: OverrideDuration,
    pub enacted_by: OverrideEnactor,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverridePreset {
    pub id: Uuid,
    pub name: String,
    pub symbol: String,
    pub target_range: Option<GlucoseRange>,
    pub insulin_needs_scale_factor: Option<f64>,
    pub duration: OverrideDuration,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InsulinModel {
    RapidActingAdult,
    RapidActingChild,
    Fiasp,
    Lyumjev,
    Afrezza,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DosingStrategy {
    TempBasalOnly,
    AutomaticBolus,
}

impl Default for DosingStrategy {
    fn default() -> Self {
        DosingStrategy::TempBasalOnly
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DosingSettings {
    pub dosing_enabled: bool,
    pub glucose_unit: Option<GlucoseUnit>,
    pub glucose_target_range_schedule: Option<GlucoseRangeSchedule>,
    pub pre_meal_target_range: Option<GlucoseRange>,
    pub workout_target_range: Option<GlucoseRange>,
    pub override_presets: Vec<OverridePreset>,
    pub schedule_override: Option<TemporaryOverride>,
    pub pre_meal_override: Option<TemporaryOverride>,
    pub maximum_basal_rate_per_hour: Option<f64>,
    pub maximum_bolus: Option<f64>,
    pub suspend_threshold: Option<GlucoseThreshold>,
    pub basal_rate_schedule: Option<DailySchedule<f64>>,
    pub insulin_sensitivity_schedule: Option<DailySchedule<f64>>,
    pub carb_ratio_schedule: Option<DailySchedule<f64>>,
    pub default_rapid_acting_model: Option<InsulinModel>,
    pub automatic_dosing_strategy: DosingStrategy,
}

/// Validation for dosing values read from files written outside this process.
pub mod validation {
    use super::{DailySchedule, DosingSettings, GlucoseRange};
    use anyhow::{bail, Result};

    const SECONDS_PER_DAY: u32 = 86_400;

    pub fn validate_range(range: &GlucoseRange, field: &str) -> Result<()> {
        if !range.min.is_finite() || !range.max.is_finite() {
            bail!("{field} must be finite");
        }
        if range.min > range.max {
            bail!("{field} has min {} above max {}", range.min, range.max);
        }
        Ok(())
    }

    pub fn validate_schedule<T>(schedule: &DailySchedule<T>, field: &str) -> Result<()> {
        let Some(first) = schedule.items.first() else {
            bail!("{field} has no items");
        };
        if first.start_offset_secs != 0 {
            bail!("{field} must start at midnight");
        }

        let mut previous = first.start_offset_secs;
        for item in schedule.items.iter().skip(1) {
            if item.start_offset_secs <= previous {
                bail!("{field} items must be in increasing order");
            }
            if item.start_offset_secs >= SECONDS_PER_DAY {
                bail!("{field} item starts after the end of the day");
            }
            previous = item.start_offset_secs;
        }
        Ok(())
    }

    fn validate_positive(value: Option<f64>, field: &str) -> Result<()> {
        if let Some(value) = value {
            if !value.is_finite() || value <= 0.0 {
                bail!("{field} must be positive");
            }
        }
        Ok(())
    }

    pub fn validate_dosing(settings: &DosingSettings) -> Result<()> {
        if let Some(schedule) = &settings.glucose_target_range_schedule {
            validate_schedule(&schedule.schedule, "glucose target range schedule")?;
            for item in &schedule.schedule.items {
                validate_range(&item.value, "glucose target range")?;
            }
        }
        if let Some(range) = &settings.pre_meal_target_range {
            validate_range(range, "pre-meal target range")?;
        }
        if let Some(range) = &settings.workout_target_range {
            validate_range(range, "workout target range")?;
        }
        for preset in &settings.override_presets {
            if let Some(range) = &preset.target_range {
                validate_range(range, "override preset target range")?;
            }
            validate_positive(preset.insulin_needs_scale_factor, "override scale factor")?;
        }

        validate_positive(settings.maximum_basal_rate_per_hour, "maximum basal rate")?;
        validate_positive(settings.maximum_bolus, "maximum bolus")?;

        for (schedule, field) in [
            (&settings.basal_rate_schedule, "basal rate schedule"),
            (&settings.insulin_sensitivity_schedule, "insulin sensitivity schedule"),
            (&settings.carb_ratio_schedule, "carb ratio schedule"),
        ] {
            if let Some(schedule) = schedule {
                validate_schedule(schedule, field)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::validation::validate_dosing;
    use super::*;

    fn basal_schedule(offsets: &[u32]) -> DailySchedule<f64> {
        DailySchedule {
            items: offsets
                .iter()
                .map(|&start_offset_secs| ScheduleItem {
                    start_offset_secs,
                    value: 0.8,
                })
                .collect(),
            time_zone_offset_secs: 0,
        }
    }

    #[test]
    fn rejects_out_of_order_schedule() {
        let settings = DosingSettings {
            basal_rate_schedule: Some(basal_schedule(&[0, 3_600, 1_800])),
            ..DosingSettings::default()
        };
        assert!(validate_dosing(&settings).is_err());
    }

    #[test]
    fn rejects_inverted_range_and_non_positive_limits() {
        let inverted = DosingSettings {
            pre_meal_target_range: Some(GlucoseRange { min: 120.0, max: 80.0 }),
            ..DosingSettings::default()
        };
        assert!(validate_dosing(&inverted).is_err());

        let zero_bolus = DosingSettings {
            maximum_bolus: Some(0.0),
            ..DosingSettings::default()
        };
        assert!(validate_dosing(&zero_bolus).is_err());
    }

    #[test]
    fn accepts_reasonable_settings() {
        let settings = DosingSettings {
            dosing_enabled: true,
            basal_rate_schedule: Some(basal_schedule(&[0, 43_200])),
            maximum_basal_rate_per_hour: Some(3.0),
            maximum_bolus: Some(10.0),
            workout_target_range: Some(GlucoseRange { min: 140.0, max: 160.0 }),
            ..DosingSettings::default()
        };
        assert!(validate_dosing(&settings).is_ok());
    }
}
