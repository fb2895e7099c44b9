//! # Movement Tuning
//!
//! Every constant the step reads. Client and authority MUST run with the
//! same table or their results diverge on every tick.
//!
//! Units are world units (metres) and seconds.

use gait_shared::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// Tuning table for the locomotion step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MovementTuning {
    /// Top speed with full input, before sprint/crouch scaling.
    pub max_speed: f32,
    /// Max speed multiplier while sprinting.
    pub sprint_multiplier: f32,
    /// Max speed multiplier while crouching.
    pub crouch_multiplier: f32,

    /// Input acceleration on the ground.
    pub input_acceleration_grounded: f32,
    /// Input acceleration in the air.
    pub input_acceleration_airborne: f32,
    /// Input acceleration in fluid.
    pub input_acceleration_buoyant: f32,

    /// Braking against directions not being accelerated in, on the ground.
    pub braking_deceleration_grounded: f32,
    /// Braking in the air.
    pub braking_deceleration_airborne: f32,
    /// Braking in fluid.
    pub braking_deceleration_buoyant: f32,

    /// Deceleration applied while faster than the allowed speed, on the ground.
    pub over_max_speed_deceleration_grounded: f32,
    /// Over-max deceleration in the air.
    pub over_max_speed_deceleration_airborne: f32,
    /// Over-max deceleration in fluid.
    pub over_max_speed_deceleration_buoyant: f32,

    /// Speeds below this snap to zero while braking.
    pub brake_to_stop_speed: f32,

    /// Downward acceleration.
    pub gravity: f32,
    /// Maximum falling speed.
    pub terminal_velocity: f32,
    /// Vertical speed given by a jump.
    pub jump_velocity: f32,
    /// While not grounded, rising faster than this blocks landing.
    pub rising_speed_threshold: f32,

    /// Minimum floor normal Y for the floor to be walkable (cos of max slope).
    pub walkable_floor_z: f32,
    /// Ground closer than this counts as contact.
    pub contact_tolerance: f32,
    /// Grounded actors stay glued to floors up to this far below.
    pub max_step_down_height: f32,

    /// Immersion needed to start swimming.
    pub buoyant_min_immersion: f32,
    /// Swimmers keep swimming until immersion drops this far below the threshold.
    pub fluid_exit_tolerance: f32,
    /// Extra lift while swimming, as a fraction of gravity.
    pub buoyancy: f32,
    /// Fluid drag per second at full immersion.
    pub fluid_friction: f32,
    /// Grounded immersion above which wading slows the actor.
    pub partial_immersion_threshold: f32,
    /// Wading drag per second per unit of immersion over the threshold.
    pub partial_immersion_slowdown: f32,

    /// How fast facing turns towards the direction of travel, per second.
    pub rotation_sharpness: f32,
    /// Largest accepted step duration in seconds.
    pub max_delta_time: f32,
}

impl Default for MovementTuning {
    fn default() -> Self {
        Self {
            max_speed: 8.0,
            sprint_multiplier: 1.5,
            crouch_multiplier: 0.5,

            input_acceleration_grounded: 60.0,
            input_acceleration_airborne: 18.0,
            input_acceleration_buoyant: 10.0,

            braking_deceleration_grounded: 30.0,
            braking_deceleration_airborne: 2.0,
            braking_deceleration_buoyant: 10.0,

            over_max_speed_deceleration_grounded: 100.0,
            over_max_speed_deceleration_airborne: 12.0,
            over_max_speed_deceleration_buoyant: 30.0,

            brake_to_stop_speed: 0.01,

            gravity: 19.6,
            terminal_velocity: 50.0,
            jump_velocity: 7.0,
            rising_speed_threshold: 0.01,

            walkable_floor_z: 0.707_106_8,
            contact_tolerance: 0.02,
            max_step_down_height: 0.5,

            buoyant_min_immersion: 0.8,
            fluid_exit_tolerance: 0.1,
            buoyancy: 0.05,
            fluid_friction: 2.0,
            partial_immersion_threshold: 0.5,
            partial_immersion_slowdown: 10.0,

            rotation_sharpness: 10.0,
            max_delta_time: 0.1,
        }
    }
}

/// Acceleration profile of one locomotion mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlanarProfile {
    /// Input acceleration.
    pub acceleration: f32,
    /// Braking deceleration.
    pub braking: f32,
    /// Over-max-speed deceleration.
    pub over_max: f32,
}

impl MovementTuning {
    /// Ground profile.
    #[must_use]
    pub const fn grounded(&self) -> PlanarProfile {
        PlanarProfile {
            acceleration: self.input_acceleration_grounded,
            braking: self.braking_deceleration_grounded,
            over_max: self.over_max_speed_deceleration_grounded,
        }
    }

    /// Air profile.
    #[must_use]
    pub const fn airborne(&self) -> PlanarProfile {
        PlanarProfile {
            acceleration: self.input_acceleration_airborne,
            braking: self.braking_deceleration_airborne,
            over_max: self.over_max_speed_deceleration_airborne,
        }
    }

    /// Fluid profile.
    #[must_use]
    pub const fn buoyant(&self) -> PlanarProfile {
        PlanarProfile {
            acceleration: self.input_acceleration_buoyant,
            braking: self.braking_deceleration_buoyant,
            over_max: self.over_max_speed_deceleration_buoyant,
        }
    }

    /// Parses a TOML table and validates it.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let tuning: Self = toml::from_str(text)?;
        tuning.validate()?;
        Ok(tuning)
    }

    /// Rejects tables the step cannot run with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        let fields = [
            ("max_speed", self.max_speed),
            ("sprint_multiplier", self.sprint_multiplier),
            ("crouch_multiplier", self.crouch_multiplier),
            ("input_acceleration_grounded", self.input_acceleration_grounded),
            ("input_acceleration_airborne", self.input_acceleration_airborne),
            ("input_acceleration_buoyant", self.input_acceleration_buoyant),
            ("braking_deceleration_grounded", self.braking_deceleration_grounded),
            ("braking_deceleration_airborne", self.braking_deceleration_airborne),
            ("braking_deceleration_buoyant", self.braking_deceleration_buoyant),
            ("over_max_speed_deceleration_grounded", self.over_max_speed_deceleration_grounded),
            ("over_max_speed_deceleration_airborne", self.over_max_speed_deceleration_airborne),
            ("over_max_speed_deceleration_buoyant", self.over_max_speed_deceleration_buoyant),
            ("brake_to_stop_speed", self.brake_to_stop_speed),
            ("gravity", self.gravity),
            ("terminal_velocity", self.terminal_velocity),
            ("jump_velocity", self.jump_velocity),
            ("rising_speed_threshold", self.rising_speed_threshold),
            ("contact_tolerance", self.contact_tolerance),
            ("max_step_down_height", self.max_step_down_height),
            ("fluid_exit_tolerance", self.fluid_exit_tolerance),
            ("buoyancy", self.buoyancy),
            ("fluid_friction", self.fluid_friction),
            ("partial_immersion_slowdown", self.partial_immersion_slowdown),
            ("rotation_sharpness", self.rotation_sharpness),
            ("max_delta_time", self.max_delta_time),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a finite, non-negative number, got {value}"
                )));
            }
        }

        let fractions = [
            ("walkable_floor_z", self.walkable_floor_z),
            ("buoyant_min_immersion", self.buoyant_min_immersion),
            ("partial_immersion_threshold", self.partial_immersion_threshold),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must be within 0..=1, got {value}")));
            }
        }

        if self.max_delta_time == 0.0 {
            return Err(ConfigError::Invalid("max_delta_time must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tuning_is_valid() {
        assert!(MovementTuning::default().validate().is_ok());
    }

    #[test]
    fn test_partial_table_uses_defaults() {
        let tuning = MovementTuning::from_toml_str("max_speed = 5.0\ngravity = 9.81").unwrap();
        assert_eq!(tuning.max_speed, 5.0);
        assert_eq!(tuning.gravity, 9.81);
        assert_eq!(tuning.jump_velocity, MovementTuning::default().jump_velocity);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(MovementTuning::from_toml_str("walkable_floor_z = 1.5").is_err());
        assert!(MovementTuning::from_toml_str("gravity = -9.81").is_err());
        assert!(MovementTuning::from_toml_str("max_delta_time = 0.0").is_err());
    }
}
