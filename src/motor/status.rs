// Read-only snapshots returned by the driver queries

use serde::Serialize;

use super::registers::{Field, StandstillMode};

/// Derived view of the driver configuration
///
/// When the driver is not communicating every field keeps its default
/// (false / 0 / `StandstillMode::Normal`), which is indistinguishable from a
/// freshly reset part. Pair it with `is_communicating` when that matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Settings {
    pub is_communicating: bool,
    pub is_setup: bool,
    pub software_enabled: bool,
    pub microsteps_per_step: u16,
    pub inverse_motor_direction_enabled: bool,
    pub stealth_chop_enabled: bool,
    pub standstill_mode: StandstillMode,
    pub irun_percent: u8,
    pub irun_register_value: u8,
    pub ihold_percent: u8,
    pub ihold_register_value: u8,
    pub iholddelay_percent: u8,
    pub iholddelay_register_value: u8,
    pub automatic_current_scaling_enabled: bool,
    pub automatic_gradient_adaptation_enabled: bool,
    pub pwm_offset: u8,
    pub pwm_gradient: u8,
    pub cool_step_enabled: bool,
    pub analog_current_scaling_enabled: bool,
    pub internal_sense_resistors_enabled: bool,
}

const OTPW: Field = Field::new(0, 1);
const OT: Field = Field::new(1, 1);
const S2GA: Field = Field::new(2, 1);
const S2GB: Field = Field::new(3, 1);
const S2VSA: Field = Field::new(4, 1);
const S2VSB: Field = Field::new(5, 1);
const OLA: Field = Field::new(6, 1);
const OLB: Field = Field::new(7, 1);
const T120: Field = Field::new(8, 1);
const T143: Field = Field::new(9, 1);
const T150: Field = Field::new(10, 1);
const T157: Field = Field::new(11, 1);
const CS_ACTUAL: Field = Field::new(16, 5);
const STEALTH: Field = Field::new(30, 1);
const STST: Field = Field::new(31, 1);

/// DRV_STATUS diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Status {
    pub over_temperature_warning: bool,
    pub over_temperature_shutdown: bool,
    pub short_to_ground_a: bool,
    pub short_to_ground_b: bool,
    pub low_side_short_a: bool,
    pub low_side_short_b: bool,
    pub open_load_a: bool,
    pub open_load_b: bool,
    pub over_temperature_120c: bool,
    pub over_temperature_143c: bool,
    pub over_temperature_150c: bool,
    pub over_temperature_157c: bool,
    pub current_scaling: u8,
    pub stealth_chop_mode: bool,
    pub standstill: bool,
}

impl Status {
    pub fn from_bits(bits: u32) -> Self {
        let flag = |field: Field| field.get(bits) != 0;
        Self {
            over_temperature_warning: flag(OTPW),
            over_temperature_shutdown: flag(OT),
            short_to_ground_a: flag(S2GA),
            short_to_ground_b: flag(S2GB),
            low_side_short_a: flag(S2VSA),
            low_side_short_b: flag(S2VSB),
            open_load_a: flag(OLA),
            open_load_b: flag(OLB),
            over_temperature_120c: flag(T120),
            over_temperature_143c: flag(T143),
            over_temperature_150c: flag(T150),
            over_temperature_157c: flag(T157),
            current_scaling: CS_ACTUAL.get(bits) as u8,
            stealth_chop_mode: flag(STEALTH),
            standstill: flag(STST),
        }
    }

    /// Any condition that shuts the power stage down
    pub fn has_fault(&self) -> bool {
        self.over_temperature_shutdown
            || self.short_to_ground_a
            || self.short_to_ground_b
            || self.low_side_short_a
            || self.low_side_short_b
    }
}

const RESET: Field = Field::new(0, 1);
const DRV_ERR: Field = Field::new(1, 1);
const UV_CP: Field = Field::new(2, 1);

/// GSTAT flags; each is cleared by writing a 1 to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GlobalStatus {
    pub reset: bool,
    pub drv_err: bool,
    pub uv_cp: bool,
}

impl GlobalStatus {
    pub fn from_bits(bits: u32) -> Self {
        Self {
            reset: RESET.get(bits) != 0,
            drv_err: DRV_ERR.get(bits) != 0,
            uv_cp: UV_CP.get(bits) != 0,
        }
    }

    pub fn bits(&self) -> u32 {
        let mut bits = RESET.set(0, u32::from(self.reset));
        bits = DRV_ERR.set(bits, u32::from(self.drv_err));
        UV_CP.set(bits, u32::from(self.uv_cp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        let status = Status::from_bits(0x8000_0000);
        assert!(status.standstill);
        assert!(!status.has_fault());

        let status = Status::from_bits(1 << 1);
        assert!(status.over_temperature_shutdown);
        assert!(status.has_fault());

        let status = Status::from_bits(0x401F_0000);
        assert!(status.stealth_chop_mode);
        assert_eq!(status.current_scaling, 31);

        let status = Status::from_bits(0x0000_00C0);
        assert!(status.open_load_a && status.open_load_b);
        assert!(!status.has_fault());
    }

    #[test]
    fn test_global_status_bits() {
        let clear_reset = GlobalStatus {
            reset: true,
            ..Default::default()
        };
        assert_eq!(clear_reset.bits(), 0b001);

        let all = GlobalStatus::from_bits(0xFFFF_FFFF);
        assert_eq!(all.bits(), 0b111);
        assert!(all.reset && all.drv_err && all.uv_cp);
    }

    #[test]
    fn test_default_settings_serialize() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["microsteps_per_step"], 0);
        assert_eq!(json["standstill_mode"], "normal");
        assert_eq!(json["is_communicating"], false);
    }
}
