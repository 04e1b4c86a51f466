// Conversions between user-facing values and raw register encodings

pub const PERCENT_MIN: u8 = 0;
pub const PERCENT_MAX: u8 = 100;
pub const CURRENT_SETTING_MIN: u8 = 0;
pub const CURRENT_SETTING_MAX: u8 = 31;
pub const HOLD_DELAY_MIN: u8 = 0;
pub const HOLD_DELAY_MAX: u8 = 15;

pub const MICROSTEPS_PER_STEP_MIN: u16 = 1;
pub const MICROSTEPS_PER_STEP_MAX: u16 = 256;

/// Exponent of the finest resolution (256 microsteps)
pub const MICROSTEPS_EXPONENT_MAX: u8 = 8;

/// Linear map of `x` from `[in_min, in_max]` onto `[out_min, out_max]`
///
/// Computed in i64 with truncating division, then clamped to the u8 range.
pub fn map(x: u8, in_min: u8, in_max: u8, out_min: u8, out_max: u8) -> u8 {
    let result = (i64::from(x) - i64::from(in_min)) * (i64::from(out_max) - i64::from(out_min))
        / (i64::from(in_max) - i64::from(in_min))
        + i64::from(out_min);
    result.clamp(i64::from(u8::MIN), i64::from(u8::MAX)) as u8
}

/// Run / hold current percent to IRUN / IHOLD (0..=31)
pub fn percent_to_current_setting(percent: u8) -> u8 {
    let percent = percent.clamp(PERCENT_MIN, PERCENT_MAX);
    map(
        percent,
        PERCENT_MIN,
        PERCENT_MAX,
        CURRENT_SETTING_MIN,
        CURRENT_SETTING_MAX,
    )
}

pub fn current_setting_to_percent(current_setting: u8) -> u8 {
    let current_setting = current_setting.clamp(CURRENT_SETTING_MIN, CURRENT_SETTING_MAX);
    map(
        current_setting,
        CURRENT_SETTING_MIN,
        CURRENT_SETTING_MAX,
        PERCENT_MIN,
        PERCENT_MAX,
    )
}

/// Hold delay percent to IHOLDDELAY (0..=15)
pub fn percent_to_hold_delay_setting(percent: u8) -> u8 {
    let percent = percent.clamp(PERCENT_MIN, PERCENT_MAX);
    map(percent, PERCENT_MIN, PERCENT_MAX, HOLD_DELAY_MIN, HOLD_DELAY_MAX)
}

pub fn hold_delay_setting_to_percent(hold_delay_setting: u8) -> u8 {
    let hold_delay_setting = hold_delay_setting.clamp(HOLD_DELAY_MIN, HOLD_DELAY_MAX);
    map(
        hold_delay_setting,
        HOLD_DELAY_MIN,
        HOLD_DELAY_MAX,
        PERCENT_MIN,
        PERCENT_MAX,
    )
}

/// Exponent for a microsteps-per-step value.
///
/// The input is shifted right once before counting, so any value rounds
/// down to the power of two at or below it (3 -> 2, 255 -> 128). Values
/// above 256 land on exponent 8.
pub fn microsteps_to_exponent(microsteps_per_step: u16) -> u8 {
    let mut shifted =
        microsteps_per_step.clamp(MICROSTEPS_PER_STEP_MIN, MICROSTEPS_PER_STEP_MAX) >> 1;
    let mut exponent = 0u8;
    while shifted > 0 {
        shifted >>= 1;
        exponent += 1;
    }
    exponent
}

/// MRES code for a power-of-two exponent; anything past 8 selects 256 microsteps
pub fn exponent_to_mres(exponent: u8) -> u8 {
    match exponent {
        0..=7 => MICROSTEPS_EXPONENT_MAX - exponent,
        _ => 0,
    }
}

/// Power-of-two exponent for an MRES code; unknown codes read as 256 microsteps
pub fn mres_to_exponent(mres: u8) -> u8 {
    match mres {
        1..=8 => MICROSTEPS_EXPONENT_MAX - mres,
        _ => MICROSTEPS_EXPONENT_MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_current_mapping_endpoints() {
        assert_eq!(percent_to_current_setting(0), CURRENT_SETTING_MIN);
        assert_eq!(percent_to_current_setting(100), CURRENT_SETTING_MAX);
        assert_eq!(percent_to_current_setting(50), 15);
        assert_eq!(current_setting_to_percent(CURRENT_SETTING_MAX), PERCENT_MAX);
        assert_eq!(current_setting_to_percent(CURRENT_SETTING_MIN), PERCENT_MIN);
    }

    #[test]
    fn test_hold_delay_mapping_endpoints() {
        assert_eq!(percent_to_hold_delay_setting(0), HOLD_DELAY_MIN);
        assert_eq!(percent_to_hold_delay_setting(100), HOLD_DELAY_MAX);
        assert_eq!(percent_to_hold_delay_setting(255), HOLD_DELAY_MAX);
        assert_eq!(hold_delay_setting_to_percent(HOLD_DELAY_MAX), PERCENT_MAX);
        assert_eq!(hold_delay_setting_to_percent(200), PERCENT_MAX);
    }

    #[test]
    fn test_current_roundtrip_resolution() {
        // One register step is 100 / 31 percent
        for percent in [0u8, 25, 50, 75, 100] {
            let back = current_setting_to_percent(percent_to_current_setting(percent));
            assert!(
                percent.abs_diff(back) <= 4,
                "{percent}% came back as {back}%"
            );
        }
    }

    #[test]
    fn test_map_clamps_output() {
        // Would be 300 before the final clamp
        assert_eq!(map(30, 0, 10, 0, 100), u8::MAX);
        assert_eq!(map(0, 10, 20, 0, 100), u8::MIN);
    }

    #[quickcheck]
    fn current_mapping_is_monotonic(a: u8, b: u8) -> TestResult {
        if a > PERCENT_MAX || b > PERCENT_MAX {
            return TestResult::discard();
        }
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        TestResult::from_bool(percent_to_current_setting(lo) <= percent_to_current_setting(hi))
    }

    #[quickcheck]
    fn out_of_range_percent_is_clamped(x: u8) -> bool {
        let clamped = x.clamp(PERCENT_MIN, PERCENT_MAX);
        percent_to_current_setting(clamped) == percent_to_current_setting(x)
            && percent_to_hold_delay_setting(clamped) == percent_to_hold_delay_setting(x)
    }

    #[test]
    fn test_microsteps_to_exponent_table() {
        let cases: [(u16, u8); 22] = [
            (0, 0),
            (1, 0),
            (2, 1),
            (3, 1),
            (4, 2),
            (5, 2),
            (7, 2),
            (8, 3),
            (15, 3),
            (16, 4),
            (17, 4),
            (31, 4),
            (32, 5),
            (63, 5),
            (64, 6),
            (127, 6),
            (128, 7),
            (200, 7),
            (255, 7),
            (256, 8),
            (257, 8),
            (u16::MAX, 8),
        ];
        for (input, exponent) in cases {
            assert_eq!(
                microsteps_to_exponent(input),
                exponent,
                "microsteps {input}"
            );
        }
    }

    #[test]
    fn test_every_input_lands_on_floor_power_of_two() {
        for input in 1..=MICROSTEPS_PER_STEP_MAX {
            let exponent = microsteps_to_exponent(input);
            assert!(1u16 << exponent <= input);
            assert!(input < 1u16 << (exponent + 1));
        }
    }

    #[test]
    fn test_mres_table() {
        for exponent in 0..=MICROSTEPS_EXPONENT_MAX {
            assert_eq!(mres_to_exponent(exponent_to_mres(exponent)), exponent);
        }
        assert_eq!(exponent_to_mres(4), 4);
        assert_eq!(exponent_to_mres(0), 8);
        assert_eq!(exponent_to_mres(9), 0);
        assert_eq!(exponent_to_mres(u8::MAX), 0);
        assert_eq!(mres_to_exponent(0), 8);
        assert_eq!(mres_to_exponent(15), 8);
    }
}
