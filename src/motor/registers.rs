// TMC2209 register map
//
// Each register word is a newtype over u32. Fields are read and written
// through explicit bit offsets / widths, so reserved bits read back from the
// driver survive a later rewrite.

use serde::Serialize;

/// Register addresses
pub mod address {
    // General configuration
    pub const GCONF: u8 = 0x00;
    pub const GSTAT: u8 = 0x01;
    pub const IFCNT: u8 = 0x02;
    pub const REPLYDELAY: u8 = 0x03;
    pub const IOIN: u8 = 0x06;

    // Velocity dependent control
    pub const IHOLD_IRUN: u8 = 0x10;
    pub const TPOWERDOWN: u8 = 0x11;
    pub const TSTEP: u8 = 0x12;
    pub const TPWMTHRS: u8 = 0x13;
    pub const TCOOLTHRS: u8 = 0x14;
    pub const VACTUAL: u8 = 0x22;

    // StallGuard / CoolStep
    pub const SGTHRS: u8 = 0x40;
    pub const SG_RESULT: u8 = 0x41;
    pub const COOLCONF: u8 = 0x42;

    // Microstepping and driver
    pub const MSCNT: u8 = 0x6A;
    pub const CHOPCONF: u8 = 0x6C;
    pub const DRV_STATUS: u8 = 0x6F;
    pub const PWMCONF: u8 = 0x70;
    pub const PWM_SCALE: u8 = 0x71;
    pub const PWM_AUTO: u8 = 0x72;
}

/// Silicon version reported in IOIN
pub const VERSION: u8 = 0x21;

pub const CHOPPER_CONFIG_DEFAULT: u32 = 0x1000_0053;
pub const TBL_DEFAULT: u8 = 0b10;
pub const HEND_DEFAULT: u8 = 0;
pub const HSTART_DEFAULT: u8 = 5;
pub const TOFF_DEFAULT: u8 = 3;
pub const TOFF_DISABLE: u8 = 0;

pub const PWM_CONFIG_DEFAULT: u32 = 0xC10D_0024;
pub const COOLCONF_DEFAULT: u32 = 0;

pub const IHOLD_DEFAULT: u8 = 16;
pub const IRUN_DEFAULT: u8 = 31;
pub const IHOLDDELAY_DEFAULT: u8 = 1;

pub const TPOWERDOWN_DEFAULT: u8 = 20;
pub const TPWMTHRS_DEFAULT: u32 = 0;
pub const TCOOLTHRS_DEFAULT: u32 = 0;
pub const SGTHRS_DEFAULT: u8 = 0;
pub const VACTUAL_DEFAULT: i32 = 0;
pub const VACTUAL_STEP_DIR_INTERFACE: i32 = 0;

/// VACTUAL is a signed 24-bit register
pub const VACTUAL_MAX: i32 = (1 << 23) - 1;
pub const VACTUAL_MIN: i32 = -VACTUAL_MAX;

/// TPWMTHRS / TCOOLTHRS are 20 bits wide
pub const DURATION_THRESHOLD_MAX: u32 = (1 << 20) - 1;

pub const REPLY_DELAY_MAX: u8 = 15;

// COOLCONF limits
pub const SEIMIN_UPPER_CURRENT_LIMIT: u8 = 20;
pub const SEMIN_OFF: u8 = 0;
pub const SEMIN_MIN: u8 = 1;
pub const SEMIN_MAX: u8 = 15;
pub const SEMAX_MIN: u8 = 0;
pub const SEMAX_MAX: u8 = 15;

/// A bit range inside a 32-bit register word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    offset: u32,
    width: u32,
}

impl Field {
    /// Panics unless `width` is at least 1 and the field fits in 32 bits
    pub const fn new(offset: u32, width: u32) -> Self {
        assert!(width > 0 && offset + width <= 32, "field outside a 32-bit word");
        Self { offset, width }
    }

    const fn mask(self) -> u32 {
        (u32::MAX >> (32 - self.width)) << self.offset
    }

    /// Extract this field from `word`
    pub const fn get(self, word: u32) -> u32 {
        (word & self.mask()) >> self.offset
    }

    /// Return `word` with this field replaced by `value` (excess bits dropped)
    pub const fn set(self, word: u32, value: u32) -> u32 {
        (word & !self.mask()) | ((value << self.offset) & self.mask())
    }
}

/// Types a register field can be read as
pub trait FieldValue: Copy {
    fn from_field(raw: u32) -> Self;
    fn into_field(self) -> u32;
}

impl FieldValue for bool {
    fn from_field(raw: u32) -> Self {
        raw != 0
    }

    fn into_field(self) -> u32 {
        u32::from(self)
    }
}

impl FieldValue for u8 {
    fn from_field(raw: u32) -> Self {
        raw as u8
    }

    fn into_field(self) -> u32 {
        u32::from(self)
    }
}

impl FieldValue for u16 {
    fn from_field(raw: u32) -> Self {
        raw as u16
    }

    fn into_field(self) -> u32 {
        u32::from(self)
    }
}

/// Declare a register word with `field()` / `set_field()` accessors
macro_rules! register {
    (
        $(#[$meta:meta])*
        $name:ident @ $address:path {
            $( $(#[$field_meta:meta])* $field:ident: $ty:ty = $offset:literal, $width:literal; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(u32);

        impl $name {
            pub const ADDRESS: u8 = $address;

            pub const fn from_bits(bits: u32) -> Self {
                Self(bits)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            paste::paste! {
                $(
                    $(#[$field_meta])*
                    pub fn $field(&self) -> $ty {
                        <$ty as FieldValue>::from_field(Field::new($offset, $width).get(self.0))
                    }

                    pub fn [<set_ $field>](&mut self, value: $ty) {
                        self.0 = Field::new($offset, $width).set(self.0, value.into_field());
                    }
                )*
            }
        }
    };
}

register! {
    /// GCONF: global configuration
    GlobalConfig @ address::GCONF {
        i_scale_analog: bool = 0, 1;
        internal_rsense: bool = 1, 1;
        enable_spread_cycle: bool = 2, 1;
        /// Inverse motor direction
        shaft: bool = 3, 1;
        index_otpw: bool = 4, 1;
        index_step: bool = 5, 1;
        /// Set once the UART owns the PDN pin (serial mode)
        pdn_disable: bool = 6, 1;
        mstep_reg_select: bool = 7, 1;
        multistep_filt: bool = 8, 1;
        test_mode: bool = 9, 1;
    }
}

register! {
    /// CHOPCONF: chopper and microstep configuration
    ChopperConfig @ address::CHOPCONF {
        /// Off time; 0 disables the driver stage
        toff: u8 = 0, 4;
        hstart: u8 = 4, 3;
        hend: u8 = 7, 4;
        tbl: u8 = 15, 2;
        vsense: bool = 17, 1;
        /// Microstep resolution code, 0 = 256 .. 8 = full step
        mres: u8 = 24, 4;
        interpolation: bool = 28, 1;
        double_edge: bool = 29, 1;
        diss2g: bool = 30, 1;
        diss2vs: bool = 31, 1;
    }
}

register! {
    /// PWMCONF: StealthChop configuration
    PwmConfig @ address::PWMCONF {
        pwm_offset: u8 = 0, 8;
        pwm_grad: u8 = 8, 8;
        pwm_freq: u8 = 16, 2;
        pwm_autoscale: bool = 18, 1;
        pwm_autograd: bool = 19, 1;
        /// Standstill mode when the hold current is zero
        freewheel: u8 = 20, 2;
        pwm_reg: u8 = 24, 4;
        pwm_lim: u8 = 28, 4;
    }
}

register! {
    /// COOLCONF: CoolStep configuration (write only)
    CoolConfig @ address::COOLCONF {
        /// Lower StallGuard threshold; 0 turns CoolStep off
        semin: u8 = 0, 4;
        seup: u8 = 5, 2;
        semax: u8 = 8, 4;
        sedn: u8 = 13, 2;
        seimin: bool = 15, 1;
    }
}

register! {
    /// IHOLD_IRUN: driver current (write only)
    DriverCurrent @ address::IHOLD_IRUN {
        ihold: u8 = 0, 5;
        irun: u8 = 8, 5;
        iholddelay: u8 = 16, 4;
    }
}

register! {
    /// IOIN: input pin states and silicon version (read only)
    Input @ address::IOIN {
        /// Hardware enable input; high means disabled
        enn: bool = 0, 1;
        ms1: bool = 2, 1;
        ms2: bool = 3, 1;
        diag: bool = 4, 1;
        pdn_serial: bool = 6, 1;
        step: bool = 7, 1;
        spread_en: bool = 8, 1;
        dir: bool = 9, 1;
        version: u8 = 24, 8;
    }
}

register! {
    /// REPLYDELAY: bit times the driver waits before answering
    ReplyDelay @ address::REPLYDELAY {
        replydelay: u8 = 8, 4;
    }
}

register! {
    /// PWM_SCALE: StealthChop amplitude results (read only)
    PwmScale @ address::PWM_SCALE {
        pwm_scale_sum: u8 = 0, 8;
        pwm_scale_auto_raw: u16 = 16, 9;
    }
}

impl PwmScale {
    /// Signed 9-bit automatic amplitude regulation result
    pub fn pwm_scale_auto(&self) -> i16 {
        let raw = self.pwm_scale_auto_raw() as i16;
        (raw << 7) >> 7
    }
}

register! {
    /// PWM_AUTO: automatically determined PWM settings (read only)
    PwmAuto @ address::PWM_AUTO {
        pwm_offset_auto: u8 = 0, 8;
        pwm_gradient_auto: u8 = 16, 8;
    }
}

/// Behaviour while the motor is at standstill
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StandstillMode {
    #[default]
    Normal = 0,
    Freewheeling = 1,
    StrongBraking = 2,
    Braking = 3,
}

impl StandstillMode {
    /// Decode the 2-bit freewheel field
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Normal,
            1 => Self::Freewheeling,
            2 => Self::StrongBraking,
            _ => Self::Braking,
        }
    }
}

/// CoolStep current increment per measurement (SEUP)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentIncrement {
    Increment1 = 0,
    Increment2 = 1,
    Increment4 = 2,
    Increment8 = 3,
}

/// StallGuard measurements per CoolStep current decrement (SEDN)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementCount {
    Count32 = 0,
    Count8 = 1,
    Count2 = 2,
    Count1 = 3,
}

/// UART address selected by the MS1/MS2 pins
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerialAddress {
    #[default]
    Address0 = 0,
    Address1 = 1,
    Address2 = 2,
    Address3 = 3,
}

impl SerialAddress {
    pub const ALL: [SerialAddress; 4] = [
        Self::Address0,
        Self::Address1,
        Self::Address2,
        Self::Address3,
    ];
}

impl TryFrom<u8> for SerialAddress {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL.get(usize::from(value)).copied().ok_or(value)
    }
}
