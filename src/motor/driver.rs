// High-level TMC2209 driver
//
// Keeps a write-through cache of the configuration registers. Setters build
// the new register word, send the whole register, and only then commit it to
// the cache, so the cache always holds what the driver last accepted.
// IHOLD_IRUN and COOLCONF are write-only and never read back.

use std::io;
use tracing::{debug, info, warn};

use crate::config::BusConfig;

use super::datagram::{self, READ_REQUEST_SIZE, WRITE_READ_REPLY_SIZE};
use super::mapping::{
    CURRENT_SETTING_MIN, current_setting_to_percent, exponent_to_mres,
    hold_delay_setting_to_percent, microsteps_to_exponent, mres_to_exponent,
    percent_to_current_setting, percent_to_hold_delay_setting,
};
use super::registers::{
    CHOPPER_CONFIG_DEFAULT, COOLCONF_DEFAULT, ChopperConfig, CoolConfig, CurrentIncrement,
    DURATION_THRESHOLD_MAX, DriverCurrent, GlobalConfig, HEND_DEFAULT, HSTART_DEFAULT,
    IHOLD_DEFAULT, IHOLDDELAY_DEFAULT, IRUN_DEFAULT, Input, MeasurementCount, PWM_CONFIG_DEFAULT,
    PwmAuto, PwmConfig, PwmScale, REPLY_DELAY_MAX, ReplyDelay, SEIMIN_UPPER_CURRENT_LIMIT,
    SEMAX_MAX, SEMAX_MIN, SEMIN_MAX, SEMIN_MIN, SEMIN_OFF, SGTHRS_DEFAULT, SerialAddress,
    StandstillMode, TBL_DEFAULT, TCOOLTHRS_DEFAULT, TOFF_DEFAULT, TOFF_DISABLE,
    TPOWERDOWN_DEFAULT, TPWMTHRS_DEFAULT, VACTUAL_DEFAULT, VACTUAL_MAX, VACTUAL_MIN,
    VACTUAL_STEP_DIR_INTERFACE, VERSION, address,
};
use super::status::{GlobalStatus, Settings, Status};
use super::transport::{EnablePin, NoPin, Transport, TransportError};

/// Error types for driver transactions
#[derive(Debug, thiserror::Error)]
pub enum TmcError {
    #[error("Timeout on register 0x{register:02X} of driver {address}")]
    Timeout { address: u8, register: u8 },

    #[error("Checksum mismatch in reply from register 0x{register:02X} of driver {address}")]
    ChecksumMismatch { address: u8, register: u8 },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Enable pin error: {0}")]
    EnablePin(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, TmcError>;

const VACTUAL_MASK: u32 = 0x00FF_FFFF;
const IFCNT_MASK: u32 = 0xFF;
const TSTEP_MASK: u32 = 0x000F_FFFF;
const SG_RESULT_MASK: u32 = 0x03FF;
const MSCNT_MASK: u32 = 0x03FF;

/// One TMC2209 on the shared UART, selected by its serial address
pub struct Tmc2209<T, P = NoPin> {
    transport: T,
    enable_pin: P,
    serial_address: SerialAddress,
    config: BusConfig,
    global_config: GlobalConfig,
    chopper_config: ChopperConfig,
    pwm_config: PwmConfig,
    cool_config: CoolConfig,
    driver_current: DriverCurrent,
    cool_step_enabled: bool,
    write_failures: u32,
}

impl<T: Transport> Tmc2209<T, NoPin> {
    /// Create a driver handle. Nothing is sent until `setup`.
    pub fn new(transport: T, serial_address: SerialAddress, config: BusConfig) -> Self {
        Self {
            transport,
            enable_pin: NoPin,
            serial_address,
            config,
            global_config: GlobalConfig::default(),
            chopper_config: ChopperConfig::default(),
            pwm_config: PwmConfig::default(),
            cool_config: CoolConfig::default(),
            driver_current: DriverCurrent::default(),
            cool_step_enabled: false,
            write_failures: 0,
        }
    }
}

impl<T: Transport, P: EnablePin> Tmc2209<T, P> {
    /// Attach a hardware enable pin, driven high on `enable` and low on `disable`
    pub fn with_enable_pin<Q: EnablePin>(self, enable_pin: Q) -> Tmc2209<T, Q> {
        Tmc2209 {
            transport: self.transport,
            enable_pin,
            serial_address: self.serial_address,
            config: self.config,
            global_config: self.global_config,
            chopper_config: self.chopper_config,
            pwm_config: self.pwm_config,
            cool_config: self.cool_config,
            driver_current: self.driver_current,
            cool_step_enabled: self.cool_step_enabled,
            write_failures: self.write_failures,
        }
    }

    // === Setup ===

    /// Put the driver in UART mode and load known register values.
    ///
    /// Leaves the driver disabled with minimal current.
    pub fn setup(&mut self) -> Result<()> {
        info!("Setting up driver {}", self.address());
        self.set_operation_mode_to_serial()?;
        self.set_registers_to_defaults()?;
        self.clear_drive_error()?;

        self.minimize_motor_current()?;
        self.disable()?;
        self.disable_automatic_current_scaling()?;
        self.disable_automatic_gradient_adaptation()
    }

    fn set_operation_mode_to_serial(&mut self) -> Result<()> {
        let mut gconf = GlobalConfig::default();
        gconf.set_i_scale_analog(false);
        gconf.set_pdn_disable(true);
        gconf.set_mstep_reg_select(true);
        gconf.set_multistep_filt(true);
        self.update_global_config(|stored| *stored = gconf)
    }

    fn set_registers_to_defaults(&mut self) -> Result<()> {
        let mut current = DriverCurrent::default();
        current.set_ihold(IHOLD_DEFAULT);
        current.set_irun(IRUN_DEFAULT);
        current.set_iholddelay(IHOLDDELAY_DEFAULT);
        self.write(address::IHOLD_IRUN, current.bits())?;
        self.driver_current = current;

        let mut chop = ChopperConfig::from_bits(CHOPPER_CONFIG_DEFAULT);
        chop.set_tbl(TBL_DEFAULT);
        chop.set_hend(HEND_DEFAULT);
        chop.set_hstart(HSTART_DEFAULT);
        chop.set_toff(TOFF_DEFAULT);
        self.update_chopper_config(|stored| *stored = chop)?;

        self.update_pwm_config(|stored| *stored = PwmConfig::from_bits(PWM_CONFIG_DEFAULT))?;

        self.write(address::COOLCONF, COOLCONF_DEFAULT)?;
        let seimin = self.seimin();
        self.cool_config = CoolConfig::from_bits(COOLCONF_DEFAULT);
        self.cool_config.set_seimin(seimin);
        self.cool_step_enabled = false;

        self.write(address::TPOWERDOWN, u32::from(TPOWERDOWN_DEFAULT))?;
        self.write(address::TPWMTHRS, TPWMTHRS_DEFAULT)?;
        self.write(address::VACTUAL, VACTUAL_DEFAULT as u32)?;
        self.write(address::TCOOLTHRS, TCOOLTHRS_DEFAULT)?;
        self.write(address::SGTHRS, u32::from(SGTHRS_DEFAULT))
    }

    fn minimize_motor_current(&mut self) -> Result<()> {
        self.update_driver_current(|current| {
            current.set_irun(CURRENT_SETTING_MIN);
            current.set_ihold(CURRENT_SETTING_MIN);
        })
    }

    // === Enable / disable ===

    /// Restore TOFF, then raise the enable pin. A failed write leaves the pin alone.
    pub fn enable(&mut self) -> Result<()> {
        info!("Enabling driver {}", self.address());
        self.update_chopper_config(|chop| chop.set_toff(TOFF_DEFAULT))?;
        self.enable_pin.set_level(true).map_err(TmcError::EnablePin)
    }

    pub fn disable(&mut self) -> Result<()> {
        info!("Disabling driver {}", self.address());
        self.update_chopper_config(|chop| chop.set_toff(TOFF_DISABLE))?;
        self.enable_pin.set_level(false).map_err(TmcError::EnablePin)
    }

    // === Microstepping ===

    /// Select the microstep resolution at or below `microsteps_per_step` (1..=256)
    pub fn set_microsteps_per_step(&mut self, microsteps_per_step: u16) -> Result<()> {
        let exponent = microsteps_to_exponent(microsteps_per_step);
        self.set_microsteps_per_step_power_of_two(exponent)
    }

    /// Select 2^exponent microsteps per step; anything past 8 means 256
    pub fn set_microsteps_per_step_power_of_two(&mut self, exponent: u8) -> Result<()> {
        let mres = exponent_to_mres(exponent);
        self.update_chopper_config(|chop| chop.set_mres(mres))
    }

    /// Cached microstep resolution (no bus traffic)
    pub fn microsteps_per_step(&self) -> u16 {
        1 << mres_to_exponent(self.chopper_config.mres())
    }

    // === Current ===

    pub fn set_run_current(&mut self, percent: u8) -> Result<()> {
        let run_current = percent_to_current_setting(percent);
        self.update_driver_current(|current| current.set_irun(run_current))
    }

    pub fn set_hold_current(&mut self, percent: u8) -> Result<()> {
        let hold_current = percent_to_current_setting(percent);
        self.update_driver_current(|current| current.set_ihold(hold_current))
    }

    pub fn set_hold_delay(&mut self, percent: u8) -> Result<()> {
        let hold_delay = percent_to_hold_delay_setting(percent);
        self.update_driver_current(|current| current.set_iholddelay(hold_delay))
    }

    pub fn set_all_current_values(
        &mut self,
        run_current_percent: u8,
        hold_current_percent: u8,
        hold_delay_percent: u8,
    ) -> Result<()> {
        let run_current = percent_to_current_setting(run_current_percent);
        let hold_current = percent_to_current_setting(hold_current_percent);
        let hold_delay = percent_to_hold_delay_setting(hold_delay_percent);
        self.update_driver_current(|current| {
            current.set_irun(run_current);
            current.set_ihold(hold_current);
            current.set_iholddelay(hold_delay);
        })
    }

    // === Global configuration ===

    pub fn enable_inverse_motor_direction(&mut self) -> Result<()> {
        self.update_global_config(|gconf| gconf.set_shaft(true))
    }

    pub fn disable_inverse_motor_direction(&mut self) -> Result<()> {
        self.update_global_config(|gconf| gconf.set_shaft(false))
    }

    pub fn enable_stealth_chop(&mut self) -> Result<()> {
        self.update_global_config(|gconf| gconf.set_enable_spread_cycle(false))
    }

    pub fn disable_stealth_chop(&mut self) -> Result<()> {
        self.update_global_config(|gconf| gconf.set_enable_spread_cycle(true))
    }

    pub fn enable_analog_current_scaling(&mut self) -> Result<()> {
        self.update_global_config(|gconf| gconf.set_i_scale_analog(true))
    }

    pub fn disable_analog_current_scaling(&mut self) -> Result<()> {
        self.update_global_config(|gconf| gconf.set_i_scale_analog(false))
    }

    pub fn use_external_sense_resistors(&mut self) -> Result<()> {
        self.update_global_config(|gconf| gconf.set_internal_rsense(false))
    }

    pub fn use_internal_sense_resistors(&mut self) -> Result<()> {
        self.update_global_config(|gconf| gconf.set_internal_rsense(true))
    }

    // === Chopper ===

    pub fn enable_double_edge(&mut self) -> Result<()> {
        self.update_chopper_config(|chop| chop.set_double_edge(true))
    }

    pub fn disable_double_edge(&mut self) -> Result<()> {
        self.update_chopper_config(|chop| chop.set_double_edge(false))
    }

    // === StealthChop PWM ===

    pub fn set_standstill_mode(&mut self, mode: StandstillMode) -> Result<()> {
        self.update_pwm_config(|pwm| pwm.set_freewheel(mode as u8))
    }

    pub fn enable_automatic_current_scaling(&mut self) -> Result<()> {
        self.update_pwm_config(|pwm| pwm.set_pwm_autoscale(true))
    }

    pub fn disable_automatic_current_scaling(&mut self) -> Result<()> {
        self.update_pwm_config(|pwm| pwm.set_pwm_autoscale(false))
    }

    pub fn enable_automatic_gradient_adaptation(&mut self) -> Result<()> {
        self.update_pwm_config(|pwm| pwm.set_pwm_autograd(true))
    }

    pub fn disable_automatic_gradient_adaptation(&mut self) -> Result<()> {
        self.update_pwm_config(|pwm| pwm.set_pwm_autograd(false))
    }

    pub fn set_pwm_offset(&mut self, pwm_amplitude: u8) -> Result<()> {
        self.update_pwm_config(|pwm| pwm.set_pwm_offset(pwm_amplitude))
    }

    pub fn set_pwm_gradient(&mut self, pwm_amplitude: u8) -> Result<()> {
        self.update_pwm_config(|pwm| pwm.set_pwm_grad(pwm_amplitude))
    }

    // === CoolStep ===

    /// Turn CoolStep on with the given StallGuard thresholds (clamped to 1..=15 / 0..=15)
    pub fn enable_cool_step(&mut self, lower_threshold: u8, upper_threshold: u8) -> Result<()> {
        let lower_threshold = lower_threshold.clamp(SEMIN_MIN, SEMIN_MAX);
        let upper_threshold = upper_threshold.clamp(SEMAX_MIN, SEMAX_MAX);
        self.update_cool_config(|cool| {
            cool.set_semin(lower_threshold);
            cool.set_semax(upper_threshold);
        })?;
        self.cool_step_enabled = true;
        Ok(())
    }

    pub fn disable_cool_step(&mut self) -> Result<()> {
        self.update_cool_config(|cool| cool.set_semin(SEMIN_OFF))?;
        self.cool_step_enabled = false;
        Ok(())
    }

    pub fn set_cool_step_current_increment(&mut self, increment: CurrentIncrement) -> Result<()> {
        self.update_cool_config(|cool| cool.set_seup(increment as u8))
    }

    pub fn set_cool_step_measurement_count(&mut self, count: MeasurementCount) -> Result<()> {
        self.update_cool_config(|cool| cool.set_sedn(count as u8))
    }

    // === Uncached registers ===

    pub fn set_power_down_delay(&mut self, power_down_delay: u8) -> Result<()> {
        self.write(address::TPOWERDOWN, u32::from(power_down_delay))
    }

    pub fn set_reply_delay(&mut self, reply_delay: u8) -> Result<()> {
        let mut delay = ReplyDelay::default();
        delay.set_replydelay(reply_delay.min(REPLY_DELAY_MAX));
        self.write(address::REPLYDELAY, delay.bits())
    }

    /// Drive the motor from the internal pulse generator
    pub fn move_at_velocity(&mut self, microsteps_per_period: i32) -> Result<()> {
        let velocity = microsteps_per_period.clamp(VACTUAL_MIN, VACTUAL_MAX);
        self.write(address::VACTUAL, velocity as u32 & VACTUAL_MASK)
    }

    /// Hand motion back to the STEP/DIR inputs
    pub fn move_using_step_dir_interface(&mut self) -> Result<()> {
        self.write(address::VACTUAL, VACTUAL_STEP_DIR_INTERFACE as u32)
    }

    pub fn set_cool_step_duration_threshold(&mut self, duration_threshold: u32) -> Result<()> {
        self.write(
            address::TCOOLTHRS,
            duration_threshold.min(DURATION_THRESHOLD_MAX),
        )
    }

    pub fn set_stealth_chop_duration_threshold(&mut self, duration_threshold: u32) -> Result<()> {
        self.write(
            address::TPWMTHRS,
            duration_threshold.min(DURATION_THRESHOLD_MAX),
        )
    }

    pub fn set_stall_guard_threshold(&mut self, stall_guard_threshold: u8) -> Result<()> {
        self.write(address::SGTHRS, u32::from(stall_guard_threshold))
    }

    // === Queries ===

    pub fn get_version(&mut self) -> Result<u8> {
        Ok(Input::from_bits(self.read(address::IOIN)?).version())
    }

    /// True when the driver answers with the expected silicon version
    pub fn is_communicating(&mut self) -> bool {
        match self.get_version() {
            Ok(version) if version == VERSION => true,
            Ok(version) => {
                warn!(
                    "Driver {} reported version 0x{:02X}, expected 0x{:02X}",
                    self.address(),
                    version,
                    VERSION
                );
                false
            }
            Err(e) => {
                warn!("Driver {} not communicating: {}", self.address(), e);
                false
            }
        }
    }

    /// True when the driver answers and is in UART mode (fresh GCONF read)
    pub fn is_setup_and_communicating(&mut self) -> bool {
        match self.read(address::GCONF) {
            Ok(bits) => GlobalConfig::from_bits(bits).pdn_disable(),
            Err(e) => {
                warn!("Driver {} not communicating: {}", self.address(), e);
                false
            }
        }
    }

    pub fn is_communicating_but_not_setup(&mut self) -> bool {
        self.is_communicating() && !self.is_setup_and_communicating()
    }

    /// State of the hardware enable input (ENN high means disabled)
    pub fn hardware_disabled(&mut self) -> Result<bool> {
        Ok(Input::from_bits(self.read(address::IOIN)?).enn())
    }

    /// Refresh GCONF, CHOPCONF and PWMCONF from the driver.
    ///
    /// All three are read before any is stored; a failure leaves the cache as it was.
    pub fn read_and_store_registers(&mut self) -> Result<()> {
        let gconf = self.read(address::GCONF)?;
        let chopconf = self.read(address::CHOPCONF)?;
        let pwmconf = self.read(address::PWMCONF)?;

        self.global_config = GlobalConfig::from_bits(gconf);
        self.chopper_config = ChopperConfig::from_bits(chopconf);
        self.pwm_config = PwmConfig::from_bits(pwmconf);
        Ok(())
    }

    /// Snapshot of the configuration; all defaults if the driver does not answer
    pub fn get_settings(&mut self) -> Settings {
        if !self.is_communicating() {
            return Settings::default();
        }
        if let Err(e) = self.read_and_store_registers() {
            warn!("Failed to refresh driver {} registers: {}", self.address(), e);
            return Settings::default();
        }

        let gconf = self.global_config;
        let chop = self.chopper_config;
        let pwm = self.pwm_config;
        let current = self.driver_current;
        Settings {
            is_communicating: true,
            is_setup: gconf.pdn_disable(),
            software_enabled: chop.toff() > TOFF_DISABLE,
            microsteps_per_step: self.microsteps_per_step(),
            inverse_motor_direction_enabled: gconf.shaft(),
            stealth_chop_enabled: !gconf.enable_spread_cycle(),
            standstill_mode: StandstillMode::from_bits(pwm.freewheel()),
            irun_percent: current_setting_to_percent(current.irun()),
            irun_register_value: current.irun(),
            ihold_percent: current_setting_to_percent(current.ihold()),
            ihold_register_value: current.ihold(),
            iholddelay_percent: hold_delay_setting_to_percent(current.iholddelay()),
            iholddelay_register_value: current.iholddelay(),
            automatic_current_scaling_enabled: pwm.pwm_autoscale(),
            automatic_gradient_adaptation_enabled: pwm.pwm_autograd(),
            pwm_offset: pwm.pwm_offset(),
            pwm_gradient: pwm.pwm_grad(),
            cool_step_enabled: self.cool_step_enabled,
            analog_current_scaling_enabled: gconf.i_scale_analog(),
            internal_sense_resistors_enabled: gconf.internal_rsense(),
        }
    }

    pub fn get_status(&mut self) -> Result<Status> {
        Ok(Status::from_bits(self.read(address::DRV_STATUS)?))
    }

    pub fn get_global_status(&mut self) -> Result<GlobalStatus> {
        Ok(GlobalStatus::from_bits(self.read(address::GSTAT)?))
    }

    /// Acknowledge the reset flag (write 1 to clear, every other bit 0)
    pub fn clear_reset(&mut self) -> Result<()> {
        let clear = GlobalStatus {
            reset: true,
            ..Default::default()
        };
        self.write(address::GSTAT, clear.bits())
    }

    /// Acknowledge the drive error flag (write 1 to clear, every other bit 0)
    pub fn clear_drive_error(&mut self) -> Result<()> {
        let clear = GlobalStatus {
            drv_err: true,
            ..Default::default()
        };
        self.write(address::GSTAT, clear.bits())
    }

    /// Successful writes counted by the driver, modulo 256
    pub fn get_interface_transmission_counter(&mut self) -> Result<u8> {
        Ok((self.read(address::IFCNT)? & IFCNT_MASK) as u8)
    }

    pub fn get_interstep_duration(&mut self) -> Result<u32> {
        Ok(self.read(address::TSTEP)? & TSTEP_MASK)
    }

    pub fn get_stall_guard_result(&mut self) -> Result<u16> {
        Ok((self.read(address::SG_RESULT)? & SG_RESULT_MASK) as u16)
    }

    pub fn get_pwm_scale_sum(&mut self) -> Result<u8> {
        Ok(PwmScale::from_bits(self.read(address::PWM_SCALE)?).pwm_scale_sum())
    }

    pub fn get_pwm_scale_auto(&mut self) -> Result<i16> {
        Ok(PwmScale::from_bits(self.read(address::PWM_SCALE)?).pwm_scale_auto())
    }

    pub fn get_pwm_offset_auto(&mut self) -> Result<u8> {
        Ok(PwmAuto::from_bits(self.read(address::PWM_AUTO)?).pwm_offset_auto())
    }

    pub fn get_pwm_gradient_auto(&mut self) -> Result<u8> {
        Ok(PwmAuto::from_bits(self.read(address::PWM_AUTO)?).pwm_gradient_auto())
    }

    pub fn get_microstep_counter(&mut self) -> Result<u16> {
        Ok((self.read(address::MSCNT)? & MSCNT_MASK) as u16)
    }

    // === Cache access ===

    pub fn global_config(&self) -> GlobalConfig {
        self.global_config
    }

    pub fn chopper_config(&self) -> ChopperConfig {
        self.chopper_config
    }

    pub fn pwm_config(&self) -> PwmConfig {
        self.pwm_config
    }

    pub fn cool_config(&self) -> CoolConfig {
        self.cool_config
    }

    pub fn driver_current(&self) -> DriverCurrent {
        self.driver_current
    }

    pub fn cool_step_enabled(&self) -> bool {
        self.cool_step_enabled
    }

    pub fn serial_address(&self) -> SerialAddress {
        self.serial_address
    }

    /// Writes that failed since construction
    pub fn write_failures(&self) -> u32 {
        self.write_failures
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // === Write-through helpers ===

    fn update_global_config(&mut self, update: impl FnOnce(&mut GlobalConfig)) -> Result<()> {
        let mut next = self.global_config;
        update(&mut next);
        self.write(address::GCONF, next.bits())?;
        self.global_config = next;
        Ok(())
    }

    fn update_chopper_config(&mut self, update: impl FnOnce(&mut ChopperConfig)) -> Result<()> {
        let mut next = self.chopper_config;
        update(&mut next);
        self.write(address::CHOPCONF, next.bits())?;
        self.chopper_config = next;
        Ok(())
    }

    fn update_pwm_config(&mut self, update: impl FnOnce(&mut PwmConfig)) -> Result<()> {
        let mut next = self.pwm_config;
        update(&mut next);
        self.write(address::PWMCONF, next.bits())?;
        self.pwm_config = next;
        Ok(())
    }

    /// Every COOLCONF write carries the seimin that matches the committed run current.
    fn update_cool_config(&mut self, update: impl FnOnce(&mut CoolConfig)) -> Result<()> {
        let mut next = self.cool_config;
        update(&mut next);
        next.set_seimin(self.seimin());
        self.write(address::COOLCONF, next.bits())?;
        self.cool_config = next;
        Ok(())
    }

    /// Rewrite IHOLD_IRUN, then keep COOLCONF.seimin in step with the run current.
    /// COOLCONF only goes out while CoolStep is enabled.
    fn update_driver_current(&mut self, update: impl FnOnce(&mut DriverCurrent)) -> Result<()> {
        let mut next = self.driver_current;
        update(&mut next);
        self.write(address::IHOLD_IRUN, next.bits())?;
        self.driver_current = next;

        if self.cool_step_enabled {
            self.update_cool_config(|_| {})
        } else {
            let seimin = self.seimin();
            self.cool_config.set_seimin(seimin);
            Ok(())
        }
    }

    fn seimin(&self) -> bool {
        self.driver_current.irun() >= SEIMIN_UPPER_CURRENT_LIMIT
    }

    // === Bus transactions ===

    fn address(&self) -> u8 {
        self.serial_address as u8
    }

    fn bus_error(&self, register: u8, e: TransportError) -> TmcError {
        match e {
            TransportError::Timeout { .. } => TmcError::Timeout {
                address: self.address(),
                register,
            },
            other => TmcError::Transport(other),
        }
    }

    /// Send a write datagram; the echo is left on the line for the next read to drain.
    fn write(&mut self, register: u8, data: u32) -> Result<()> {
        let frame = datagram::encode_write(self.address(), register, data);
        debug!(
            "Write to driver {}: reg=0x{:02X}, value=0x{:08X}",
            self.address(),
            register,
            data
        );
        if let Err(e) = self
            .transport
            .transmit(&frame, self.config.transmit_byte_timeout)
        {
            self.write_failures = self.write_failures.saturating_add(1);
            warn!(
                "Write to driver {} reg=0x{:02X} failed: {}",
                self.address(),
                register,
                e
            );
            return Err(self.bus_error(register, e));
        }
        Ok(())
    }

    fn read(&mut self, register: u8) -> Result<u32> {
        let request = datagram::encode_read_request(self.address(), register);

        // Stale echoes from earlier writes would otherwise be taken for the reply
        let dropped = self
            .transport
            .discard_input(self.config.drain_timeout)
            .map_err(|e| self.bus_error(register, e))?;
        if dropped > 0 {
            debug!("Dropped {} stale bytes before read", dropped);
        }

        self.transport
            .transmit(&request, self.config.transmit_byte_timeout)
            .map_err(|e| self.bus_error(register, e))?;

        let mut reply = [0u8; WRITE_READ_REPLY_SIZE];
        let mut filled = 0;
        if self.config.expect_echo {
            let mut echo = [0u8; READ_REQUEST_SIZE];
            match self.transport.receive(&mut echo, self.config.echo_timeout) {
                Ok(()) if echo == request => {}
                // Replies carry address 0xFF, so these bytes can only be the reply's head
                Ok(()) => {
                    debug!("No echo for read of reg 0x{:02X}, reply came first", register);
                    reply[..READ_REQUEST_SIZE].copy_from_slice(&echo);
                    filled = READ_REQUEST_SIZE;
                }
                Err(TransportError::Timeout { .. }) => {
                    debug!("No echo for read of reg 0x{:02X}", register);
                }
                Err(e) => return Err(self.bus_error(register, e)),
            }
        }

        self.transport
            .receive(&mut reply[filled..], self.config.reply_timeout)
            .map_err(|e| self.bus_error(register, e))?;

        let reply = datagram::decode(&reply).map_err(|e| {
            warn!(
                "Bad reply from driver {} reg=0x{:02X}: {}",
                self.address(),
                register,
                e
            );
            TmcError::ChecksumMismatch {
                address: self.address(),
                register,
            }
        })?;
        debug!(
            "Read from driver {}: reg=0x{:02X}, value=0x{:08X}",
            self.address(),
            reply.register,
            reply.data
        );
        Ok(reply.data)
    }
}
