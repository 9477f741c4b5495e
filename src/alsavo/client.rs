//! High-level handle for one Alsavo Pro heat pump.

use std::fmt;
use std::time::Duration;

use tracing::{error, warn};

use super::error::{AlsavoError, Result};
use super::protocol::QueryResponse;
use super::session::Session;
use super::transport::UdpClient;

/// Config register holding the mode/power flag word.
const CONFIG_FLAGS: u16 = 4;
/// Config register holding the defrost flag word.
const CONFIG_DEFROST: u16 = 5;
/// Config register holding the power-mode level.
const CONFIG_POWER_MODE: u16 = 16;
/// Status registers holding the alarm words.
const STATUS_ALARM1: u16 = 48;
const STATUS_ALARM2: u16 = 49;

/// No-water-flow alarm, status word 48 bit 2.
pub const ERR_NO_WATER_FLUX: &str = "No water flux or water flow switch failure.";
/// Cooling low-water-temperature protection, status word 49 bit 10.
pub const ERR_WATER_TEMP_TOO_LOW: &str =
    "Water temperature (T2) too low protection under cooling mode.";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_TRANSPORT_TRIES: u32 = 2;
const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Operating mode, config word 4 bits 0-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Cool,
    Heat,
    Auto,
}

impl OperatingMode {
    /// Decode from the flag word; bit pattern 3 is unassigned.
    pub fn from_bits(word: u16) -> Option<Self> {
        match word & 3 {
            0 => Some(Self::Cool),
            1 => Some(Self::Heat),
            2 => Some(Self::Auto),
            _ => None,
        }
    }

    fn bits(self) -> u16 {
        match self {
            Self::Cool => 0,
            Self::Heat => 1,
            Self::Auto => 2,
        }
    }

    /// Config register holding this mode's target temperature.
    pub fn target_register(self) -> u16 {
        match self {
            Self::Cool => 2,
            Self::Heat => 1,
            Self::Auto => 3,
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cool => "cool",
            Self::Heat => "heat",
            Self::Auto => "auto",
        };
        f.write_str(name)
    }
}

/// Power level, config register 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Silent,
    Smart,
    Powerful,
}

impl PowerMode {
    pub fn from_raw(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Silent),
            1 => Some(Self::Smart),
            2 => Some(Self::Powerful),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u16 {
        match self {
            Self::Silent => 0,
            Self::Smart => 1,
            Self::Powerful => 2,
        }
    }
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Silent => "silent",
            Self::Smart => "smart",
            Self::Powerful => "powerful",
        };
        f.write_str(name)
    }
}

/// Target setpoints are fixed-point tenths of a degree on the wire.
fn setpoint_raw(celsius: f64) -> u16 {
    (celsius * 10.0).round() as i16 as u16
}

/// Client handle for one Alsavo Pro heat pump.
///
/// Every operation runs a complete connect-authenticate-act-disconnect
/// cycle; no session survives between calls. Getters read the snapshot
/// from the last successful [`update`](Self::update). Methods take
/// `&mut self`, so two operations can never interleave on one handle.
pub struct AlsavoPro {
    host: String,
    port: u16,
    serial: u64,
    password: String,
    timeout: Duration,
    transport_tries: u32,
    max_attempts: u32,
    data: QueryResponse,
}

impl AlsavoPro {
    pub fn new(host: impl Into<String>, port: u16, serial: u64, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            serial,
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
            transport_tries: DEFAULT_TRANSPORT_TRIES,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            data: QueryResponse::default(),
        }
    }

    /// Override the per-datagram receive timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the datagram retransmit count within one request.
    pub fn with_transport_tries(mut self, tries: u32) -> Self {
        self.transport_tries = tries.max(1);
        self
    }

    /// Override the retry budget: total connect-act cycles per operation.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Refresh the cached snapshot from the device.
    ///
    /// Runs up to the configured number of full connect-query cycles.
    /// When every attempt fails the snapshot is cleared so the pump reads
    /// as offline and the failure is reported as [`AlsavoError::Offline`].
    pub async fn update(&mut self) -> Result<()> {
        for attempt in 1..=self.max_attempts {
            match self.try_update().await {
                Ok(data) => {
                    self.data = data;
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    error!("update aborted: {e}");
                    return Err(e);
                }
                Err(e) => {
                    warn!("update attempt {attempt}/{} failed: {e}", self.max_attempts);
                }
            }
        }
        self.data = QueryResponse::default();
        error!("pump unreachable after {} attempts, marking offline", self.max_attempts);
        Err(AlsavoError::Offline {
            attempts: self.max_attempts,
        })
    }

    /// Write one raw config register, with the same bounded reconnect
    /// policy as [`update`](Self::update).
    ///
    /// The protocol has no write acknowledgement; a later `update` is the
    /// only way to observe the new state.
    pub async fn set_config(&mut self, index: u16, value: u16) -> Result<()> {
        for attempt in 1..=self.max_attempts {
            match self.try_set_config(index, value).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => {
                    error!("set_config({index}, {value}) aborted: {e}");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "set_config({index}, {value}) attempt {attempt}/{} failed: {e}",
                        self.max_attempts
                    );
                }
            }
        }
        self.data = QueryResponse::default();
        error!("pump unreachable after {} attempts, marking offline", self.max_attempts);
        Err(AlsavoError::Offline {
            attempts: self.max_attempts,
        })
    }

    async fn try_update(&self) -> Result<QueryResponse> {
        let session = self.connect().await?;
        session.query_all().await
    }

    async fn try_set_config(&self, index: u16, value: u16) -> Result<()> {
        let session = self.connect().await?;
        session.set_config(index, value).await
    }

    async fn connect(&self) -> Result<Session> {
        let transport =
            UdpClient::connect(&self.host, self.port, self.timeout, self.transport_tries).await?;
        Session::connect(transport, self.serial, &self.password).await
    }

    /// The pump is online when the last snapshot carried data blocks.
    pub fn is_online(&self) -> bool {
        self.data.parts > 0
    }

    pub fn status_value(&self, idx: u16) -> u16 {
        self.data.status_value(idx)
    }

    pub fn config_value(&self, idx: u16) -> u16 {
        self.data.config_value(idx)
    }

    pub fn status_temperature(&self, idx: u16) -> f64 {
        self.data.status_temperature(idx)
    }

    pub fn config_temperature(&self, idx: u16) -> f64 {
        self.data.config_temperature(idx)
    }

    pub fn water_in_temperature(&self) -> f64 {
        self.status_temperature(16)
    }

    pub fn water_out_temperature(&self) -> f64 {
        self.status_temperature(17)
    }

    pub fn ambient_temperature(&self) -> f64 {
        self.status_temperature(18)
    }

    pub fn cold_pipe_temperature(&self) -> f64 {
        self.status_temperature(19)
    }

    pub fn heating_pipe_temperature(&self) -> f64 {
        self.status_temperature(20)
    }

    pub fn ipm_module_temperature(&self) -> f64 {
        self.status_temperature(21)
    }

    pub fn exhaust_temperature(&self) -> f64 {
        self.status_temperature(23)
    }

    /// Fan speed in RPM.
    pub fn fan_speed(&self) -> u16 {
        self.status_value(22)
    }

    /// Compressor current, amps.
    pub fn compressor_current(&self) -> u16 {
        self.status_value(26)
    }

    /// Compressor running frequency, Hz.
    pub fn compressor_frequency(&self) -> u16 {
        self.status_value(27)
    }

    pub fn operating_mode(&self) -> Option<OperatingMode> {
        OperatingMode::from_bits(self.config_value(CONFIG_FLAGS))
    }

    pub fn is_timer_on_enabled(&self) -> bool {
        self.config_value(CONFIG_FLAGS) & 0x04 != 0
    }

    pub fn water_pump_running_mode(&self) -> bool {
        self.config_value(CONFIG_FLAGS) & 0x08 != 0
    }

    pub fn electronic_valve_style(&self) -> bool {
        self.config_value(CONFIG_FLAGS) & 0x10 != 0
    }

    pub fn is_power_on(&self) -> bool {
        self.config_value(CONFIG_FLAGS) & 0x20 != 0
    }

    pub fn is_debug_mode(&self) -> bool {
        self.config_value(CONFIG_FLAGS) & 0x40 != 0
    }

    pub fn is_timer_off_enabled(&self) -> bool {
        self.config_value(CONFIG_FLAGS) & 0x80 != 0
    }

    pub fn manual_defrost(&self) -> bool {
        self.config_value(CONFIG_DEFROST) & 0x01 != 0
    }

    pub fn power_mode(&self) -> Option<PowerMode> {
        PowerMode::from_raw(self.config_value(CONFIG_POWER_MODE))
    }

    /// Target setpoint for the current operating mode, or 0.0 when the
    /// mode word is unassigned.
    pub fn target_temperature(&self) -> f64 {
        match self.operating_mode() {
            Some(mode) => self.config_temperature(mode.target_register()),
            None => 0.0,
        }
    }

    /// Active alarm messages decoded from the status words.
    pub fn error_messages(&self) -> Vec<&'static str> {
        let mut messages = Vec::new();
        if self.status_value(STATUS_ALARM1) & 0x0004 != 0 {
            messages.push(ERR_NO_WATER_FLUX);
        }
        if self.status_value(STATUS_ALARM2) & 0x0400 != 0 {
            messages.push(ERR_WATER_TEMP_TOO_LOW);
        }
        messages
    }

    /// Active alarms as one printable string, empty when healthy.
    pub fn errors(&self) -> String {
        self.error_messages().join("\n")
    }

    /// Set the target temperature for the current operating mode.
    ///
    /// Requires a prior `update` so the mode is known; with an unassigned
    /// mode word there is no register to write and the call is a no-op.
    pub async fn set_target_temperature(&mut self, celsius: f64) -> Result<()> {
        let Some(mode) = self.operating_mode() else {
            warn!("no target register for unassigned operating mode, skipping write");
            return Ok(());
        };
        self.set_config(mode.target_register(), setpoint_raw(celsius)).await
    }

    /// Switch operating mode; also raises the power-on flag.
    pub async fn set_mode(&mut self, mode: OperatingMode) -> Result<()> {
        let flags = self.config_value(CONFIG_FLAGS);
        // Clear mode bits 0-1 and power bit 5, then set both.
        self.set_config(CONFIG_FLAGS, (flags & 0xffdc) | 0x20 | mode.bits()).await
    }

    /// Clear the power-on flag, leaving the rest of the flag word intact.
    pub async fn set_power_off(&mut self) -> Result<()> {
        let flags = self.config_value(CONFIG_FLAGS);
        self.set_config(CONFIG_FLAGS, flags & 0xffdf).await
    }

    pub async fn set_power_mode(&mut self, mode: PowerMode) -> Result<()> {
        self.set_config(CONFIG_POWER_MODE, mode.as_raw()).await
    }

    #[cfg(test)]
    pub(crate) fn set_snapshot(&mut self, snapshot: QueryResponse) {
        self.data = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::super::protocol::{Payload, SUBTYPE_CONFIG, SUBTYPE_STATUS};
    use super::*;

    fn pump_with(status: Vec<u16>, config: Vec<u16>) -> AlsavoPro {
        let mut bytes = vec![1, 2, 0, 0];
        bytes.extend_from_slice(
            &Payload {
                data_type: 1,
                sub_type: SUBTYPE_STATUS,
                start_idx: 0,
                data: status,
            }
            .pack(),
        );
        bytes.extend_from_slice(
            &Payload {
                data_type: 2,
                sub_type: SUBTYPE_CONFIG,
                start_idx: 0,
                data: config,
            }
            .pack(),
        );
        let mut pump = AlsavoPro::new("127.0.0.1", 1194, 1, "pw");
        pump.set_snapshot(QueryResponse::unpack(&bytes).unwrap());
        pump
    }

    #[test]
    fn test_mode_register_mapping() {
        assert_eq!(OperatingMode::from_bits(0), Some(OperatingMode::Cool));
        assert_eq!(OperatingMode::from_bits(1), Some(OperatingMode::Heat));
        assert_eq!(OperatingMode::from_bits(2), Some(OperatingMode::Auto));
        assert_eq!(OperatingMode::from_bits(3), None);
        // masking ignores the upper flag bits
        assert_eq!(OperatingMode::from_bits(0x21), Some(OperatingMode::Heat));

        assert_eq!(OperatingMode::Cool.target_register(), 2);
        assert_eq!(OperatingMode::Heat.target_register(), 1);
        assert_eq!(OperatingMode::Auto.target_register(), 3);
    }

    #[test]
    fn test_setpoint_encoding() {
        assert_eq!(setpoint_raw(28.5), 285);
        assert_eq!(setpoint_raw(20.0), 200);
        assert_eq!(setpoint_raw(-1.0), 0xfff6);
    }

    #[test]
    fn test_power_mode_levels() {
        assert_eq!(PowerMode::from_raw(0), Some(PowerMode::Silent));
        assert_eq!(PowerMode::from_raw(1), Some(PowerMode::Smart));
        assert_eq!(PowerMode::from_raw(2), Some(PowerMode::Powerful));
        assert_eq!(PowerMode::from_raw(3), None);
        assert_eq!(PowerMode::Powerful.as_raw(), 2);
    }

    #[test]
    fn test_flag_word_decoding() {
        let mut config = vec![0u16; 32];
        config[4] = 0x21 | 0x04 | 0x80; // heat, power on, timer-on, timer-off
        config[5] = 1;
        config[16] = 2;
        let pump = pump_with(vec![0; 50], config);

        assert_eq!(pump.operating_mode(), Some(OperatingMode::Heat));
        assert!(pump.is_power_on());
        assert!(pump.is_timer_on_enabled());
        assert!(pump.is_timer_off_enabled());
        assert!(!pump.water_pump_running_mode());
        assert!(!pump.electronic_valve_style());
        assert!(!pump.is_debug_mode());
        assert!(pump.manual_defrost());
        assert_eq!(pump.power_mode(), Some(PowerMode::Powerful));
    }

    #[test]
    fn test_target_temperature_follows_mode() {
        let mut config = vec![0u16; 32];
        config[1] = 280;
        config[2] = 250;
        config[3] = 265;
        config[4] = 0x20; // cool, power on
        let pump = pump_with(vec![0; 50], config.clone());
        assert_eq!(pump.target_temperature(), 25.0);

        config[4] = 0x21; // heat
        let pump = pump_with(vec![0; 50], config.clone());
        assert_eq!(pump.target_temperature(), 28.0);

        config[4] = 0x22; // auto
        let pump = pump_with(vec![0; 50], config.clone());
        assert_eq!(pump.target_temperature(), 26.5);

        config[4] = 0x23; // unassigned mode word
        let pump = pump_with(vec![0; 50], config);
        assert_eq!(pump.target_temperature(), 0.0);
    }

    #[test]
    fn test_error_decoding() {
        let mut status = vec![0u16; 50];
        status[48] = 0x0004;
        status[49] = 0x0400;
        let pump = pump_with(status, vec![0; 32]);
        let errors = pump.errors();
        assert!(errors.contains(ERR_NO_WATER_FLUX));
        assert!(errors.contains(ERR_WATER_TEMP_TOO_LOW));

        let healthy = pump_with(vec![0; 50], vec![0; 32]);
        assert!(healthy.errors().is_empty());
    }

    #[test]
    fn test_fresh_handle_reads_offline_zeros() {
        let pump = AlsavoPro::new("127.0.0.1", 1194, 1, "pw");
        assert!(!pump.is_online());
        assert_eq!(pump.status_value(16), 0);
        assert_eq!(pump.config_value(4), 0);
        assert_eq!(pump.water_in_temperature(), 0.0);
        assert!(pump.errors().is_empty());
    }

    #[test]
    fn test_online_with_snapshot() {
        let pump = pump_with(vec![0; 50], vec![0; 32]);
        assert!(pump.is_online());
    }
}
