use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One raw register sweep from the device. Transient: decoded before caching,
/// never stored as-is.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSnapshot {
    pub registers: HashMap<u16, u16>,
    pub fetched_at: f64,
}

impl RawSnapshot {
    pub fn new(registers: HashMap<u16, u16>) -> Self {
        Self {
            registers,
            fetched_at: now_epoch_secs(),
        }
    }

    pub fn word(&self, register: u16) -> Option<u16> {
        self.registers.get(&register).copied()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum BatteryStatus {
    Charge,
    StandBy,
    Discharge,
    Unknown(u16),
}

impl BatteryStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => BatteryStatus::Charge,
            1 => BatteryStatus::StandBy,
            2 => BatteryStatus::Discharge,
            other => BatteryStatus::Unknown(other),
        }
    }

    pub fn label(&self) -> String {
        match self {
            BatteryStatus::Charge => "Charge".to_string(),
            BatteryStatus::StandBy => "Stand-by".to_string(),
            BatteryStatus::Discharge => "Discharge".to_string(),
            BatteryStatus::Unknown(code) => format!("Unknown ({code})"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum InverterStatus {
    StandBy,
    SelfChecking,
    Normal,
    Fault,
    Unknown(u16),
}

impl InverterStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => InverterStatus::StandBy,
            1 => InverterStatus::SelfChecking,
            2 => InverterStatus::Normal,
            3 => InverterStatus::Fault,
            other => InverterStatus::Unknown(other),
        }
    }

    pub fn label(&self) -> String {
        match self {
            InverterStatus::StandBy => "Stand-by".to_string(),
            InverterStatus::SelfChecking => "Self-checking".to_string(),
            InverterStatus::Normal => "Normal".to_string(),
            InverterStatus::Fault => "FAULT".to_string(),
            InverterStatus::Unknown(code) => format!("Unknown ({code})"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BatteryReading {
    pub percentage: u16,
    /// Watts; negative while charging, positive while discharging.
    pub power: i32,
    pub voltage: f64,
    pub current: f64,
    pub status_code: u16,
    pub status: BatteryStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GridReading {
    pub power: i32,
    pub voltage: f64,
    pub current: f64,
    pub feeding_in: bool,
    pub connected_code: u16,
    pub on_grid: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InverterReading {
    pub status_code: u16,
    pub status: InverterStatus,
    pub total_ac_power: i32,
    pub dc_temperature: f64,
    pub ac_temperature: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SolarReading {
    pub pv1_voltage: f64,
    pub pv1_current: f64,
    pub pv1_power: u16,
    pub pv2_voltage: f64,
    pub pv2_current: f64,
    pub pv2_power: u16,
    pub total_power: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DailyStats {
    pub production_kwh: f64,
    pub consumption_kwh: f64,
    pub battery_charge_kwh: f64,
}

/// Fully decoded telemetry for one device sweep.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StructuredReading {
    pub battery: BatteryReading,
    pub grid: GridReading,
    pub inverter: InverterReading,
    pub solar: SolarReading,
    pub daily: DailyStats,
    pub load_power: u16,
}

/// The single cached telemetry value. Overwritten wholesale by the poll loop;
/// `timestamp` strictly increases across writes because only one lock holder
/// writes at a time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CachedSnapshot {
    pub data: StructuredReading,
    pub timestamp: f64,
}

pub fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
