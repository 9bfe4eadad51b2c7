//! Register-to-value decoding for Deye/Sunsynk hybrid inverters behind a
//! Solarman data logger. Missing registers decode to zeros and `Unknown`
//! status sentinels rather than failing.

use crate::reading::{
    BatteryReading, BatteryStatus, DailyStats, GridReading, InverterReading, InverterStatus,
    RawSnapshot, SolarReading, StructuredReading,
};

pub const REG_INVERTER_STATUS: u16 = 59;
pub const REG_DAILY_BATTERY_CHARGE: u16 = 70;
pub const REG_DAILY_CONSUMPTION: u16 = 84;
pub const REG_DC_TEMPERATURE: u16 = 90;
pub const REG_AC_TEMPERATURE: u16 = 91;
pub const REG_DAILY_PRODUCTION: u16 = 108;
pub const REG_PV1_VOLTAGE: u16 = 109;
pub const REG_PV1_CURRENT: u16 = 110;
pub const REG_PV2_VOLTAGE: u16 = 111;
pub const REG_PV2_CURRENT: u16 = 112;
pub const REG_GRID_VOLTAGE: u16 = 150;
pub const REG_GRID_CURRENT: u16 = 160;
pub const REG_GRID_POWER: u16 = 169;
pub const REG_TOTAL_AC_POWER: u16 = 175;
pub const REG_LOAD_POWER: u16 = 178;
pub const REG_BATTERY_VOLTAGE: u16 = 183;
pub const REG_BATTERY_SOC: u16 = 184;
pub const REG_PV1_POWER: u16 = 186;
pub const REG_PV2_POWER: u16 = 187;
pub const REG_BATTERY_STATUS: u16 = 189;
pub const REG_BATTERY_POWER: u16 = 190;
pub const REG_BATTERY_CURRENT: u16 = 191;
pub const REG_GRID_CONNECTED: u16 = 194;

/// Every register one full poll sweep reads.
pub const POLL_REGISTERS: &[u16] = &[
    REG_INVERTER_STATUS,
    REG_DAILY_BATTERY_CHARGE,
    REG_DAILY_CONSUMPTION,
    REG_DC_TEMPERATURE,
    REG_AC_TEMPERATURE,
    REG_DAILY_PRODUCTION,
    REG_PV1_VOLTAGE,
    REG_PV1_CURRENT,
    REG_PV2_VOLTAGE,
    REG_PV2_CURRENT,
    REG_GRID_VOLTAGE,
    REG_GRID_CURRENT,
    REG_GRID_POWER,
    REG_TOTAL_AC_POWER,
    REG_LOAD_POWER,
    REG_BATTERY_VOLTAGE,
    REG_BATTERY_SOC,
    REG_PV1_POWER,
    REG_PV2_POWER,
    REG_BATTERY_STATUS,
    REG_BATTERY_POWER,
    REG_BATTERY_CURRENT,
    REG_GRID_CONNECTED,
];

/// Registers holding two's-complement values arrive as unsigned words.
fn signed(word: u16) -> i32 {
    if word > 32_767 {
        i32::from(word) - 65_536
    } else {
        i32::from(word)
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn word(raw: &RawSnapshot, register: u16) -> u16 {
    raw.word(register).unwrap_or(0)
}

pub fn decode(raw: &RawSnapshot) -> StructuredReading {
    let battery_status_code = word(raw, REG_BATTERY_STATUS);
    let inverter_status_code = word(raw, REG_INVERTER_STATUS);
    let grid_connected_code = word(raw, REG_GRID_CONNECTED);
    let grid_power = signed(word(raw, REG_GRID_POWER));
    let pv1_power = word(raw, REG_PV1_POWER);
    let pv2_power = word(raw, REG_PV2_POWER);

    StructuredReading {
        battery: BatteryReading {
            percentage: word(raw, REG_BATTERY_SOC),
            power: signed(word(raw, REG_BATTERY_POWER)),
            voltage: round_to(f64::from(word(raw, REG_BATTERY_VOLTAGE)) * 0.01, 2),
            current: round_to(f64::from(signed(word(raw, REG_BATTERY_CURRENT))) * 0.01, 2),
            status_code: battery_status_code,
            status: BatteryStatus::from_code(battery_status_code),
        },
        grid: GridReading {
            power: grid_power,
            voltage: round_to(f64::from(word(raw, REG_GRID_VOLTAGE)) * 0.1, 1),
            current: round_to(f64::from(word(raw, REG_GRID_CURRENT)) * 0.01, 2),
            feeding_in: grid_power < 0,
            connected_code: grid_connected_code,
            on_grid: grid_connected_code == 1,
        },
        inverter: InverterReading {
            status_code: inverter_status_code,
            status: InverterStatus::from_code(inverter_status_code),
            total_ac_power: signed(word(raw, REG_TOTAL_AC_POWER)),
            dc_temperature: round_to(
                f64::from(signed(word(raw, REG_DC_TEMPERATURE))) * 0.1 - 100.0,
                1,
            ),
            ac_temperature: round_to(
                f64::from(signed(word(raw, REG_AC_TEMPERATURE))) * 0.1 - 100.0,
                1,
            ),
        },
        solar: SolarReading {
            pv1_voltage: round_to(f64::from(word(raw, REG_PV1_VOLTAGE)) * 0.1, 1),
            pv1_current: round_to(f64::from(word(raw, REG_PV1_CURRENT)) * 0.1, 2),
            pv1_power,
            pv2_voltage: round_to(f64::from(word(raw, REG_PV2_VOLTAGE)) * 0.1, 1),
            pv2_current: round_to(f64::from(word(raw, REG_PV2_CURRENT)) * 0.1, 2),
            pv2_power,
            total_power: u32::from(pv1_power) + u32::from(pv2_power),
        },
        daily: DailyStats {
            production_kwh: round_to(f64::from(word(raw, REG_DAILY_PRODUCTION)) * 0.1, 2),
            consumption_kwh: round_to(f64::from(word(raw, REG_DAILY_CONSUMPTION)) * 0.1, 2),
            battery_charge_kwh: round_to(f64::from(word(raw, REG_DAILY_BATTERY_CHARGE)) * 0.1, 2),
        },
        load_power: word(raw, REG_LOAD_POWER),
    }
}
