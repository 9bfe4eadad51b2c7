pub mod config;
pub mod inverter;
pub mod logging;
pub mod store;
