pub mod backoff;
pub mod decode;
pub mod memory;
pub mod policy;
pub mod poll;
pub mod ports;
pub mod reading;
pub mod refresh;
