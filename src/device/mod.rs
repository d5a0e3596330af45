pub mod btle;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod hatch_rest;
pub mod status;
pub mod transport;
pub mod types;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;
