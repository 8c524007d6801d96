// Command handlers module
pub mod fleet;
pub mod monitor;
pub mod processes;
pub mod snapshot;
pub mod telemetry;
