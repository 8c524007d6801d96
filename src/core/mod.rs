// Engine core modules

pub mod control;
pub mod diagnostics;
pub mod digest;
pub mod engine;
pub mod executor;
pub mod health;
pub mod presets;
pub mod process;
pub mod remote;
pub mod ros;
pub mod snapshot;
pub mod system;
pub mod telemetry;

// Re-export commonly used items
pub use engine::{EngineConfig, PollRequest, RuntimeEngine};
pub use executor::{CommandOutcome, CommandRunner, Executor};
pub use process::{ProcessRecord, ProcessSampler};
pub use telemetry::Telemetry;
