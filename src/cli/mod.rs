//! CLI subcommands for fleet-core.
//!
//! ## Usage
//!
//! ```bash
//! fleet-core-cli simulate 3        # three in-process instances on one hub
//! fleet-core-cli config show       # effective configuration
//! fleet-core-cli config validate   # exit 1 on suspicious values
//! ```

pub mod config_cmd;
pub mod simulate;

pub use simulate::{run_simulate, SimulationReport};
