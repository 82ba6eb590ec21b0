pub mod config;
pub mod io;
pub mod metrics;
pub mod plot;
pub mod report;
pub mod sequencer;
pub mod signal;

pub use config::*;
pub use metrics::*;
pub use report::*;
pub use sequencer::*;
pub use signal::*;
