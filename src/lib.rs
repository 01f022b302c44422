pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod phase_runner;
pub mod server;
pub mod storage;
pub mod suite;

pub use error::BenchError;
