mod config;
mod error;
mod frame;
mod orchestrator;

pub use config::{AudioConfig, Config, PipelineSection, VadSection};
pub use error::PipelineError;
pub use frame::PcmFrame;
pub use orchestrator::Pipeline;

/// Installs a `tracing` subscriber reading `RUST_LOG` (defaulting to
/// `info`), matching the teacher's logging setup convention.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
