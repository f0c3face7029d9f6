// Kiln Infrastructure - System Adapters
// Implements: SystemProbe, MediaBackend (external runner), download Processor

pub mod http_downloader;
pub mod subprocess_backend;
pub mod system_probe_impl;

pub use http_downloader::HttpDownloader;
pub use subprocess_backend::{DisabledBackend, RunnerConfig, SubprocessBackend};
pub use system_probe_impl::SystemProbeImpl;
