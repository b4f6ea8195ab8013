//! Logging setup.
//!
//! The node binary uses `tracing`/`tracing-subscriber` for all of its own
//! instrumentation. `raft::RawNode::new` requires a `slog::Logger` — rather
//! than running two independent logging stacks, the slog logger routes
//! through `slog-stdlog` into the standard `log` facade, which
//! `tracing-log` forwards into the active `tracing` subscriber. Operators
//! see one interleaved, correctly-ordered log stream regardless of which
//! crate emitted a given line.

use slog::Drain;

/// Installs the global `tracing` subscriber, reading `RUST_LOG` for filtering.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    // tracing-log's global logger forwards `log` records into `tracing`.
    // This must be called once, before any slog record is emitted.
    let _ = tracing_log::LogTracer::init();
}

/// Builds the `slog::Logger` handed to `raft::RawNode::new`.
///
/// Every record it carries is routed through `log` (via `slog-stdlog`) and
/// picked up by the `tracing_log::LogTracer` installed in [`init_tracing`].
pub fn raft_logger() -> slog::Logger {
    let drain = slog_stdlog::StdLog.fuse();
    slog::Logger::root(drain, slog::o!())
}
