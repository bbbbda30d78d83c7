//! Logging setup for the tilegen driver.
//!
//! Library crates log through the `log` facade; this module installs
//! `env_logger` as the backend.
//!
//! - `warn!` - rejected profiles, suspicious inputs
//! - `info!` - driver progress (profile loaded, kernel written)
//! - `debug!` - generation and launch milestones
//! - `trace!` - per-kernel detail (host execution, rejections)
//!
//! `RUST_LOG` controls the level at runtime, e.g.
//! `RUST_LOG=tilegen_gpu::launch=debug tilegen verify tuned.toml`.

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize at `warn`. Subsequent calls are no-ops.
pub fn init() {
    init_with_level(LevelFilter::Warn);
}

/// Initialize at a fixed level. Subsequent calls are no-ops.
pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        // a logger installed by a test harness stays in place
        let _ = Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {} - {}",
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .try_init();
    });
}

/// Initialize from `RUST_LOG`, defaulting to `warn`.
pub fn init_from_env() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).try_init();
    });
}

/// Test-friendly logger; safe to call from every test.
#[cfg(test)]
pub fn init_test() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .is_test(true)
        .try_init();
}
