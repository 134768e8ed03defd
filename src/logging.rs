// 📝 Logging setup for the binaries

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber
///
/// Default: info for this crate and the named binary. Override with `RUST_LOG`.
/// Calling twice is harmless; the second install is ignored.
pub fn init(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("info,skin_exchange=info,{}=info", service_name.replace('-', "_")))
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init();
}
