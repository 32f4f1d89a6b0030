use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

/// Install the tracing subscriber once for the process.
///
/// Honors `RATHDOWN_LOG` (falling back to `info`) so tests and embedding
/// applications can turn individual targets up or down. Safe to call from
/// multiple tests; only the first call installs anything.
pub fn init() {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_env("RATHDOWN_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init();
    });
}
