/// Logging setup.
///
/// `RUST_LOG` wins when set; otherwise `--debug` selects DEBUG (which shows
/// every relayed line with its direction tag) and the default is INFO.

use tracing_subscriber::EnvFilter;

pub fn init(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .try_init();
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}
