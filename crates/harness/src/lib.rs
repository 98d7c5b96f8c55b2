mod floor;
mod recorder;
mod shop;

pub use floor::SharedFloor;
pub use recorder::RecordingNotifier;
pub use shop::{Crew, TestShop};

use tracing_subscriber::EnvFilter;

/// Installs a test-friendly fmt subscriber. `RUST_LOG` overrides the
/// default `info` filter; calling this more than once is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
