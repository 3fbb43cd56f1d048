use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log to stdout and stream spans to Tracy. `RUST_LOG` overrides the default `debug` filter for stdout.
pub struct Tracing {}

impl Tracing {
    pub fn setup() -> Self {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::DEBUG.into())
            .from_env_lossy();
        let fmt = tracing_subscriber::fmt::layer().with_filter(filter);
        let tracy_layer = tracing_tracy::TracyLayer::default();
        tracing_subscriber::registry().with(fmt).with(tracy_layer).init();
        Self {}
    }
}
