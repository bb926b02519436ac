use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_logger() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "pediaquiz=info,tower_http=warn".into()))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
