use tracing_subscriber::{
    fmt::format::Format, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

const DEFAULT_FILTER: &str = "upsync=debug,tower_http=debug";

/// Initialize tracing. `json` switches the console output to one JSON object per line.
pub fn init_telemetry(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let json_fmt = json.then(|| tracing_subscriber::fmt::layer().json().with_current_span(true));
    let console_fmt = (!json).then(|| {
        tracing_subscriber::fmt::layer().event_format(
            Format::default()
                .compact()
                .with_target(false)
                .without_time(),
        )
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_fmt)
        .with(console_fmt)
        .try_init()?;

    tracing::info!(json = json, "Tracing initialized");
    Ok(())
}
