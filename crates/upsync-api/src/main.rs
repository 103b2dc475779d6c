use upsync_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    // Telemetry, store, engine and routes
    let (state, router) = upsync_api::setup::initialize_app(config.clone()).await?;

    upsync_api::setup::server::start_server(&config, router).await?;

    state.engine.shutdown().await;
    Ok(())
}
