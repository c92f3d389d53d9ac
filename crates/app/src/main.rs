use babel_infra::CatalogConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CatalogConfig::from_env()?;
    babel_observability::init(config.log_format);

    let runtime = babel_app::start(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    runtime.shutdown();
    Ok(())
}
