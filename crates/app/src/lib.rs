//! Entry-point wiring: configuration, observability, runtime and bootstrap.

pub mod bootstrap;

use std::time::Duration;

use babel_infra::{CatalogConfig, CatalogRuntime};

/// Upper bound for the bootstrap import, including read-side catch-up.
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(300);

/// Start the catalog for `config` and run the one-time bootstrap.
pub async fn start(config: CatalogConfig) -> anyhow::Result<CatalogRuntime> {
    let runtime = CatalogRuntime::in_memory(config).await?;
    let outcome = bootstrap::run(&runtime, BOOTSTRAP_TIMEOUT)?;
    tracing::info!(?outcome, "catalog ready");
    Ok(runtime)
}
