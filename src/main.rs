// Copyright (c), lang2fhir-agent contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use lang2fhir_agent::endpoints;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let app = endpoints::router();
    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!(
        "lang2fhir agent listening on {}",
        listener.local_addr()?
    );
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
