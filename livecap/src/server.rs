use anyhow::Result;
use livecap_api::AppState;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Serve the HTTP API until the shutdown token fires.
///
/// SSE connections are torn down before the listener stops accepting, so
/// graceful shutdown never waits on long-lived event streams.
pub async fn run_http(state: AppState, bind: String, shutdown: CancellationToken) -> Result<()> {
    let addr = normalize_bind(&bind);
    let router = livecap_api::create_router(state.clone(), None);

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!(addr = %addr, error = %e, "failed to bind http listener");
        anyhow::anyhow!("failed to bind {addr}: {e}")
    })?;
    info!(addr = %addr, "server started");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            state.sse.close();
            info!("server closing");
        })
        .await?;
    Ok(())
}

/// Accept Go-style `:8080` binds alongside full socket addresses.
fn normalize_bind(bind: &str) -> String {
    if bind.starts_with(':') {
        format!("0.0.0.0{bind}")
    } else {
        bind.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bind() {
        assert_eq!(normalize_bind(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_bind("127.0.0.1:9000"), "127.0.0.1:9000");
    }
}
