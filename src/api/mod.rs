pub mod routes;

use anyhow::{Context, Result};
use axum::Router;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tracing::info;

pub use routes::ApiState;

pub async fn run_server(state: ApiState) -> Result<()> {
    let port = state.config.api_port;
    let app: Router = routes::router(state);

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API server: {addr}"))?;

    info!(address = %addr, "RitualBell API server started");

    axum::serve(listener, app)
        .await
        .context("API server failed")?;

    Ok(())
}

/// Content type for a proxied path when the upstream response did not carry one.
pub fn guess_content_type(path: &str) -> String {
    let normalized = path.trim_end_matches('/');
    let requested = match normalized.rsplit('/').next() {
        Some(name) if name.contains('.') => name,
        _ => "index.html",
    };

    mime_guess::from_path(requested)
        .first_or_octet_stream()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::guess_content_type;

    #[test]
    fn directories_are_served_as_html() {
        assert_eq!(guess_content_type("/app/"), "text/html");
        assert_eq!(guess_content_type("/app/styles.css"), "text/css");
        assert_eq!(guess_content_type("/app/icon-192.png"), "image/png");
    }
}
