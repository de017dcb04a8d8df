use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    api::{
        handler::{delete_polling_items, health_check, hold_gmr, register_mrn},
        AppState,
    },
    middleware::require_basic_auth,
};

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let mut app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check));

    // Dev endpoints behind basic auth, only mounted when credentials exist
    if let Some(credentials) = state.dev_credentials.clone() {
        let dev = Router::new()
            .route("/polling-queue/items/:mrn", post(register_mrn))
            .route("/polling-queue/items", delete(delete_polling_items))
            .route("/gmrs/:gmr_id/hold", put(hold_gmr))
            .route_layer(axum::middleware::from_fn_with_state(
                credentials,
                require_basic_auth,
            ));
        app = app.merge(dev);
        info!("🛠️  Dev endpoints enabled");
    }

    let app = app
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("🛑 Shutdown signal received");
}
