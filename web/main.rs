mod photo;
mod retention;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    response::Html,
    routing::{get, post},
};
use photofinder::prelude::*;
use std::{error::Error, net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub storage: Arc<Storage>,
    pub providers: Arc<Providers>,
    pub urls: Arc<PublicUrlResolver>,
    /// Host used for links when a request carries no `Host` header.
    pub fallback_host: String,
}

async fn index() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/upload_photo", post(photo::upload_photo))
        .route("/describe_and_search", post(photo::describe_and_search))
        .route("/uploads/{filename}", get(photo::get_upload))
        .route("/delete_data", post(retention::delete_data))
        .route("/purge_old", post(retention::purge_old))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let storage = Storage::new(config.upload_dir.clone());
    storage.ensure_root()?;

    let db = Database::connect(&config.database_url).await?;

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    let local_addr = listener.local_addr()?;

    let providers = Providers::from_config(&config);
    tracing::info!(
        recognizers = providers.recognizer.len(),
        description = providers.describer.is_configured(),
        visual_search = providers.visual_search.is_configured(),
        "providers configured"
    );

    let state = AppState {
        urls: Arc::new(PublicUrlResolver::new(config.host_public_url.clone())),
        providers: Arc::new(providers),
        db: Arc::new(db),
        storage: Arc::new(storage),
        fallback_host: local_addr.to_string(),
        config: Arc::new(config),
    };

    let app = router(state);

    tracing::info!(%local_addr, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
