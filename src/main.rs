use std::{net::SocketAddr, sync::Arc};

use blog_cms::{
    AppState,
    config::{AppConfig, DatabaseBackend, Env, StorageBackend},
    create_router, promote_admin,
    repository::{InMemoryRepository, MongoRepository, RepositoryState},
    spawn_sweeper,
    storage::{LocalStorage, S3StorageClient, StorageService, StorageState},
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, initializes logging, connects the repository and
/// media storage, then serves the API.
#[tokio::main]
async fn main() {
    // 1. Configuration (fails fast on missing production secrets)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins over the defaults.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "blog_cms=debug,tower_http=info,axum=trace".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Repository
    let repo: RepositoryState = match config.database_backend {
        DatabaseBackend::Mongo => {
            let client = mongodb::Client::with_uri_str(&config.mongodb_uri)
                .await
                .expect("FATAL: Failed to connect to MongoDB. Check MONGODB_URI.");
            let mongo = MongoRepository::new(&client.database(&config.mongodb_db));
            mongo
                .ensure_indexes()
                .await
                .expect("FATAL: Failed to create MongoDB indexes.");
            Arc::new(mongo)
        }
        DatabaseBackend::Memory => {
            tracing::warn!("Using the in-memory repository. Data is lost on restart.");
            Arc::new(InMemoryRepository::new())
        }
    };

    if let Some(username) = &config.admin_username {
        match promote_admin(&repo, username).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(%username, "ADMIN_USERNAME does not match any user"),
            Err(e) => tracing::error!(error = %e, "failed to promote admin"),
        }
    }

    // 4. Media storage
    let storage: StorageState = match config.storage_backend {
        StorageBackend::S3 => {
            let s3_client = S3StorageClient::new(
                &config.s3_endpoint,
                &config.s3_region,
                &config.s3_key,
                &config.s3_secret,
                &config.s3_bucket,
                &config.public_base_url,
            )
            .await;
            // The MinIO bucket from docker-compose may not exist yet.
            if config.env == Env::Local {
                s3_client.ensure_bucket_exists().await;
            }
            Arc::new(s3_client)
        }
        StorageBackend::Local => {
            let local = LocalStorage::new(&config.upload_dir, &config.public_base_url);
            local.ensure_bucket_exists().await;
            Arc::new(local)
        }
    };

    // 5. State, background sweeper, router
    let bind_addr = config.bind_addr.clone();
    let app_state = AppState::new(repo, storage, config);
    spawn_sweeper(app_state.limits.clone(), app_state.api_keys.clone());

    let app = create_router(app_state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind the HTTP listener. Check BIND_ADDR.");

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://{}/swagger-ui", bind_addr);

    // ConnectInfo supplies the client IP when no proxy header is present.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("FATAL: HTTP server error");
}
