use std::env;

/// Longest accepted session lifetime: one year.
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;

/// AppConfig
///
/// Holds the application's configuration. Loaded once at startup and shared
/// read-only through the application state via `FromRef`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls the dev auth bypass, cookie flags and log format.
    pub env: Env,
    // Address the HTTP listener binds to.
    pub bind_addr: String,
    // Which repository implementation backs the API.
    pub database_backend: DatabaseBackend,
    // MongoDB connection string and database name.
    pub mongodb_uri: String,
    pub mongodb_db: String,
    // HS256 secret used to sign and verify session tokens.
    pub jwt_secret: String,
    // Session lifetime, used for both the JWT `exp` and the cookie max-age.
    pub session_ttl_hours: i64,
    // Where uploaded media is kept.
    pub storage_backend: StorageBackend,
    // Root directory for the local storage backend.
    pub upload_dir: String,
    // Prefix used when building public media URLs.
    pub public_base_url: String,
    // S3-compatible storage settings (only read when storage_backend is S3).
    pub s3_endpoint: String,
    pub s3_region: String,
    pub s3_key: String,
    pub s3_secret: String,
    pub s3_bucket: String,
    // Existing account promoted to admin at startup, if set.
    pub admin_username: Option<String>,
}

/// Env
///
/// The runtime context. Local enables developer conveniences; Production
/// demands every secret explicitly.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum DatabaseBackend {
    Mongo,
    Memory,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum StorageBackend {
    Local,
    S3,
}

const LOCAL_JWT_SECRET: &str = "local-development-jwt-secret-change-me";

impl Default for AppConfig {
    /// Non-panicking configuration for tests: in-memory repository, local
    /// storage, Local env.
    fn default() -> Self {
        Self {
            env: Env::Local,
            bind_addr: "127.0.0.1:3000".to_string(),
            database_backend: DatabaseBackend::Memory,
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            mongodb_db: "blog_cms_test".to_string(),
            jwt_secret: "super-secure-test-secret-value-local".to_string(),
            session_ttl_hours: 24 * 7,
            storage_backend: StorageBackend::Local,
            upload_dir: "uploads".to_string(),
            public_base_url: "/uploads".to_string(),
            s3_endpoint: "http://localhost:9000".to_string(),
            s3_region: "us-east-1".to_string(),
            s3_key: "admin".to_string(),
            s3_secret: "password".to_string(),
            s3_bucket: "blog-media-test".to_string(),
            admin_username: None,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from environment variables.
    ///
    /// # Panics
    /// Panics when a secret required in Production is missing (`JWT_SECRET`,
    /// `MONGODB_URI`, and the S3 credentials when `STORAGE_BACKEND=s3`), so the
    /// process never starts half-configured.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let database_backend = match env::var("DATABASE_BACKEND").as_deref() {
            Ok("memory") => DatabaseBackend::Memory,
            _ => DatabaseBackend::Mongo,
        };

        let storage_backend = match env::var("STORAGE_BACKEND").as_deref() {
            Ok("s3") => StorageBackend::S3,
            _ => StorageBackend::Local,
        };

        let session_ttl_hours = env::var("SESSION_TTL_HOURS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|hours| *hours > 0)
            .map(|hours| hours.min(MAX_SESSION_TTL_HOURS))
            .unwrap_or(24 * 7);

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let mongodb_db = env::var("MONGODB_DB").unwrap_or_else(|_| "blog_cms".to_string());
        let upload_dir = env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string());
        let public_base_url =
            env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "/uploads".to_string());
        let admin_username = env::var("ADMIN_USERNAME")
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        match env {
            Env::Local => Self {
                env: Env::Local,
                bind_addr,
                database_backend,
                mongodb_uri: env::var("MONGODB_URI")
                    .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
                mongodb_db,
                jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| LOCAL_JWT_SECRET.to_string()),
                session_ttl_hours,
                storage_backend,
                upload_dir,
                public_base_url,
                // MinIO defaults from the docker-compose setup.
                s3_endpoint: env::var("S3_ENDPOINT")
                    .unwrap_or_else(|_| "http://localhost:9000".to_string()),
                s3_region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                s3_key: env::var("S3_ACCESS_KEY").unwrap_or_else(|_| "admin".to_string()),
                s3_secret: env::var("S3_SECRET_KEY").unwrap_or_else(|_| "password".to_string()),
                s3_bucket: env::var("S3_BUCKET_NAME")
                    .unwrap_or_else(|_| "blog-media".to_string()),
                admin_username,
            },
            Env::Production => {
                let jwt_secret =
                    env::var("JWT_SECRET").expect("FATAL: JWT_SECRET must be set in production.");
                let mongodb_uri = match database_backend {
                    DatabaseBackend::Mongo => env::var("MONGODB_URI")
                        .expect("FATAL: MONGODB_URI must be set in production."),
                    DatabaseBackend::Memory => String::new(),
                };

                let (s3_endpoint, s3_key, s3_secret) = match storage_backend {
                    StorageBackend::S3 => (
                        env::var("S3_ENDPOINT").expect("FATAL: S3_ENDPOINT required in prod"),
                        env::var("S3_ACCESS_KEY").expect("FATAL: S3_ACCESS_KEY required in prod"),
                        env::var("S3_SECRET_KEY").expect("FATAL: S3_SECRET_KEY required in prod"),
                    ),
                    StorageBackend::Local => (String::new(), String::new(), String::new()),
                };

                Self {
                    env: Env::Production,
                    bind_addr,
                    database_backend,
                    mongodb_uri,
                    mongodb_db,
                    jwt_secret,
                    session_ttl_hours,
                    storage_backend,
                    upload_dir,
                    public_base_url,
                    s3_endpoint,
                    s3_region: env::var("S3_REGION").unwrap_or_else(|_| "auto".to_string()),
                    s3_key,
                    s3_secret,
                    s3_bucket: env::var("S3_BUCKET_NAME")
                        .unwrap_or_else(|_| "blog-media".to_string()),
                    admin_username,
                }
            }
        }
    }

    /// Session cookies are only marked `Secure` outside local development.
    pub fn cookie_secure(&self) -> bool {
        self.env == Env::Production
    }
}
