use blog_cms::{
    AppConfig,
    config::{DatabaseBackend, Env, MAX_SESSION_TTL_HOURS, StorageBackend},
};
use serial_test::serial;
use std::{env, panic};

const CONFIG_VARS: &[&str] = &[
    "APP_ENV",
    "JWT_SECRET",
    "MONGODB_URI",
    "DATABASE_BACKEND",
    "STORAGE_BACKEND",
    "S3_ENDPOINT",
    "S3_ACCESS_KEY",
    "S3_SECRET_KEY",
    "SESSION_TTL_HOURS",
    "ADMIN_USERNAME",
];

// --- Setup/Teardown Utilities ---

/// Runs `test` with a clean configuration environment, restoring the
/// original variables afterward (even when `test` panics).
fn run_with_env<T, R>(test: T) -> R
where
    T: FnOnce() -> R + panic::UnwindSafe,
{
    let originals: Vec<(&str, Option<String>)> = CONFIG_VARS
        .iter()
        .map(|&var| (var, env::var(var).ok()))
        .collect();

    unsafe {
        for var in CONFIG_VARS {
            env::remove_var(var);
        }
    }

    let result = panic::catch_unwind(test);

    for (key, original_value) in originals.into_iter().rev() {
        unsafe {
            match original_value {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }

    match result {
        Ok(value) => value,
        Err(e) => panic::resume_unwind(e),
    }
}

// --- Tests ---

#[test]
#[serial]
fn test_production_fails_fast_without_jwt_secret() {
    let result = panic::catch_unwind(|| {
        run_with_env(|| {
            unsafe {
                env::set_var("APP_ENV", "production");
                env::set_var("MONGODB_URI", "mongodb://db.internal:27017");
            }
            AppConfig::load()
        })
    });

    assert!(
        result.is_err(),
        "Production config loading should panic without JWT_SECRET"
    );
}

#[test]
#[serial]
fn test_production_requires_s3_credentials_for_s3_backend() {
    let result = panic::catch_unwind(|| {
        run_with_env(|| {
            unsafe {
                env::set_var("APP_ENV", "production");
                env::set_var("JWT_SECRET", "prod-secret");
                env::set_var("DATABASE_BACKEND", "memory");
                env::set_var("STORAGE_BACKEND", "s3");
            }
            AppConfig::load()
        })
    });

    assert!(result.is_err());
}

#[test]
#[serial]
fn test_production_with_secrets_loads() {
    let config = run_with_env(|| {
        unsafe {
            env::set_var("APP_ENV", "production");
            env::set_var("JWT_SECRET", "prod-secret");
            env::set_var("MONGODB_URI", "mongodb://db.internal:27017");
        }
        AppConfig::load()
    });

    assert_eq!(config.env, Env::Production);
    assert!(config.cookie_secure());
    assert_eq!(config.jwt_secret, "prod-secret");
    assert_eq!(config.database_backend, DatabaseBackend::Mongo);
    assert_eq!(config.storage_backend, StorageBackend::Local);
}

#[test]
#[serial]
fn test_local_env_defaults() {
    let config = run_with_env(AppConfig::load);

    assert_eq!(config.env, Env::Local);
    assert!(!config.cookie_secure());
    assert_eq!(config.database_backend, DatabaseBackend::Mongo);
    assert_eq!(config.mongodb_uri, "mongodb://localhost:27017");
    // MinIO default from docker-compose
    assert_eq!(config.s3_endpoint, "http://localhost:9000");
    assert_eq!(config.session_ttl_hours, 24 * 7);
    assert!(!config.jwt_secret.is_empty());
    assert_eq!(config.admin_username, None);
}

#[test]
#[serial]
fn test_local_env_overrides() {
    let config = run_with_env(|| {
        unsafe {
            env::set_var("DATABASE_BACKEND", "memory");
            env::set_var("SESSION_TTL_HOURS", "-3");
            env::set_var("ADMIN_USERNAME", "  alice  ");
        }
        AppConfig::load()
    });

    assert_eq!(config.database_backend, DatabaseBackend::Memory);
    // Non-positive lifetimes fall back to the default.
    assert_eq!(config.session_ttl_hours, 24 * 7);
    assert_eq!(config.admin_username.as_deref(), Some("alice"));

    let blank = run_with_env(|| {
        unsafe {
            env::set_var("ADMIN_USERNAME", "   ");
        }
        AppConfig::load()
    });
    assert_eq!(blank.admin_username, None);
}

#[test]
#[serial]
fn test_session_ttl_is_capped_at_one_year() {
    let config = run_with_env(|| {
        unsafe {
            env::set_var("SESSION_TTL_HOURS", "9223372036854775807");
        }
        AppConfig::load()
    });
    assert_eq!(config.session_ttl_hours, MAX_SESSION_TTL_HOURS);
    assert_eq!(MAX_SESSION_TTL_HOURS, 24 * 365);

    // A capped lifetime still produces a token and a cookie.
    let user = blog_cms::models::User {
        id: "u1".to_string(),
        username: "long".to_string(),
        email: "long@example.com".to_string(),
        display_name: "long".to_string(),
        password_hash: String::new(),
        role: blog_cms::models::Role::User,
        is_active: true,
        dark_mode: false,
        last_login: None,
        reset_token_hash: None,
        reset_token_expires: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    let token = blog_cms::auth::issue_token(&user, &config).unwrap();
    let claims = blog_cms::auth::verify_token(&token, &config).unwrap();
    assert_eq!(claims.sub, "u1");
    let cookie = blog_cms::auth::session_cookie(token, &config);
    assert_eq!(cookie.max_age(), Some(time::Duration::hours(MAX_SESSION_TTL_HOURS)));
}
