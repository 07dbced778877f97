use tracing_subscriber::{fmt, EnvFilter};

/// Initialize dotenv and structured tracing based on RUST_LOG.
///
/// - Supports explicit env file paths via ENV_FILE, ENVFILE, DOTENV_PATH
/// - Falls back to default .env discovery
/// - Logs the source used
pub fn init_tracing() {
    let mut env_source: String = "none".into();
    for key in ["ENV_FILE", "ENVFILE", "DOTENV_PATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = p.trim();
            if !p.is_empty()
                && std::path::Path::new(p).is_file()
                && dotenvy::from_filename(p).is_ok()
            {
                env_source = format!("{p} ({key})");
                break;
            }
        }
    }
    if env_source == "none" && dotenvy::dotenv().is_ok() {
        env_source = ".env".into();
    }

    // Respect RUST_LOG potentially provided by the env file.
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=info".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("Environment loaded from: {}", env_source);
}

/// Get the bind address for the HTTP server from env or default to 0.0.0.0:8088.
pub fn env_bind_addr() -> String {
    std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8088".into())
}

/// Parse an env var as the requested type, falling back to a default.
pub fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Read a required env var, erroring with the variable name on absence.
pub fn env_required(key: &str) -> anyhow::Result<String> {
    let v = std::env::var(key).map_err(|_| anyhow::anyhow!("{key} not set (mandatory)"))?;
    let v = v.trim().to_string();
    if v.is_empty() {
        anyhow::bail!("{key} is empty (mandatory)");
    }
    Ok(v)
}

/// Current time as unix seconds.
pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Build a CORS layer from environment variables.
///
/// Environment variables:
/// - CORS_ALLOWED_ORIGINS: "*" or comma-separated origins
/// - CORS_ALLOWED_METHODS: "*" or comma-separated methods
/// - CORS_ALLOWED_HEADERS: "*" or comma-separated request header names
/// - CORS_MAX_AGE: max age in seconds (u64)
///
/// Defaults are permissive (Any) when not configured.
pub fn cors_layer_from_env() -> tower_http::cors::CorsLayer {
    use std::time::Duration;

    let mut layer = tower_http::cors::CorsLayer::new();

    if let Ok(origins) = std::env::var("CORS_ALLOWED_ORIGINS") {
        let s = origins.trim();
        if s == "*" {
            layer = layer.allow_origin(tower_http::cors::Any);
        } else {
            let vals: Vec<http::HeaderValue> = s
                .split(',')
                .filter_map(|p| http::HeaderValue::from_str(p.trim()).ok())
                .collect();
            if vals.is_empty() {
                layer = layer.allow_origin(tower_http::cors::Any);
            } else {
                layer = layer.allow_origin(tower_http::cors::AllowOrigin::list(vals));
            }
        }
    } else {
        layer = layer.allow_origin(tower_http::cors::Any);
    }

    if let Ok(methods) = std::env::var("CORS_ALLOWED_METHODS") {
        let s = methods.trim();
        if s == "*" {
            layer = layer.allow_methods(tower_http::cors::Any);
        } else {
            let vals: Vec<http::Method> = s
                .split(',')
                .filter_map(|p| {
                    http::Method::from_bytes(p.trim().to_ascii_uppercase().as_bytes()).ok()
                })
                .collect();
            if vals.is_empty() {
                layer = layer.allow_methods(tower_http::cors::Any);
            } else {
                layer = layer.allow_methods(tower_http::cors::AllowMethods::list(vals));
            }
        }
    } else {
        layer = layer.allow_methods(tower_http::cors::Any);
    }

    if let Ok(headers) = std::env::var("CORS_ALLOWED_HEADERS") {
        let s = headers.trim();
        if s == "*" {
            layer = layer.allow_headers(tower_http::cors::Any);
        } else {
            let vals: Vec<http::header::HeaderName> = s
                .split(',')
                .filter_map(|p| http::header::HeaderName::try_from(p.trim()).ok())
                .collect();
            if vals.is_empty() {
                layer = layer.allow_headers(tower_http::cors::Any);
            } else {
                layer = layer.allow_headers(tower_http::cors::AllowHeaders::list(vals));
            }
        }
    } else {
        layer = layer.allow_headers(tower_http::cors::Any);
    }

    if let Ok(secs) = std::env::var("CORS_MAX_AGE") {
        if let Ok(n) = secs.trim().parse::<u64>() {
            layer = layer.max_age(Duration::from_secs(n));
        }
    }

    layer
}

/// Build an HTTP client honoring timeout environment variables.
///
/// Environment:
/// - MODELGATE_HTTP_TIMEOUT_SECONDS -> overall request timeout (u64)
pub fn build_http_client_from_env() -> reqwest::Client {
    let mut builder = reqwest::Client::builder();

    if let Ok(secs) = std::env::var("MODELGATE_HTTP_TIMEOUT_SECONDS") {
        if let Ok(n) = secs.trim().parse::<u64>() {
            builder = builder.timeout(std::time::Duration::from_secs(n));
        }
    }

    // User-Agent for observability
    builder = builder.user_agent(format!("modelgate/{}", env!("CARGO_PKG_VERSION")));

    builder.build().unwrap_or_else(|_| reqwest::Client::new())
}
