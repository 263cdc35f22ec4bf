use time::Duration;

/// Process-wide configuration, read once at startup and injected into the
/// application state. Nothing below reads the environment after this.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,

    pub mongodb_uri: String,
    pub database_name: String,

    pub jwt_secret: String,
    /// How long an issued session token stays valid.
    pub token_ttl: Duration,
    /// Lifetime of the cookie carrying the token. Kept separate from
    /// `token_ttl`: the cookie disappearing does not invalidate the token.
    pub cookie_ttl: Duration,

    pub frontend_url: Option<String>,
    pub dashboard_url: Option<String>,

    pub cloudinary_cloud_name: String,
    pub cloudinary_upload_preset: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|it| it.parse().ok())
                .unwrap_or(8080),

            mongodb_uri: require("MONGODB_URI"),
            database_name: std::env::var("DATABASE_NAME").unwrap_or_else(|_| "clinic".to_string()),

            jwt_secret: require("JWT_SECRET_KEY"),
            token_ttl: Duration::days(env_days("JWT_EXPIRES_DAYS", 7)),
            cookie_ttl: Duration::days(env_days("COOKIE_EXPIRE_DAYS", 7)),

            frontend_url: std::env::var("FRONTEND_URL").ok(),
            dashboard_url: std::env::var("DASHBOARD_URL").ok(),

            cloudinary_cloud_name: require("CLOUDINARY_CLOUD_NAME"),
            cloudinary_upload_preset: require("CLOUDINARY_UPLOAD_PRESET"),
        }
    }
}

fn require(name: &str) -> String {
    std::env::var(name)
        .unwrap_or_else(|_| panic!("Missing required environment variable: {}", name))
}

fn env_days(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|it| it.parse().ok())
        .unwrap_or(default)
}
