use std::env;

/// Process configuration, read once in `main` and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Postgres connection string. When unset the server runs on the
    /// in-memory store, which is enough for local development and tests.
    pub database_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8081);
        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        Config { port, database_url }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8081,
            database_url: None,
        }
    }
}
