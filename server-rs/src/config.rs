use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub app_env: String,
    pub site_url: String,
    pub cors_origins: Vec<String>,
    pub db: DbConfig,
    pub cache: CacheConfig,
    pub auth: AuthConfig,
    pub invitations: InvitationConfig,
    pub calendar: CalendarConfig,
    pub ai: AiConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Clone, Debug)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_min: u32,
    pub pool_max: u32,
    pub run_migrations: bool,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub ttl_secs: u64,
    pub purge_interval_secs: u64,
}

/// Supabase-compatible auth provider settings.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub provider_url: String,
    pub service_role_key: String,
    pub anon_key: String,
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub invitation_table: String,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct InvitationConfig {
    pub expiry_days: i64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CalendarConfig {
    pub feed_secret: String,
    pub feed_lookback_days: i64,
}

#[derive(Clone, Debug)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

const DEFAULT_JWT_SECRET: &str = "change-me-to-a-secure-random-string";
const DEFAULT_FEED_SECRET: &str = "change-me-calendar-feed-secret";

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or_parse("PORT", 3000),
            app_env: env_or("APP_ENV", "development"),
            site_url: env_or("SITE_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            cors_origins: env_or("CORS_ORIGINS", "http://localhost:3000")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            db: DbConfig {
                host: env_or("DB_HOST", "localhost"),
                port: env_or_parse("DB_PORT", 5432),
                database: env_or("DB_NAME", "scoutdesk"),
                user: env_or("DB_USER", "postgres"),
                password: env_or("DB_PASSWORD", ""),
                pool_min: env_or_parse("DB_POOL_MIN", 1),
                pool_max: env_or_parse("DB_POOL_MAX", 10),
                run_migrations: env_or_parse("RUN_MIGRATIONS", false),
            },
            cache: CacheConfig {
                redis_url: env_opt("REDIS_URL").or_else(|| env_opt("KV_URL")),
                key_prefix: "scout:".to_string(),
                ttl_secs: env_or_parse("CACHE_TTL_SECS", 30),
                purge_interval_secs: env_or_parse("CACHE_PURGE_SECS", 60),
            },
            auth: AuthConfig {
                provider_url: env_or("SUPABASE_URL", "http://localhost:54321")
                    .trim_end_matches('/')
                    .to_string(),
                service_role_key: env_or("SUPABASE_SERVICE_ROLE_KEY", ""),
                anon_key: env_or("SUPABASE_ANON_KEY", ""),
                jwt_secret: env_or("SUPABASE_JWT_SECRET", DEFAULT_JWT_SECRET),
                jwt_audience: env_or("JWT_AUDIENCE", "authenticated"),
                invitation_table: env_or("AUTH_INVITATION_TABLE", "team_invitations"),
                request_timeout_secs: env_or_parse("AUTH_TIMEOUT_SECS", 10),
            },
            invitations: InvitationConfig {
                expiry_days: env_or_parse("INVITATION_EXPIRY_DAYS", 7),
                sweep_interval_secs: env_or_parse("INVITATION_SWEEP_SECS", 300),
            },
            calendar: CalendarConfig {
                feed_secret: env_or("CALENDAR_FEED_SECRET", DEFAULT_FEED_SECRET),
                feed_lookback_days: env_or_parse("CALENDAR_FEED_LOOKBACK_DAYS", 90),
            },
            ai: AiConfig {
                api_key: env_opt("AI_API_KEY").or_else(|| env_opt("ANTHROPIC_API_KEY")),
                base_url: env_or("AI_BASE_URL", "https://api.anthropic.com/v1")
                    .trim_end_matches('/')
                    .to_string(),
                model: env_or("AI_MODEL", "claude-3-5-haiku-latest"),
                max_tokens: env_or_parse("AI_MAX_TOKENS", 4096),
            },
            rate_limit: RateLimitConfig {
                window_secs: parse_duration_to_secs(&env_or("RATE_LIMIT_WINDOW", "60s")),
                max_requests: env_or_parse("RATE_LIMIT_MAX", 300),
            },
        }
    }

    pub fn database_url(&self) -> String {
        if let Ok(url) = env::var("DATABASE_URL") {
            return url;
        }
        if let Ok(url) = env::var("POSTGRES_URL") {
            return url;
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db.user, self.db.password, self.db.host, self.db.port, self.db.database
        )
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// Signing secrets still set to their built-in placeholders.
    pub fn default_secrets(&self) -> Vec<&'static str> {
        let mut vars = Vec::new();
        if self.auth.jwt_secret == DEFAULT_JWT_SECRET {
            vars.push("SUPABASE_JWT_SECRET");
        }
        if self.calendar.feed_secret == DEFAULT_FEED_SECRET {
            vars.push("CALENDAR_FEED_SECRET");
        }
        vars
    }

    /// Production refuses placeholder secrets; elsewhere they only warn.
    pub fn check_secrets(&self) -> Result<(), String> {
        let vars = self.default_secrets();
        if vars.is_empty() {
            return Ok(());
        }
        if self.is_production() {
            return Err(format!("{} must be set in production", vars.join(", ")));
        }
        tracing::warn!(vars = ?vars, "using placeholder secrets");
        Ok(())
    }
}

fn parse_duration_to_secs(s: &str) -> u64 {
    let s = s.trim();
    if s.is_empty() {
        return 60;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return secs;
    }
    let Some((idx, _)) = s.char_indices().last() else {
        return 60;
    };
    let (num_str, unit) = s.split_at(idx);
    let num: u64 = num_str.parse().unwrap_or(1);
    match unit {
        "s" => num,
        "m" => num * 60,
        "h" => num * 3600,
        "d" => num * 86400,
        _ => 60,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_env(app_env: &str) -> Config {
        let mut config = Config::from_env();
        config.app_env = app_env.to_string();
        config.auth.jwt_secret = DEFAULT_JWT_SECRET.to_string();
        config.calendar.feed_secret = DEFAULT_FEED_SECRET.to_string();
        config
    }

    #[test]
    fn production_rejects_placeholder_feed_secret() {
        let mut config = with_env("production");
        config.auth.jwt_secret = "a-real-jwt-secret".into();
        let err = config.check_secrets().unwrap_err();
        assert_eq!(err, "CALENDAR_FEED_SECRET must be set in production");

        config.calendar.feed_secret = "a-real-feed-secret".into();
        assert!(config.check_secrets().is_ok());
    }

    #[test]
    fn development_tolerates_placeholders() {
        let config = with_env("development");
        assert_eq!(
            config.default_secrets(),
            vec!["SUPABASE_JWT_SECRET", "CALENDAR_FEED_SECRET"]
        );
        assert!(config.check_secrets().is_ok());
    }

    #[test]
    fn durations_accept_units_and_bare_seconds() {
        assert_eq!(parse_duration_to_secs("45"), 45);
        assert_eq!(parse_duration_to_secs("30s"), 30);
        assert_eq!(parse_duration_to_secs("2m"), 120);
        assert_eq!(parse_duration_to_secs("1h"), 3600);
        assert_eq!(parse_duration_to_secs("1d"), 86400);
        assert_eq!(parse_duration_to_secs(""), 60);
        assert_eq!(parse_duration_to_secs("5x"), 60);
    }
}
