use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Extensions accepted by the upload endpoint (lowercase, without the dot).
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    // Images
    "jpg", "jpeg", "j2k", "jp2", "bmp", "gif", "png", "tif", "tiff", "pcx", "ico",
    // Audio
    "wav", "mp3", "m4a", "ogg",
    // Video
    "3gp", "m4v", "mov", "mp4", "avi", "flv", "mpg", "mpeg", "asf", "webm",
    // Documents
    "ole", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "pdf", "txt",
    // Executables / binaries
    "exe", "elf", "swf", "nes",
];

/// How files are handed to the detection provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// One request, report in the response.
    Sync,
    /// Submit, then poll the report endpoint.
    Async,
}

impl ScanMode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "async" => ScanMode::Async,
            _ => ScanMode::Sync,
        }
    }
}

/// Settings for the external detection provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider type: "stego" or "noop" (default: "stego")
    pub provider_type: String,

    /// Base URL of the provider API, without trailing slash
    pub base_url: String,

    /// Pre-shared agent identifier exchanged for bearer tokens
    pub agent_token: Option<String>,

    /// Agent name sent with every request (default: "WEBAPP")
    pub agent_name: String,

    pub mode: ScanMode,

    /// Report polls before the last status is accepted as final (default: 15)
    pub poll_max_attempts: u32,

    /// Delay between report polls (default: 2000 ms)
    pub poll_interval: Duration,

    /// Per-request HTTP timeout (default: 60 s)
    pub request_timeout: Duration,

    /// Cached tokens are refreshed this long before they expire (default: 60 s)
    pub token_refresh_margin: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: "stego".to_string(),
            base_url: "http://localhost:8080".to_string(),
            agent_token: None,
            agent_name: "WEBAPP".to_string(),
            mode: ScanMode::Sync,
            poll_max_attempts: 15,
            poll_interval: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(60),
            token_refresh_margin: Duration::from_secs(60),
        }
    }
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            provider_type: env::var("SCAN_PROVIDER").unwrap_or(default.provider_type),

            base_url: env::var("STEGO_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(default.base_url),

            agent_token: env::var("STEGO_AGENT_TOKEN").ok().filter(|v| !v.is_empty()),

            agent_name: env::var("STEGO_AGENT_NAME").unwrap_or(default.agent_name),

            mode: env::var("STEGO_MODE")
                .map(|v| ScanMode::parse(&v))
                .unwrap_or(default.mode),

            poll_max_attempts: env::var("STEGO_POLL_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &u32| *v > 0)
                .unwrap_or(default.poll_max_attempts),

            poll_interval: env::var("STEGO_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.poll_interval),

            request_timeout: env::var("STEGO_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.request_timeout),

            token_refresh_margin: env::var("STEGO_TOKEN_MARGIN_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.token_refresh_margin),
        }
    }
}

/// Outbound mail settings. Without an SMTP host, messages are only logged.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: Option<String>,

    /// SMTP port (default: 25)
    pub smtp_port: u16,

    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,

    /// Upgrade the connection with STARTTLS (default: false)
    pub smtp_starttls: bool,

    /// Sender address (default: "Stego Trial <no-reply@example.com>")
    pub mail_from: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: 25,
            smtp_user: None,
            smtp_pass: None,
            smtp_starttls: false,
            mail_from: "Stego Trial <no-reply@example.com>".to_string(),
        }
    }
}

impl MailConfig {
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            smtp_host: env::var("SMTP_HOST").ok().filter(|v| !v.trim().is_empty()),
            smtp_port: env::var("SMTP_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.smtp_port),
            smtp_user: env::var("SMTP_USER").ok().filter(|v| !v.is_empty()),
            smtp_pass: env::var("SMTP_PASS").ok().filter(|v| !v.is_empty()),
            smtp_starttls: env::var("SMTP_STARTTLS")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(default.smtp_starttls),
            mail_from: env::var("MAIL_FROM")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.mail_from),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database connection string (default: local sqlite file)
    pub database_url: String,

    /// Maximum size of a single uploaded file in bytes (default: 50 MB)
    pub max_file_size: usize,

    /// Files accepted in one upload request (default: 20)
    pub max_batch_files: usize,

    /// Allowed upload extensions, lowercase without the dot
    pub allowed_extensions: Vec<String>,

    /// Directory where uploads are staged while they are scanned
    pub uploads_dir: PathBuf,

    /// Lifetime scan allotment for new accounts (default: 50)
    pub default_scan_quota: i32,

    /// Upload requests allowed per account per window (default: 30)
    pub uploads_per_window: u32,

    /// Rate limit window (default: 10 minutes)
    pub upload_window: Duration,

    /// Requests to `/auth/*` allowed per client IP per window (default: 50)
    pub auth_requests_per_window: u32,

    /// Auth rate limit window (default: 10 minutes)
    pub auth_window: Duration,

    /// Registrations allowed per client IP per hour (default: 3)
    pub signups_per_ip_per_hour: u32,

    /// Key rate limits on `X-Forwarded-For` / `X-Real-IP` (default: false)
    pub trust_proxy_headers: bool,

    /// Lifetime of emailed one-time codes (default: 10 minutes)
    pub otp_ttl_minutes: i64,

    /// JWT Secret Key (Required in production)
    pub jwt_secret: String,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,

    /// Seeded admin account, created at startup when both are set
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,

    pub mail: MailConfig,

    pub provider: ProviderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://stego_portal.db?mode=rwc".to_string(),
            max_file_size: 50 * 1024 * 1024, // 50 MB
            max_batch_files: 20,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            uploads_dir: PathBuf::from("uploads"),
            default_scan_quota: 50,
            uploads_per_window: 30,
            upload_window: Duration::from_secs(10 * 60),
            auth_requests_per_window: 50,
            auth_window: Duration::from_secs(10 * 60),
            signups_per_ip_per_hour: 3,
            trust_proxy_headers: false,
            otp_ttl_minutes: 10,
            jwt_secret: "secret".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(), // Vite default
                "http://127.0.0.1:3000".to_string(),
            ],
            admin_email: None,
            admin_password: None,
            mail: MailConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(default.database_url),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            max_batch_files: env::var("MAX_BATCH_FILES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(default.max_batch_files),

            allowed_extensions: env::var("ALLOWED_EXTENSIONS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(default.allowed_extensions),

            uploads_dir: env::var("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.uploads_dir),

            default_scan_quota: env::var("DEFAULT_SCAN_QUOTA")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &i32| *v >= 0)
                .unwrap_or(default.default_scan_quota),

            uploads_per_window: env::var("UPLOADS_PER_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.uploads_per_window),

            upload_window: env::var("UPLOAD_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.upload_window),

            auth_requests_per_window: env::var("AUTH_REQUESTS_PER_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.auth_requests_per_window),

            auth_window: env::var("AUTH_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.auth_window),

            signups_per_ip_per_hour: env::var("SIGNUPS_PER_IP_PER_HOUR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.signups_per_ip_per_hour),

            trust_proxy_headers: env::var("TRUST_PROXY_HEADERS")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(default.trust_proxy_headers),

            otp_ttl_minutes: env::var("OTP_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.otp_ttl_minutes),

            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| "secret".to_string()), // Fallback for dev convenience, strictly enforced in production method

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),

            admin_email: env::var("ADMIN_EMAIL").ok().filter(|v| !v.is_empty()),
            admin_password: env::var("ADMIN_PASSWORD").ok().filter(|v| !v.is_empty()),

            mail: MailConfig::from_env(),

            provider: ProviderConfig::from_env(),
        }
    }

    /// Picks the preset named by `APP_ENV` ("production" or anything else).
    pub fn load() -> anyhow::Result<Self> {
        match env::var("APP_ENV").map(|v| v.trim().to_lowercase()) {
            Ok(env_name) if env_name == "production" => Self::production(),
            _ => Ok(Self::from_env()),
        }
    }

    /// Create config for development (no external provider, relaxed limits)
    pub fn development() -> Self {
        Self {
            uploads_per_window: 1000,
            auth_requests_per_window: 1000,
            signups_per_ip_per_hour: 1000,
            provider: ProviderConfig {
                provider_type: "noop".to_string(),
                ..ProviderConfig::default()
            },
            ..Self::default()
        }
    }

    /// Create config for production (strict security)
    pub fn production() -> anyhow::Result<Self> {
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("CRITICAL: JWT_SECRET must be set"))?;
        let from_env = Self::from_env();
        Ok(Self {
            jwt_secret,
            provider: ProviderConfig {
                provider_type: "stego".to_string(),
                ..from_env.provider.clone()
            },
            ..from_env
        })
    }

    /// Request body ceiling for the upload route: a full batch plus multipart overhead.
    pub fn upload_body_limit(&self) -> usize {
        self.max_file_size
            .saturating_mul(self.max_batch_files)
            .saturating_add(10 * 1024 * 1024)
    }
}
