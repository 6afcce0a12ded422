use std::env;
use std::path::PathBuf;

use chrono_tz::Tz;
use dotenvy::dotenv;

#[derive(Clone)]
pub struct Config {
    pub project_name: String,
    pub bot_token: String,
    pub timezone: Tz,
    pub base_dir: PathBuf,
    pub database_url: String,

    // RSS service
    pub rss_enabled: bool,
    pub rss_host: String,
    pub rss_port: u16,
    pub rss_data_path: PathBuf,
    pub rss_media_path: PathBuf,
    pub rss_base_url: String,
    pub rss_media_base_url: String,

    // UI paging
    pub rules_per_page: usize,
    pub push_channel_per_page: usize,
    pub keywords_per_page: usize,
    pub ai_models_per_page: usize,
    pub summary_time_rows: usize,
    pub summary_time_cols: usize,
    pub delay_time_rows: usize,
    pub delay_time_cols: usize,
    pub media_size_rows: usize,
    pub media_size_cols: usize,
    pub media_extensions_rows: usize,
    pub media_extensions_cols: usize,

    // Defaults
    pub default_ai_model: String,
    pub default_ai_prompt: String,
    pub default_summary_prompt: String,
    pub default_summary_time: String,
    pub default_max_media_size: f64,

    // Summary batching
    pub summary_batch_size: usize,
    pub summary_batch_delay: u64,

    // Operators
    pub admins: Vec<i64>,

    // Auto-delete
    pub bot_message_delete_timeout: u64,
    pub user_message_delete_enable: bool,

    pub chat_update_time: String,

    // AI provider credentials (OpenAI-compatible endpoints)
    pub ai_api_key: Option<String>,
    pub ai_api_base: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let bot_token = env::var("TELOXIDE_TOKEN").expect("TELOXIDE_TOKEN must be set");
        let base_dir = PathBuf::from(env::var("BASE_DIR").unwrap_or_else(|_| "./data".to_string()));
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/db/forward.db", base_dir.display()));

        let timezone = env::var("DEFAULT_TIMEZONE")
            .unwrap_or_else(|_| "Asia/Shanghai".to_string())
            .parse::<Tz>()
            .expect("DEFAULT_TIMEZONE must be a valid IANA timezone name");

        let rss_data_path = env::var("RSS_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base_dir.join("rss/data"));
        let rss_media_path = env::var("RSS_MEDIA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base_dir.join("rss/media"));
        let rss_host = env::var("RSS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let rss_port = parse_env("RSS_PORT", 8000u16);
        let rss_base_url =
            env::var("RSS_BASE_URL").unwrap_or_else(|_| format!("http://{rss_host}:{rss_port}"));
        let rss_media_base_url =
            env::var("RSS_MEDIA_BASE_URL").unwrap_or_else(|_| rss_base_url.clone());

        let admins: Vec<i64> = env::var("ADMINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .filter_map(|p| p.trim().parse::<i64>().ok())
                    .collect::<Vec<_>>()
            })
            .filter(|v: &Vec<i64>| !v.is_empty())
            .or_else(|| {
                env::var("USER_ID")
                    .ok()
                    .and_then(|s| s.trim().parse::<i64>().ok())
                    .map(|id| vec![id])
            })
            .unwrap_or_default();

        Self {
            project_name: env::var("PROJECT_NAME").unwrap_or_else(|_| "forward_bot".to_string()),
            bot_token,
            timezone,
            base_dir,
            database_url,

            rss_enabled: parse_env("RSS_ENABLED", false),
            rss_host,
            rss_port,
            rss_data_path,
            rss_media_path,
            rss_base_url,
            rss_media_base_url,

            rules_per_page: parse_env("RULES_PER_PAGE", 20),
            push_channel_per_page: parse_env("PUSH_CHANNEL_PER_PAGE", 10),
            keywords_per_page: parse_env("KEYWORDS_PER_PAGE", 50),
            ai_models_per_page: parse_env("AI_MODELS_PER_PAGE", 10),
            summary_time_rows: parse_env("SUMMARY_TIME_ROWS", 6),
            summary_time_cols: parse_env("SUMMARY_TIME_COLS", 4),
            delay_time_rows: parse_env("DELAY_TIME_ROWS", 3),
            delay_time_cols: parse_env("DELAY_TIME_COLS", 4),
            media_size_rows: parse_env("MEDIA_SIZE_ROWS", 3),
            media_size_cols: parse_env("MEDIA_SIZE_COLS", 4),
            media_extensions_rows: parse_env("MEDIA_EXTENSIONS_ROWS", 5),
            media_extensions_cols: parse_env("MEDIA_EXTENSIONS_COLS", 4),

            default_ai_model: env::var("DEFAULT_AI_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            default_ai_prompt: env::var("DEFAULT_AI_PROMPT").unwrap_or_else(|_| {
                "Process the following message and return only the result:\n{Message}".to_string()
            }),
            default_summary_prompt: env::var("DEFAULT_SUMMARY_PROMPT").unwrap_or_else(|_| {
                "Summarize the following chat messages into a concise digest:\n{Message}"
                    .to_string()
            }),
            default_summary_time: env::var("DEFAULT_SUMMARY_TIME")
                .unwrap_or_else(|_| "07:00".to_string()),
            default_max_media_size: parse_env("DEFAULT_MAX_MEDIA_SIZE", 10.0),

            summary_batch_size: parse_env("SUMMARY_BATCH_SIZE", 20),
            summary_batch_delay: parse_env("SUMMARY_BATCH_DELAY", 2),

            admins,

            bot_message_delete_timeout: parse_env("BOT_MESSAGE_DELETE_TIMEOUT", 300),
            user_message_delete_enable: parse_env("USER_MESSAGE_DELETE_ENABLE", false),

            chat_update_time: env::var("CHAT_UPDATE_TIME").unwrap_or_else(|_| "03:00".to_string()),

            ai_api_key: env::var("AI_API_KEY").ok(),
            ai_api_base: env::var("AI_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.base_dir.join("temp")
    }

    pub fn rss_bind_addr(&self) -> String {
        format!("{}:{}", self.rss_host, self.rss_port)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
