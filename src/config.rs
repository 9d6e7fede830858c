use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub env: String,
    pub app: App,
    pub api: Api,
    pub scan: ScanConfig,
    pub logging: Logging,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct App {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Api {
    /// Baza REST grup (role, członkowie, moderacja).
    pub base_url: String,
    /// Baza serwisu miniatur.
    pub thumb_base_url: String,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanConfig {
    pub page_size: u32,
    /// Ile batchy fingerprintingu może wisieć równolegle.
    pub max_inflight: usize,
    /// Pauza między udanymi stronami (limit hosta).
    pub page_delay_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Cooldown po HTTP 429 — nie zużywa budżetu retry.
    pub rate_limit_cooldown_ms: u64,
    /// Maks. dystans Hamminga, żeby uznać avatary za podobne.
    pub hamming_max: u32,
    /// Minimalny score, poniżej odrzucamy rekord.
    pub min_score: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    pub json: Option<bool>,
    pub level: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_inflight: 10,
            page_delay_ms: 200,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            rate_limit_cooldown_ms: 5_000,
            hamming_max: 5,
            min_score: 20,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Które środowisko?
        let env = std::env::var("BGD_ENV").unwrap_or_else(|_| "development".to_string());

        // Załaduj .env.<env> i .env (jeśli są)
        let _ = dotenvy::from_filename(format!(".env.{}", env));
        let _ = dotenvy::dotenv();

        // Domyślne wartości
        #[derive(Deserialize, Serialize)]
        struct Defaults {
            env: String,
            app: App,
            api: Api,
            scan: ScanConfig,
            logging: Logging,
        }

        let defaults = Defaults {
            env: env.clone(),
            app: App {
                name: "BotGuard Sweep".into(),
            },
            api: Api {
                base_url: "https://groups.example-host.com/v1".into(),
                thumb_base_url: "https://thumbnails.example-host.com/v1".into(),
                user_agent: Some("BotGuard/0.1".into()),
                timeout_ms: Some(10_000),
            },
            scan: ScanConfig::default(),
            logging: Logging {
                json: Some(false),
                level: Some("info".into()),
            },
        };

        // Warstwy: domyślne -> plik TOML -> zmienne środowiskowe BGD_*
        let figment = Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file(format!("config/{}.toml", env)))
            // BGD_API_BASE_URL => api.base_url itd.
            .merge(Env::prefixed("BGD_").split("_"));

        let mut s: Settings = figment.extract()?;
        s.env = env;

        Ok(s)
    }

    /// Gotowe ustawienia do testów — bez dotykania plików i ENV.
    pub fn for_tests() -> Self {
        Self {
            env: "test".into(),
            app: App { name: "test".into() },
            api: Api {
                base_url: "http://localhost:1/v1".into(),
                thumb_base_url: "http://localhost:1/v1".into(),
                user_agent: None,
                timeout_ms: Some(1_000),
            },
            scan: ScanConfig::default(),
            logging: Logging { json: Some(false), level: Some("info".into()) },
        }
    }
}
