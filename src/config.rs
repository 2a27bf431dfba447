//! Process configuration loaded from environment variables

pub const DEFAULT_MODEL: &str = "meta-llama/llama-3.1-8b-instruct";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key (None = completions disabled, clients get an error reply)
    pub api_key: Option<String>,
    /// OpenRouter model id
    pub model: String,
    /// TCP port to listen on
    pub port: u16,
    /// Browser origins accepted by the CORS layer
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables. Blank values count as unset.
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENROUTER_API_KEY").ok().and_then(|key| {
            let trimmed = key.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });

        let model = std::env::var("OPENROUTER_MODEL")
            .ok()
            .and_then(|model| {
                let trimmed = model.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let port = std::env::var("PORT")
            .ok()
            .and_then(|port| port.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_ALLOWED_ORIGIN.to_string()]);

        Self {
            api_key,
            model,
            port,
            allowed_origins,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            port: DEFAULT_PORT,
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
        }
    }
}
