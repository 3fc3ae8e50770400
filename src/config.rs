use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo
    pub status_text: String,

    // Resolución
    pub resolver_workers: usize,
    pub resolve_timeout_secs: u64,
    pub ytdlp_path: String,
    pub audio_format: String,

    // Límites
    pub max_queue_size: usize,
    pub max_playlist_size: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),
            status_text: std::env::var("STATUS_TEXT").unwrap_or(defaults.status_text),

            resolver_workers: std::env::var("RESOLVER_WORKERS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()?,
            resolve_timeout_secs: std::env::var("RESOLVE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "45".to_string())
                .parse()?,
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            audio_format: std::env::var("AUDIO_FORMAT").unwrap_or(defaults.audio_format),

            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            max_playlist_size: std::env::var("MAX_PLAYLIST_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The Discord token must not be blank
    /// - Worker pool size, timeout and size limits must be greater than 0
    /// - The resolver executable path must not be blank
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if self.resolver_workers == 0 {
            anyhow::bail!("Resolver worker pool needs at least one worker");
        }

        if self.resolve_timeout_secs == 0 {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.ytdlp_path.trim().is_empty() {
            anyhow::bail!("YTDLP_PATH must not be empty");
        }

        Ok(())
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Resolver: {} workers, {}s timeout, `{}` ({})\n  \
            Limits: {} queue, {} playlist",
            self.guild_id
                .map_or("global".to_string(), |id| format!("on guild {}", id)),
            self.resolver_workers,
            self.resolve_timeout_secs,
            self.ytdlp_path,
            self.audio_format,
            self.max_queue_size,
            self.max_playlist_size,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,
            status_text: "/play".to_string(),

            resolver_workers: 4,
            resolve_timeout_secs: 45,
            ytdlp_path: "yt-dlp".to_string(),
            audio_format: "bestaudio[abr<=96]/bestaudio".to_string(),

            max_queue_size: 1000,
            max_playlist_size: 100,
        }
    }
}
