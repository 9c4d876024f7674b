use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;

use crate::error::ConfigError;
use crate::publisher::Credentials;

/// Configuration for the confession bot loaded from environment variables.
///
/// Everything the bot touches on disk lives under `data_dir`, so a deployment
/// only needs one writable directory. Credentials are optional here: without
/// them the bot still loads, but every run aborts before the first request.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the public page to poll.
    /// Environment variable: `PAGE_NAME`
    pub page_name: String,

    /// How many listing pages to read per run.
    /// Environment variable: `PAGE_DEPTH`
    pub page_depth: u32,

    /// Directory holding `state.json`, `bot.log`, `expiry.json` and `bot.lock`.
    /// Environment variable: `DATA_DIR`
    pub data_dir: PathBuf,

    /// Markup template with a single `INSERT_TEXT_HERE` marker.
    /// Environment variable: `TEMPLATE_FILE`
    pub template_file: PathBuf,

    /// Primary font used for every glyph it covers.
    /// Environment variable: `FONT_FILE`
    pub font_file: PathBuf,

    /// Extra fonts tried in order for glyphs the primary font lacks
    /// (emoji, symbols). Comma-separated.
    /// Environment variable: `FALLBACK_FONT_FILES`
    pub fallback_font_files: Vec<PathBuf>,

    /// Pause between two successive publish calls within a run.
    /// Environment variable: `PUBLISH_DELAY_MS`
    pub publish_delay: Duration,

    /// Timeout applied to every outbound HTTP request.
    /// Environment variable: `HTTP_TIMEOUT_SECONDS`
    pub http_timeout: Duration,

    /// Account id that receives operator direct messages.
    /// Environment variable: `OPERATOR_ID`
    pub operator_id: Option<String>,

    /// API credentials, `None` when any of the four variables is missing.
    pub credentials: Option<Credentials>,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable cannot be parsed:
    /// - `PAGE_DEPTH`: listing pages per run (default: "3")
    /// - `PUBLISH_DELAY_MS`: pacing delay (default: "500")
    /// - `HTTP_TIMEOUT_SECONDS`: request timeout (default: "30")
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |name: &str, default: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let page_name = var_or("PAGE_NAME", constants::DEFAULT_PAGE_NAME);
        let page_depth = parse_number("PAGE_DEPTH", &var_or("PAGE_DEPTH", "3"))?;
        if page_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "PAGE_DEPTH".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let data_dir = PathBuf::from(var_or("DATA_DIR", "."));
        let template_file = PathBuf::from(var_or("TEMPLATE_FILE", "./assets/template.html"));
        let font_file = PathBuf::from(var_or("FONT_FILE", "./assets/fonts/primary.ttf"));

        let fallback_font_files = lookup("FALLBACK_FONT_FILES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|path| !path.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        let publish_delay = Duration::from_millis(parse_number(
            "PUBLISH_DELAY_MS",
            &var_or("PUBLISH_DELAY_MS", "500"),
        )?);

        let http_timeout = Duration::from_secs(parse_number(
            "HTTP_TIMEOUT_SECONDS",
            &var_or("HTTP_TIMEOUT_SECONDS", "30"),
        )?);

        let operator_id = lookup("OPERATOR_ID").filter(|id| !id.trim().is_empty());
        let credentials = match Credentials::from_lookup(&lookup) {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                warn!("Publishing disabled: {}", e);
                None
            }
        };

        Ok(Config {
            page_name,
            page_depth,
            data_dir,
            template_file,
            font_file,
            fallback_font_files,
            publish_delay,
            http_timeout,
            operator_id,
            credentials,
        })
    }

    /// Point every data file at a different directory.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(constants::STATE_FILE)
    }

    pub fn expiry_path(&self) -> PathBuf {
        self.data_dir.join(constants::EXPIRY_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(constants::LOCK_FILE)
    }

    /// Location of the optional `.env` file inside a data directory.
    pub fn env_file(data_dir: &Path) -> PathBuf {
        data_dir.join(".env")
    }
}

fn parse_number<T>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Application constants used throughout the system.
pub mod constants {
    /// Page polled when `PAGE_NAME` is not set.
    pub const DEFAULT_PAGE_NAME: &str = "columbiaconfessionz";

    /// Substitution marker inside the markup template.
    pub const TEXT_MARKER: &str = "INSERT_TEXT_HERE";

    /// Fixed page width in CSS pixels.
    pub const PAGE_WIDTH_PX: u32 = 664;

    /// Raster resolution.
    pub const RENDER_DPI: f32 = 150.0;

    /// Resolution CSS pixels are defined against.
    pub const CSS_DPI: f32 = 96.0;

    /// Days between credential expiry reminders.
    pub const EXPIRY_REMINDER_DAYS: i64 = 90;

    /// Reply returned by every `update` trigger, whatever happened in the run.
    pub const UPDATE_ACK: &str = "The bot was updated!";

    pub const STATE_FILE: &str = "state.json";
    pub const LOG_FILE: &str = "bot.log";
    pub const EXPIRY_FILE: &str = "expiry.json";
    pub const LOCK_FILE: &str = "bot.lock";
}
