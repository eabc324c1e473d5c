use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

/// Default persona for the free-form assistant branch.
const DEFAULT_PERSONA: &str = "Eres el asistente virtual de un pequeño negocio. \
Respondes en español, breve y amable. Si el cliente quiere agendar una cita, \
sugiérele escribir \"agendar\".";

#[derive(Deserialize)]
struct ConfigFile {
    /// Secret echoed during the Meta webhook verification handshake.
    verify_token: String,
    /// WhatsApp Cloud API bearer token.
    whatsapp_token: String,
    /// Cloud API phone number id (numeric).
    phone_number_id: String,
    anthropic_api_key: String,
    /// WhatsApp number that receives appointment notifications, if any.
    operator_number: Option<String>,
    /// Persona/system instruction for the assistant branch.
    personality: Option<String>,
    /// How many recent turns to hand the assistant.
    #[serde(default = "default_context_window")]
    context_window: usize,
    /// When false, the guided flow only captures a name (two-state variant).
    #[serde(default = "default_capture_service")]
    capture_service: bool,
    /// Directory for state files (database, logs). Defaults to current directory.
    data_dir: Option<String>,
    /// Path to the business content catalog JSON.
    catalog_path: Option<String>,
    #[serde(default = "default_port")]
    port: u16,
}

fn default_context_window() -> usize {
    6
}

fn default_capture_service() -> bool {
    true
}

fn default_port() -> u16 {
    3000
}

pub struct Config {
    pub verify_token: String,
    pub whatsapp_token: String,
    pub phone_number_id: String,
    pub anthropic_api_key: String,
    /// Operator number for appointment notifications (None = no notifications).
    pub operator_number: Option<String>,
    pub personality: String,
    pub context_window: usize,
    pub capture_service: bool,
    /// Directory for state files (database, logs).
    pub data_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub port: u16,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        // Validate required fields
        if file.verify_token.is_empty() {
            return Err(ConfigError::Validation("verify_token is required".into()));
        }
        if file.whatsapp_token.is_empty() {
            return Err(ConfigError::Validation("whatsapp_token is required".into()));
        }
        if file.phone_number_id.is_empty() || file.phone_number_id.parse::<u64>().is_err() {
            return Err(ConfigError::Validation(
                "phone_number_id must be the numeric Cloud API phone number id".into(),
            ));
        }
        if file.anthropic_api_key.is_empty() {
            return Err(ConfigError::Validation("anthropic_api_key is required".into()));
        }
        if file.context_window == 0 {
            return Err(ConfigError::Validation("context_window must be at least 1".into()));
        }

        let operator_number = file.operator_number.filter(|n| !n.is_empty());

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let catalog_path = file
            .catalog_path
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("catalog.json"));

        Ok(Self {
            verify_token: file.verify_token,
            whatsapp_token: file.whatsapp_token,
            phone_number_id: file.phone_number_id,
            anthropic_api_key: file.anthropic_api_key,
            operator_number,
            personality: file.personality.unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
            context_window: file.context_window,
            capture_service: file.capture_service,
            data_dir,
            catalog_path,
            port: file.port,
        })
    }
}
