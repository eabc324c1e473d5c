//! Static business copy: menu text, prices, guided-flow prompts.
//!
//! Loaded from a JSON file at startup; every field has a default so a
//! missing or broken file degrades to usable copy instead of aborting.

use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    /// Greeting shown with the main menu buttons.
    #[serde(default = "default_welcome")]
    pub welcome: String,
    #[serde(default = "default_menu_buttons")]
    pub menu_buttons: Vec<String>,
    /// Image link for the prices reply. Empty = send the caption as text.
    #[serde(default)]
    pub prices_image: String,
    #[serde(default = "default_prices_caption")]
    pub prices_caption: String,
    #[serde(default = "default_location")]
    pub location: String,
    /// Reply for choice inputs that match nothing.
    #[serde(default = "default_unknown_reply")]
    pub unknown_reply: String,
    /// Service options offered during the guided flow.
    #[serde(default = "default_services")]
    pub services: Vec<String>,
    #[serde(default = "default_name_prompt")]
    pub name_prompt: String,
    /// Uses `{name}`.
    #[serde(default = "default_service_prompt")]
    pub service_prompt: String,
    /// Uses `{name}` and `{service}`.
    #[serde(default = "default_confirmation")]
    pub confirmation: String,
    /// Two-state variant closing line. Uses `{name}`.
    #[serde(default = "default_thanks")]
    pub thanks: String,
    /// Operator notification. Uses `{name}` and `{user}`.
    #[serde(default = "default_operator_alert")]
    pub operator_alert: String,
}

fn default_welcome() -> String {
    "¡Hola! Bienvenido. ¿En qué te ayudamos hoy?".into()
}

fn default_menu_buttons() -> Vec<String> {
    vec!["💰 Precios".into(), "📍 Ubicación".into(), "📅 Agendar Cita".into()]
}

fn default_prices_caption() -> String {
    "Estos son nuestros precios vigentes.".into()
}

fn default_location() -> String {
    "Nos encuentras en el centro. Escríbenos para indicaciones.".into()
}

fn default_unknown_reply() -> String {
    "No entendí esa opción. Escribe \"menu\" para ver las opciones.".into()
}

fn default_services() -> Vec<String> {
    vec!["Consultoría".into(), "Desarrollo Web".into(), "Soporte".into()]
}

fn default_name_prompt() -> String {
    "📝 Para agendar, primero necesito tu nombre.".into()
}

fn default_service_prompt() -> String {
    "Gusto en saludarte, {name}. ¿Qué servicio te interesa?".into()
}

fn default_confirmation() -> String {
    "¡Listo {name}! Agendamos tu interés en: {service}.".into()
}

fn default_thanks() -> String {
    "Gracias, {name}. Te contactamos pronto para confirmar tu cita.".into()
}

fn default_operator_alert() -> String {
    "🔔 *NUEVA CITA*\nCliente: {name}\nTel: {user}".into()
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            welcome: default_welcome(),
            menu_buttons: default_menu_buttons(),
            prices_image: String::new(),
            prices_caption: default_prices_caption(),
            location: default_location(),
            unknown_reply: default_unknown_reply(),
            services: default_services(),
            name_prompt: default_name_prompt(),
            service_prompt: default_service_prompt(),
            confirmation: default_confirmation(),
            thanks: default_thanks(),
            operator_alert: default_operator_alert(),
        }
    }
}

impl Catalog {
    /// Load the catalog, falling back to defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(catalog) => {
                    info!("Loaded catalog from {:?}", path);
                    catalog
                }
                Err(e) => {
                    warn!("Failed to parse catalog {:?}: {e}; using defaults", path);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read catalog {:?}: {e}; using defaults", path);
                Self::default()
            }
        }
    }
}

/// Fill `{key}` placeholders in a copy template.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}
