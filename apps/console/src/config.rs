use std::{collections::HashMap, fs};

#[derive(Debug)]
pub struct Settings {
    pub provider_url: String,
    pub api_key: String,
    pub redirect_uri: String,
    pub landing_route: String,
    pub sign_in_route: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider_url: "http://127.0.0.1:8787".into(),
            api_key: "dev-api-key".into(),
            redirect_uri: "http://localhost/auth/return".into(),
            landing_route: "/dashboard".into(),
            sign_in_route: "/auth/login".into(),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("console.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("provider_url") {
                settings.provider_url = v.clone();
            }
            if let Some(v) = file_cfg.get("api_key") {
                settings.api_key = v.clone();
            }
            if let Some(v) = file_cfg.get("redirect_uri") {
                settings.redirect_uri = v.clone();
            }
            if let Some(route) = file_cfg.get("landing_route").and_then(|v| normalize_route(v)) {
                settings.landing_route = route;
            }
            if let Some(route) = file_cfg.get("sign_in_route").and_then(|v| normalize_route(v)) {
                settings.sign_in_route = route;
            }
        }
    }

    if let Ok(v) = std::env::var("AUTH_PROVIDER_URL") {
        settings.provider_url = v;
    }
    if let Ok(v) = std::env::var("APP__PROVIDER_URL") {
        settings.provider_url = v;
    }

    if let Ok(v) = std::env::var("AUTH_API_KEY") {
        settings.api_key = v;
    }
    if let Ok(v) = std::env::var("APP__API_KEY") {
        settings.api_key = v;
    }

    if let Ok(v) = std::env::var("AUTH_REDIRECT_URI") {
        settings.redirect_uri = v;
    }
    if let Ok(v) = std::env::var("APP__REDIRECT_URI") {
        settings.redirect_uri = v;
    }

    if let Ok(v) = std::env::var("APP__LANDING_ROUTE") {
        if let Some(route) = normalize_route(&v) {
            settings.landing_route = route;
        }
    }
    if let Ok(v) = std::env::var("APP__SIGN_IN_ROUTE") {
        if let Some(route) = normalize_route(&v) {
            settings.sign_in_route = route;
        }
    }

    settings
}

fn normalize_route(raw: &str) -> Option<String> {
    let raw = raw.trim();

    if raw.is_empty() {
        return None;
    }

    if raw.starts_with('/') {
        Some(raw.to_string())
    } else {
        Some(format!("/{raw}"))
    }
}
