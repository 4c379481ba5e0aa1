use std::{collections::HashMap, fs};

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_bind: String,
    pub upload_dir: String,
    pub download_dir: String,
    pub max_upload_bytes: usize,
    pub file_max_age_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            upload_dir: "./data/uploads".into(),
            download_dir: "./data/downloads".into(),
            max_upload_bytes: 50 * 1024 * 1024,
            file_max_age_secs: 3600,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            if let Some(v) = file_cfg.get("bind_addr").and_then(toml::Value::as_str) {
                settings.server_bind = v.to_string();
            }
            if let Some(v) = file_cfg.get("upload_dir").and_then(toml::Value::as_str) {
                settings.upload_dir = v.to_string();
            }
            if let Some(v) = file_cfg.get("download_dir").and_then(toml::Value::as_str) {
                settings.download_dir = v.to_string();
            }
            if let Some(v) = file_cfg
                .get("max_upload_bytes")
                .and_then(toml::Value::as_integer)
            {
                if v > 0 {
                    settings.max_upload_bytes = v as usize;
                }
            }
            if let Some(v) = file_cfg
                .get("file_max_age_secs")
                .and_then(toml::Value::as_integer)
            {
                if v > 0 {
                    settings.file_max_age_secs = v as u64;
                }
            }
        }
    }

    if let Ok(v) = std::env::var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Ok(v) = std::env::var("UPLOAD_DIR") {
        settings.upload_dir = v;
    }
    if let Ok(v) = std::env::var("DOWNLOAD_DIR") {
        settings.download_dir = v;
    }

    if let Ok(v) = std::env::var("MAX_UPLOAD_BYTES") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.max_upload_bytes = parsed;
        }
    }
    if let Ok(v) = std::env::var("FILE_MAX_AGE_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.file_max_age_secs = parsed;
        }
    }

    settings
}
