use anyhow::Context;
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::entity::helpers::PersonDetails;
use crate::layout::LayoutOptions;

#[derive(Deserialize, Serialize, Default, Debug, Clone)]
#[serde(default)]
pub struct Configuration {
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub layout: LayoutOptions,
    pub family: BTreeMap<String, Family>,
}

impl Configuration {
    /// Reads the TOML file at `path` (defaults when it does not exist) and
    /// applies environment overrides on top.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml(&raw).with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            debug!("{} not found, using defaults", path.display());
            Self::default()
        };
        cfg.apply_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Environment values win over the file. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(secret) = var("JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }
        if let Some(password) = var("APP_SHARED_PASSWORD") {
            self.auth.shared_password = Some(password);
        }
        if let Some(secret) = var("ADMIN_SECRET") {
            self.auth.admin_secret = Some(secret);
        }
        if let Some(key) = var("SESSION_CLEANUP_KEY") {
            self.auth.session_cleanup_key = Some(key);
        }
        if var("APP_ENV").is_some_and(|env| env.eq_ignore_ascii_case("production")) {
            self.auth.secure_cookies = true;
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Directory holding the SQLite file when no `url` is given
    pub path: String,
    pub url: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::from("."),
            url: None,
        }
    }
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!("sqlite://{}/kutumba.sqlite?mode=rwc", self.path),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    /// Seeds the shared password the first time anyone logs in
    pub shared_password: Option<String>,
    pub admin_secret: Option<String>,
    pub session_cleanup_key: Option<String>,
    pub token_days: i64,
    pub bcrypt_cost: u32,
    pub secure_cookies: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            shared_password: None,
            admin_secret: None,
            session_cleanup_key: None,
            token_days: 7,
            bcrypt_cost: 10,
            secure_cookies: false,
        }
    }
}

impl AuthConfig {
    pub fn jwt_secret(&self) -> anyhow::Result<&str> {
        self.jwt_secret
            .as_deref()
            .context("JWT_SECRET is not set; run `kutumba generate-secret` to create one")
    }

    pub fn token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::days(self.token_days.clamp(1, 30))
    }
}

/// A seed person, keyed by a short handle that `spouse` and `children`
/// refer to.
#[derive(Deserialize, Serialize, Default, Debug, Clone)]
pub struct Family {
    pub name: String,
    pub nickname: Option<String>,
    pub gender: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub location: Option<String>,
    pub spouse: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

impl Family {
    pub fn details(&self) -> PersonDetails {
        PersonDetails {
            name: self.name.clone(),
            nickname: self.nickname.clone(),
            birthday: self.birthday,
            gender: self.gender.clone(),
            location: self.location.clone(),
            ..PersonDetails::default()
        }
    }
}
