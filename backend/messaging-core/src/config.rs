use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

use crate::error::AppError;

/// Bounds enforced by the send pipeline and the thread/inbox queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagingLimits {
    /// Maximum body length, counted in chars.
    pub max_body_chars: usize,
    pub inbox_preview_chars: usize,
    pub thread_default_page_size: usize,
    pub thread_max_page_size: usize,
}

impl Default for MessagingLimits {
    fn default() -> Self {
        Self {
            max_body_chars: 5000,
            inbox_preview_chars: 140,
            thread_default_page_size: 50,
            thread_max_page_size: 200,
        }
    }
}

impl MessagingLimits {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_body_chars == 0 {
            return Err(AppError::Config("MESSAGE_MAX_CHARS must be > 0".into()));
        }
        if self.inbox_preview_chars == 0 {
            return Err(AppError::Config("INBOX_PREVIEW_CHARS must be > 0".into()));
        }
        if self.thread_default_page_size == 0 || self.thread_max_page_size == 0 {
            return Err(AppError::Config("thread page sizes must be > 0".into()));
        }
        if self.thread_default_page_size > self.thread_max_page_size {
            return Err(AppError::Config(format!(
                "THREAD_DEFAULT_PAGE_SIZE ({}) exceeds THREAD_MAX_PAGE_SIZE ({})",
                self.thread_default_page_size, self.thread_max_page_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub port: u16,
    pub event_buffer_size: usize,
    pub limits: MessagingLimits,
}

impl Config {
    fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
        match env::var(name) {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{name} is not a valid number: {raw}"))),
            _ => Ok(default),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let db_max_connections = Self::parse_var("DB_MAX_CONNECTIONS", 10u32)?;
        let port = Self::parse_var("PORT", 8085u16)?;
        let event_buffer_size = Self::parse_var("EVENT_BUFFER_SIZE", 1024usize)?;

        let defaults = MessagingLimits::default();
        let limits = MessagingLimits {
            max_body_chars: Self::parse_var("MESSAGE_MAX_CHARS", defaults.max_body_chars)?,
            inbox_preview_chars: Self::parse_var(
                "INBOX_PREVIEW_CHARS",
                defaults.inbox_preview_chars,
            )?,
            thread_default_page_size: Self::parse_var(
                "THREAD_DEFAULT_PAGE_SIZE",
                defaults.thread_default_page_size,
            )?,
            thread_max_page_size: Self::parse_var(
                "THREAD_MAX_PAGE_SIZE",
                defaults.thread_max_page_size,
            )?,
        };
        limits.validate()?;

        if event_buffer_size == 0 {
            return Err(AppError::Config("EVENT_BUFFER_SIZE must be > 0".into()));
        }

        Ok(Self {
            database_url,
            db_max_connections,
            port,
            event_buffer_size,
            limits,
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            database_url: None,
            db_max_connections: 5,
            port: 8085,
            event_buffer_size: 256,
            limits: MessagingLimits::default(),
        }
    }
}
