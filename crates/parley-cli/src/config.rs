use anyhow::{Context, Result};

const DEFAULT_WIDTH: usize = 80;

/// Backend credentials and terminal settings, read from the environment
/// (after `.env` has been loaded).
#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub anon_key: String,
    pub width: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("PARLEY_URL").context("PARLEY_URL is not set")?;
        let anon_key = lookup("PARLEY_ANON_KEY").context("PARLEY_ANON_KEY is not set")?;
        let width = match lookup("PARLEY_WIDTH") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PARLEY_WIDTH must be a number, got '{}'", raw))?,
            None => DEFAULT_WIDTH,
        };

        Ok(Self {
            url,
            anon_key,
            width,
        })
    }
}
