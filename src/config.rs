//! Runtime configuration.
//!
//! Values come from the process environment (after `.env` has been loaded by
//! `main`). Everything except the OpenRouter key has a default.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024; // 100MB
const DEFAULT_SCRIPTS_DIR: &str = "scripts";
const DEFAULT_INTERPRETER: &str = "python";
const DEFAULT_INTERPRETER_ARGS: &str = "-u";
const DEFAULT_CONVERSION_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CHAT_TIMEOUT_SECS: u64 = 60;

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub converter: ConverterConfig,
    pub chat: ChatConfig,
}

/// How converter scripts are located and run.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Directory holding `convert_to_{pdf,docx,pptx}.py`.
    pub scripts_dir: PathBuf,
    /// Program used to run the scripts.
    pub interpreter: String,
    /// Arguments placed before the script path.
    pub interpreter_args: Vec<String>,
    pub timeout: Duration,
}

/// Chat model provider settings.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_key: String,
    /// Overrides the OpenRouter endpoint when set.
    pub api_url: Option<String>,
    /// Overrides the default model when set.
    pub model: Option<String>,
    pub timeout: Duration,
}

impl AppConfig {
    /// Build the configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY environment variable not set")?;

        Ok(Self {
            bind_addr: var_or("BIND_ADDR", DEFAULT_BIND_ADDR),
            upload_dir: PathBuf::from(var_or("UPLOAD_DIR", DEFAULT_UPLOAD_DIR)),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            converter: ConverterConfig {
                scripts_dir: PathBuf::from(var_or("CONVERTER_SCRIPTS_DIR", DEFAULT_SCRIPTS_DIR)),
                interpreter: var_or("CONVERTER_INTERPRETER", DEFAULT_INTERPRETER),
                interpreter_args: split_args(&var_or(
                    "CONVERTER_INTERPRETER_ARGS",
                    DEFAULT_INTERPRETER_ARGS,
                )),
                timeout: Duration::from_secs(parse_var(
                    "CONVERSION_TIMEOUT_SECS",
                    DEFAULT_CONVERSION_TIMEOUT_SECS,
                )?),
            },
            chat: ChatConfig {
                api_key,
                api_url: env::var("OPENROUTER_API_URL").ok().filter(|s| !s.is_empty()),
                model: env::var("CHAT_MODEL").ok().filter(|s| !s.is_empty()),
                timeout: Duration::from_secs(parse_var(
                    "CHAT_TIMEOUT_SECS",
                    DEFAULT_CHAT_TIMEOUT_SECS,
                )?),
            },
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        _ => Ok(default),
    }
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_args() {
        assert_eq!(split_args("-u  -B"), vec!["-u", "-B"]);
        assert!(split_args("   ").is_empty());
    }

    #[test]
    fn test_parse_var_default_and_invalid() {
        // Names are unique to this test so parallel tests don't interfere.
        env::remove_var("DOCASSIST_TEST_UNSET");
        assert_eq!(parse_var("DOCASSIST_TEST_UNSET", 7u64).unwrap(), 7);

        env::set_var("DOCASSIST_TEST_BAD", "seven");
        let err = parse_var("DOCASSIST_TEST_BAD", 7u64).unwrap_err();
        assert!(err.to_string().contains("DOCASSIST_TEST_BAD"));

        env::set_var("DOCASSIST_TEST_GOOD", " 42 ");
        assert_eq!(parse_var("DOCASSIST_TEST_GOOD", 7u64).unwrap(), 42);
    }
}
