//! Format conversion.
//!
//! Defines the [`Converter`] trait and the [`Dispatcher`] that routes a stored
//! upload to the converter registered for the requested [`OutputFormat`].
//! The dispatcher never knows how a converter works; the production
//! implementation ([`script::ScriptConverter`]) shells out to a script.

pub mod script;

use crate::config::ConverterConfig;
use crate::error::ApiError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Target formats a stored file can be converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Pdf,
    Docx,
    Pptx,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Pdf, OutputFormat::Docx, OutputFormat::Pptx];

    /// Parse a request value. Matching is exact and lowercase.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "pptx" => Some(Self::Pptx),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Pptx => "pptx",
        }
    }

    /// Name of the converter program producing this format.
    pub fn program(&self) -> &'static str {
        match self {
            Self::Pdf => "convert_to_pdf",
            Self::Docx => "convert_to_docx",
            Self::Pptx => "convert_to_pptx",
        }
    }
}

/// Failure of a single conversion attempt.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Failed to run converter {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Converter {program} failed ({status}): {output}")]
    Failed {
        program: String,
        status: String,
        output: String,
    },

    #[error("Converter {program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    /// Conversion succeeded but the input could not be removed.
    #[error("Failed to remove converted input {path:?}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Turns the file at `input` into the file at `output`.
#[async_trait::async_trait]
pub trait Converter: Send + Sync {
    fn name(&self) -> &str;
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError>;
}

type LockTable = Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>;

/// Routes conversion requests to registered converters.
///
/// Requests naming the same input path run one at a time; a request that
/// waited finds the input already consumed and fails with `InputNotFound`.
#[derive(Default)]
pub struct Dispatcher {
    converters: HashMap<OutputFormat, Arc<dyn Converter>>,
    locks: LockTable,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one script converter per supported format.
    pub fn from_config(config: &ConverterConfig) -> Self {
        OutputFormat::ALL.into_iter().fold(Self::new(), |dispatcher, format| {
            dispatcher.register(format, Arc::new(script::ScriptConverter::new(format, config)))
        })
    }

    pub fn register(mut self, format: OutputFormat, converter: Arc<dyn Converter>) -> Self {
        self.converters.insert(format, converter);
        self
    }

    /// Convert `input` to `format`, delete the input, return the output path.
    pub async fn dispatch(&self, input: &Path, format: OutputFormat) -> Result<PathBuf, ApiError> {
        let output = input.with_extension(format.extension());
        // Case-insensitive filesystems treat `x.PDF` and `x.pdf` as one file.
        let same_format = input
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(format.extension()));
        if same_format {
            return Err(ApiError::validation(format!(
                "Input file is already in {} format",
                format.extension()
            )));
        }

        let converter = self
            .converters
            .get(&format)
            .ok_or_else(|| ApiError::UnsupportedFormat {
                format: format.extension().to_string(),
            })?;

        let _lease = self.lease(input).await;

        let exists = tokio::fs::try_exists(input)
            .await
            .map_err(|source| ApiError::Storage {
                operation: format!("check {}", input.display()),
                source,
            })?;
        if !exists {
            return Err(ApiError::InputNotFound {
                file: display_name(input),
            });
        }

        info!(
            "Converting {:?} -> {:?} with {}",
            input,
            output,
            converter.name()
        );
        converter.convert(input, &output).await?;

        match tokio::fs::remove_file(input).await {
            Ok(()) => debug!("Removed converted input {:?}", input),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Converted input {:?} was already removed", input);
            }
            Err(source) => {
                return Err(ConversionError::Cleanup {
                    path: input.to_path_buf(),
                    source,
                }
                .into())
            }
        }

        Ok(output)
    }

    async fn lease(&self, path: &Path) -> PathLease<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(path.to_path_buf()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        PathLease {
            table: &self.locks,
            path: path.to_path_buf(),
            lock,
            guard: Some(guard),
        }
    }
}

/// Exclusive hold on one input path. Removes its table entry on drop when
/// nobody else is waiting.
struct PathLease<'a> {
    table: &'a LockTable,
    path: PathBuf,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // table + self.lock
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.path);
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
