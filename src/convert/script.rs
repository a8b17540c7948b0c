//! Converter backed by an external script run as a subprocess.
//!
//! The script contract: `<interpreter> [args..] <script> <input> <output>`,
//! exit zero on success. Output is captured for logging only.

use super::{ConversionError, Converter, OutputFormat};
use crate::config::ConverterConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct ScriptConverter {
    program: String,
    script: PathBuf,
    interpreter: String,
    interpreter_args: Vec<String>,
    timeout: Duration,
}

impl ScriptConverter {
    pub fn new(format: OutputFormat, config: &ConverterConfig) -> Self {
        let program = format.program().to_string();
        Self {
            script: config.scripts_dir.join(format!("{}.py", program)),
            program,
            interpreter: config.interpreter.clone(),
            interpreter_args: config.interpreter_args.clone(),
            timeout: config.timeout,
        }
    }
}

#[async_trait::async_trait]
impl Converter for ScriptConverter {
    fn name(&self) -> &str {
        &self.program
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.args(&self.interpreter_args)
            .arg(&self.script)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {:?}", cmd);

        let child = cmd.spawn().map_err(|source| ConversionError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "{} exceeded {:?} on {:?}, killed",
                    self.program, self.timeout, input
                );
                return Err(ConversionError::Timeout {
                    program: self.program.clone(),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let finished = result.map_err(|source| ConversionError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&finished.stdout);
        let stderr = String::from_utf8_lossy(&finished.stderr);

        if !finished.status.success() {
            let output = [stdout.trim(), stderr.trim()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ConversionError::Failed {
                program: self.program.clone(),
                status: finished.status.to_string(),
                output,
            });
        }

        info!("{} finished: {}", self.program, stdout.trim());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Writes `body` as the pdf converter script and returns a config running it with `sh`.
    fn sh_config(dir: &Path, body: &str, timeout: Duration) -> ConverterConfig {
        std::fs::write(dir.join("convert_to_pdf.py"), body).unwrap();
        ConverterConfig {
            scripts_dir: dir.to_path_buf(),
            interpreter: "sh".to_string(),
            interpreter_args: Vec::new(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_script_receives_positional_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = sh_config(
            dir.path(),
            "cp \"$1\" \"$2\"\necho \"Successfully converted $1 to PDF\"\n",
            Duration::from_secs(10),
        );
        let input = dir.path().join("in.docx");
        let output = dir.path().join("in.pdf");
        std::fs::write(&input, b"content").unwrap();

        let converter = ScriptConverter::new(OutputFormat::Pdf, &config);
        assert_eq!(converter.name(), "convert_to_pdf");
        converter.convert(&input, &output).await.unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = sh_config(
            dir.path(),
            "echo \"Unsupported file format: .txt\" >&2\nexit 3\n",
            Duration::from_secs(10),
        );

        let converter = ScriptConverter::new(OutputFormat::Pdf, &config);
        let err = converter
            .convert(&dir.path().join("a.txt"), &dir.path().join("a.pdf"))
            .await
            .unwrap_err();

        match err {
            ConversionError::Failed { program, output, .. } => {
                assert_eq!(program, "convert_to_pdf");
                assert!(output.contains("Unsupported file format"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hung_script_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let config = sh_config(dir.path(), "sleep 10\n", Duration::from_millis(200));

        let converter = ScriptConverter::new(OutputFormat::Pdf, &config);
        let started = Instant::now();
        let err = converter
            .convert(&dir.path().join("a.docx"), &dir.path().join("a.pdf"))
            .await
            .unwrap_err();

        assert!(matches!(err, ConversionError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sh_config(dir.path(), "exit 0\n", Duration::from_secs(10));
        config.interpreter = "docassist-no-such-interpreter".to_string();

        let converter = ScriptConverter::new(OutputFormat::Pdf, &config);
        let err = converter
            .convert(&dir.path().join("a.docx"), &dir.path().join("a.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::Spawn { .. }));
    }
}
