//! Adapter for the external package tool that unpacks and packs `.pak` archives

use crate::error::{Error, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Unpacks and packs add-on archives
///
/// Both operations are synchronous and all-or-nothing: on error the caller
/// must assume nothing usable was written.
pub trait Archiver {
    /// Unpack `archive` into `destination`, returning the unpacked root
    fn extract(&self, archive: &Path, destination: &Path) -> Result<PathBuf>;

    /// Pack the tree at `source` into the archive `destination`
    fn pack(&self, source: &Path, destination: &Path) -> Result<PathBuf>;
}

/// Runs LSLib's `divine` command-line tool
#[derive(Debug, Clone)]
pub struct DivineArchiver {
    pub executable: PathBuf,
    /// Game id passed with `-g`
    pub game: String,
    /// Kill the tool after this long
    pub timeout: Option<Duration>,
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STDERR_TAIL_LINES: usize = 5;

impl DivineArchiver {
    pub fn new(executable: impl Into<PathBuf>, game: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            game: game.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments for one `divine` action
    pub fn arguments(&self, action: &str, source: &Path, destination: &Path) -> Vec<String> {
        vec![
            "-g".to_string(),
            self.game.clone(),
            "--action".to_string(),
            action.to_string(),
            "--source".to_string(),
            source.display().to_string(),
            "--destination".to_string(),
            destination.display().to_string(),
            "-l".to_string(),
            "off".to_string(),
        ]
    }

    fn execute(&self, action: &str, source: &Path, destination: &Path) -> Result<()> {
        let tool = self.executable.display().to_string();
        debug!("{} {} {} -> {}", tool, action, source.display(), destination.display());

        let mut child = Command::new(&self.executable)
            .args(self.arguments(action, source, destination))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::tool(&tool, format!("could not start: {}", e)))?;

        // drained on its own thread so a chatty tool cannot block on a full pipe
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });
        let collect = |reader: Option<thread::JoinHandle<String>>| {
            reader
                .and_then(|handle| handle.join().ok())
                .map(|text| stderr_tail(&text))
                .unwrap_or_default()
        };

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if self.timeout.is_some_and(|limit| started.elapsed() >= limit) {
                // already exited if kill fails; the wait below reaps it either way
                let _ = child.kill();
                let _ = child.wait();
                let message = format!("{} timed out after {:?}", action, started.elapsed());
                return Err(Error::tool(&tool, with_output(message, &collect(stderr))));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let output = collect(stderr);
        if status.success() {
            if !output.is_empty() {
                debug!("{}: {}", tool, output);
            }
            Ok(())
        } else {
            let message = format!("{} exited with {}", action, status);
            Err(Error::tool(&tool, with_output(message, &output)))
        }
    }
}

/// Last few non-blank lines of the tool's error output, joined on one line
fn stderr_tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

fn with_output(message: String, output: &str) -> String {
    if output.is_empty() {
        message
    } else {
        format!("{}: {}", message, output)
    }
}

impl Archiver for DivineArchiver {
    fn extract(&self, archive: &Path, destination: &Path) -> Result<PathBuf> {
        self.execute("extract-package", archive, destination)?;
        if !destination.is_dir() {
            return Err(Error::tool(
                "extract-package",
                format!("{} produced no output", archive.display()),
            ));
        }
        Ok(destination.to_path_buf())
    }

    fn pack(&self, source: &Path, destination: &Path) -> Result<PathBuf> {
        self.execute("create-package", source, destination)?;
        if !destination.is_file() {
            return Err(Error::tool(
                "create-package",
                format!("{} was not written", destination.display()),
            ));
        }
        Ok(destination.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments() {
        let divine = DivineArchiver::new("divine.exe", "bg3");
        let args = divine.arguments(
            "extract-package",
            Path::new("Mods/Blade.pak"),
            Path::new("temp/Blade"),
        );
        assert_eq!(
            args,
            vec![
                "-g",
                "bg3",
                "--action",
                "extract-package",
                "--source",
                "Mods/Blade.pak",
                "--destination",
                "temp/Blade",
                "-l",
                "off"
            ]
        );
    }

    #[test]
    fn test_stderr_tail() {
        let text = "one\n\ntwo\nthree\nfour\nfive\n  six  \n";
        assert_eq!(stderr_tail(text), "two | three | four | five | six");
        assert_eq!(stderr_tail(""), "");
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_reports_tool_output() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("divine");
        std::fs::write(&script, "#!/bin/sh\necho 'package header is corrupt' >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let divine = DivineArchiver::new(&script, "bg3");
        let err = divine
            .extract(Path::new("a.pak"), &dir.path().join("out"))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("extract-package exited with"), "{}", message);
        assert!(message.contains("package header is corrupt"), "{}", message);
    }

    #[test]
    fn test_missing_executable_is_external_tool_error() {
        let divine = DivineArchiver::new("/nonexistent/divine-tool", "bg3");
        let err = divine
            .extract(Path::new("a.pak"), Path::new("out"))
            .unwrap_err();
        assert!(matches!(err, Error::ExternalTool { .. }));
        assert!(err.is_fatal());
    }
}
