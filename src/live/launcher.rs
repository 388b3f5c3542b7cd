use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::errors::{Result, SymrefError};
use crate::languages::{Framing, LanguageRegistry};
use crate::types::Language;

/// The byte streams of one running analyzer.
pub struct AnalyzerIo {
    /// Analyzer output (its stdout).
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Analyzer input (its stdin).
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// The backing process, when there is one.
    pub child: Option<Child>,
    pub framing: Framing,
}

/// Starts analyzers for a language.
///
/// `launch` runs on the connection's event loop, so implementations may
/// spawn tokio tasks. Production code uses [`ProcessLauncher`]; tests plug
/// in analyzers that live entirely in memory.
pub trait AnalyzerLauncher: Send + Sync {
    fn launch(&self, language: Language, project_root: &Path) -> Result<AnalyzerIo>;
}

/// Launches the analyzer command registered for each language as a child
/// process speaking over stdio.
pub struct ProcessLauncher {
    registry: Arc<LanguageRegistry>,
}

impl ProcessLauncher {
    pub fn new(registry: Arc<LanguageRegistry>) -> Self {
        Self { registry }
    }
}

impl AnalyzerLauncher for ProcessLauncher {
    fn launch(&self, language: Language, project_root: &Path) -> Result<AnalyzerIo> {
        let caps = self
            .registry
            .get(language)
            .ok_or_else(|| SymrefError::UnsupportedLanguage {
                language: language.to_string(),
            })?;
        let analyzer = &caps.analyzer;

        let mut cmd = Command::new(&analyzer.program);
        cmd.args(&analyzer.args)
            .current_dir(project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        // Own process group, so a forced shutdown also reaches helpers the
        // analyzer spawned.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| SymrefError::Connection {
            message: format!("failed to start '{}': {}", analyzer.program, e),
            language: language.to_string(),
        })?;

        let missing_pipe = || SymrefError::Connection {
            message: "analyzer stdio was not captured".to_string(),
            language: language.to_string(),
        };
        let stdout = child.stdout.take().ok_or_else(missing_pipe)?;
        let stdin = child.stdin.take().ok_or_else(missing_pipe)?;
        debug!(
            "started {} analyzer '{}' (pid {:?})",
            language,
            analyzer.program,
            child.id()
        );

        Ok(AnalyzerIo {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
            framing: analyzer.framing,
        })
    }
}

/// Force-kills a process and everything in its process group.
///
/// Best-effort: failures are logged, never returned.
pub fn kill_process_tree(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
    #[cfg(not(unix))]
    {
        let status = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = status {
            tracing::warn!("taskkill for pid {} failed: {}", pid, e);
        }
    }
}
