//! Decide how a script file is launched.

use std::path::Path;

use scriptflow_core::config::RunnerConfig;
use scriptflow_core::ScriptKind;

/// Interpreters picked for known script extensions.
#[derive(Debug, Clone)]
pub struct Interpreters {
    pub python: String,
    pub shell: String,
}

impl Interpreters {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            python: config.python_interpreter(),
            shell: config.shell.clone(),
        }
    }
}

/// `explicit` wins when set; otherwise `.py` uses Python, `.sh` the shell,
/// `.bat`/`.cmd` go through `cmd /C` on Windows and the shell elsewhere, and
/// anything else runs as an executable.
pub fn resolve_kind(path: &Path, explicit: Option<&str>, interpreters: &Interpreters) -> ScriptKind {
    if let Some(interpreter) = explicit {
        return ScriptKind::Interpreted {
            interpreter: interpreter.to_string(),
        };
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    let interpreter = match ext.as_deref() {
        Some("py") => interpreters.python.clone(),
        Some("sh") => interpreters.shell.clone(),
        Some("bat") | Some("cmd") if cfg!(windows) => "cmd /C".to_string(),
        Some("bat") | Some("cmd") => interpreters.shell.clone(),
        _ => return ScriptKind::Executable,
    };
    ScriptKind::Interpreted { interpreter }
}
