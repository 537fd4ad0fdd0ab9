//! Launch command construction.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::{JavaSection, LauncherConfig};
use crate::path_detector::PathDetector;

/// Program plus arguments used to start the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build the command described by the config: the delegating script when
    /// one is configured, the Java invocation otherwise.
    pub fn from_config(config: &LauncherConfig) -> Self {
        match &config.server.script {
            Some(script) => Self::script(script),
            None => Self::java(&PathDetector::detect_java(&config.java.preferred_paths), &config.java, &config.server.archive),
        }
    }

    /// `java -Xmx.. -Xms.. <gc flags> <extra> -jar <archive> [--nogui]`
    pub fn java(java: &str, opts: &JavaSection, archive: &str) -> Self {
        let mut args = vec![format!("-Xmx{}", opts.max_heap), format!("-Xms{}", opts.min_heap)];
        args.extend(opts.gc_flags.iter().cloned());
        args.extend(opts.extra_args.iter().cloned());
        args.push("-jar".to_string());
        args.push(archive.to_string());
        if opts.nogui {
            args.push("--nogui".to_string());
        }
        Self {
            program: java.to_string(),
            args,
        }
    }

    #[cfg(target_os = "windows")]
    pub fn script(script: &str) -> Self {
        Self::new("cmd", ["/C", script])
    }

    #[cfg(not(target_os = "windows"))]
    pub fn script(script: &str) -> Self {
        Self::new("sh", [script])
    }

    /// Full command line for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Command with all three stdio pipes captured, run inside `working_dir`.
    pub(crate) fn to_command(&self, working_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        // Ctrl+C in the launcher's terminal must reach only the launcher,
        // which then asks the server to stop.
        #[cfg(unix)]
        cmd.process_group(0);
        hide_console_window(&mut cmd);
        cmd
    }
}

/// Windows: keep the server from opening its own console window.
#[cfg(target_os = "windows")]
fn hide_console_window(cmd: &mut Command) {
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(target_os = "windows"))]
fn hide_console_window(_cmd: &mut Command) {}
