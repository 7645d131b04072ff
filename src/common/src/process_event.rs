use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type Pid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessEventKind {
    Exec,
    Exit,
}

impl std::fmt::Display for ProcessEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessEventKind::Exec => write!(f, "exec"),
            ProcessEventKind::Exit => write!(f, "exit"),
        }
    }
}

/// What the detector saw when a process called exec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecDetails {
    pub exe_path: String,
    pub cmd_line: String,
    /// Only the allow-listed variables, see [`crate::constants::FORWARDED_ENV_VARS`].
    pub environments: HashMap<String, String>,
    /// Pid of the process inside its own pid namespace, when it runs in a container.
    pub container_process_id: Option<Pid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub pid: Pid,
    pub kind: ProcessEventKind,
    pub exec_details: Option<ExecDetails>,
}

impl ProcessEvent {
    pub fn exec(pid: Pid, exec_details: ExecDetails) -> Self {
        Self {
            pid,
            kind: ProcessEventKind::Exec,
            exec_details: Some(exec_details),
        }
    }

    pub fn exit(pid: Pid) -> Self {
        Self {
            pid,
            kind: ProcessEventKind::Exit,
            exec_details: None,
        }
    }

    /// Looks up a forwarded environment variable of the process.
    pub fn env(&self, key: &str) -> Option<&str> {
        self.exec_details
            .as_ref()
            .and_then(|details| details.environments.get(key))
            .map(String::as_str)
    }

    pub fn cmd_line(&self) -> &str {
        self.exec_details
            .as_ref()
            .map(|details| details.cmd_line.as_str())
            .unwrap_or_default()
    }
}
