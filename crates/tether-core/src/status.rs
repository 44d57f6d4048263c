use serde::Serialize;
use sysinfo::System;

/// Process-wide status snapshot, shared by the supervisor's status log and the liveness server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    pub bot_ready: bool,
    pub guilds: usize,
    pub voice_connections: usize,
    pub uptime_secs: u64,
    /// Resident set size in bytes, when the platform exposes it.
    pub memory_bytes: Option<u64>,
}

impl ProcessStatus {
    pub fn memory_mb(&self) -> Option<u64> {
        self.memory_bytes.map(|b| b / 1024 / 1024)
    }
}

/// Anything that can describe the running process.
pub trait StatusSource: Send + Sync {
    fn status(&self) -> ProcessStatus;
}

/// Resident memory of the current process.
pub fn resident_memory_bytes() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_process(pid);
    system.process(pid).map(|p| p.memory())
}

/// Physical memory installed on the host.
pub fn total_memory_bytes() -> Option<u64> {
    let mut system = System::new();
    system.refresh_memory();
    Some(system.total_memory()).filter(|&bytes| bytes > 0)
}
