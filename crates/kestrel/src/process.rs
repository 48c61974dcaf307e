use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::{Child, Command};

/// Process side effects: launching commands and signalling clients.
pub trait Launcher {
    /// Runs `command` through the shell. Returns the child pid on success.
    fn spawn(&mut self, command: &str) -> Option<u32>;
    fn terminate(&mut self, pid: i32);
}

pub fn shell_argv(command: &str) -> [&str; 3] {
    ["/bin/sh", "-c", command]
}

/// Spawns children through `/bin/sh -c` and keeps them until they are reaped.
#[derive(Default)]
pub struct ProcessLauncher {
    children: Vec<Child>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects exited children. Returns how many were reaped.
    pub fn reap(&mut self) -> usize {
        let before = self.children.len();
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                log::debug!("[process] Child {} exited: {}", child.id(), status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                log::warn!("[process] Failed to poll child {}: {}", child.id(), e);
                false
            }
        });
        before - self.children.len()
    }

    pub fn running(&self) -> usize {
        self.children.len()
    }
}

impl Launcher for ProcessLauncher {
    fn spawn(&mut self, command: &str) -> Option<u32> {
        let [program, flag, script] = shell_argv(command);
        match Command::new(program).arg(flag).arg(script).spawn() {
            Ok(child) => {
                let pid = child.id();
                log::info!("[process] Launched '{}' with PID {}", command, pid);
                self.children.push(child);
                Some(pid)
            }
            Err(e) => {
                log::error!("[process] Failed to launch '{}': {}", command, e);
                None
            }
        }
    }

    fn terminate(&mut self, pid: i32) {
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            log::warn!("[process] Failed to send SIGTERM to {}: {}", pid, e);
        }
    }
}
