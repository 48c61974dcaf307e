use crate::config::{COMPOSITOR_BINDINGS, LAUNCHER_BINDINGS};
use crate::frontend::Frontend;
use crate::process::Launcher;
use crate::server::Server;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositorAction {
    Terminate,
    Cycle,
    CloseFocused,
}

#[derive(Clone, Copy, Debug)]
pub struct CompositorBinding {
    pub keysym: u32,
    pub action: CompositorAction,
}

#[derive(Clone, Copy, Debug)]
pub struct LauncherBinding {
    pub keysym: u32,
    pub command: &'static str,
}

pub fn find_launcher(keysym: u32) -> Option<&'static LauncherBinding> {
    LAUNCHER_BINDINGS.iter().find(|b| b.keysym == keysym)
}

pub fn find_compositor(keysym: u32) -> Option<&'static CompositorBinding> {
    COMPOSITOR_BINDINGS.iter().find(|b| b.keysym == keysym)
}

impl<F: Frontend, L: Launcher> Server<F, L> {
    /// Runs whatever `keysym` is bound to. The launcher table is searched
    /// before the compositor table; both may fire. Assumes the binding
    /// modifier is held.
    pub fn handle_keybinding(&mut self, keysym: u32) -> bool {
        let mut matched = false;

        if let Some(binding) = find_launcher(keysym) {
            matched = true;
            log::info!("[bindings] Launching '{}'", binding.command);
            self.launcher.spawn(binding.command);
        }

        if let Some(binding) = find_compositor(keysym) {
            matched = true;
            self.run_action(binding.action);
        }

        matched
    }

    pub fn run_action(&mut self, action: CompositorAction) {
        log::debug!("[bindings] Running {:?}", action);
        match action {
            CompositorAction::Terminate => self.terminate(),
            CompositorAction::Cycle => self.cycle(),
            CompositorAction::CloseFocused => self.close_focused(),
        }
    }
}
