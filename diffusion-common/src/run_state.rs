use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The state the simulation was in when the process last shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitState {
    /// Operator quit while a run was in progress.
    Terminated,
    /// The run finished on its own.
    Completed,
    /// Operator paused the run and then quit.
    Paused,
    /// Operator stopped the run.
    Stopped,
    /// Operator quit while no run was in progress.
    Exited,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default)]
    pub exit_state: Option<ExitState>,
}

/// JSON-backed store for `RunState`. Only writes when something changed.
#[derive(Debug)]
pub struct RunStateStore {
    path: PathBuf,
    state: RunState,
    dirty: bool,
}

impl RunStateStore {
    /// Loads the stored state, or starts empty if the file does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read run state '{}'", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse run state '{}'", path.display()))?
        } else {
            RunState::default()
        };
        Ok(RunStateStore { path, state, dirty: false })
    }

    pub fn exit_state(&self) -> Option<ExitState> {
        self.state.exit_state
    }

    pub fn set_exit_state(&mut self, exit_state: ExitState) {
        if self.state.exit_state != Some(exit_state) {
            self.state.exit_state = Some(exit_state);
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Persists the state. Returns `false` when there was nothing to save.
    pub fn save(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create '{}'", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write run state '{}'", self.path.display()))?;
        self.dirty = false;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("diffusion-common-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn save_is_skipped_when_clean() {
        let dir = scratch_dir("clean");
        let mut store = RunStateStore::open(dir.join("run_state.json")).unwrap();
        assert_eq!(store.exit_state(), None);
        assert!(!store.save().unwrap());
        assert!(!dir.join("run_state.json").exists());
    }

    #[test]
    fn exit_state_survives_reopen() {
        let dir = scratch_dir("reopen");
        let path = dir.join("nested").join("run_state.json");

        let mut store = RunStateStore::open(&path).unwrap();
        store.set_exit_state(ExitState::Completed);
        assert!(store.is_dirty());
        assert!(store.save().unwrap());
        assert!(!store.is_dirty());

        let reopened = RunStateStore::open(&path).unwrap();
        assert_eq!(reopened.exit_state(), Some(ExitState::Completed));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn setting_same_state_does_not_dirty() {
        let dir = scratch_dir("same");
        let mut store = RunStateStore::open(dir.join("run_state.json")).unwrap();
        store.set_exit_state(ExitState::Paused);
        store.save().unwrap();
        store.set_exit_state(ExitState::Paused);
        assert!(!store.is_dirty());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
