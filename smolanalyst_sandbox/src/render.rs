//! Process-wide plot rendering settings and the switch that forces them into
//! a headless mode while a sandbox scope is active.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{LazyLock, PoisonError, RwLock};

/// Backend used when nothing else has been selected.
pub const DEFAULT_BACKEND: &str = "tkagg";

/// Headless backend forced inside a sandbox.
pub const HEADLESS_BACKEND: &str = "agg";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderSettings {
    pub backend: String,
    pub interactive: bool,
    pub params: BTreeMap<String, String>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            interactive: true,
            params: BTreeMap::new(),
        }
    }
}

static SETTINGS: LazyLock<RwLock<RenderSettings>> =
    LazyLock::new(|| RwLock::new(RenderSettings::default()));

/// Snapshot of the current settings.
pub fn current() -> RenderSettings {
    SETTINGS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn replace(settings: RenderSettings) -> RenderSettings {
    std::mem::replace(
        &mut *SETTINGS.write().unwrap_or_else(PoisonError::into_inner),
        settings,
    )
}

/// Select a backend and whether it opens windows.
pub fn use_backend(backend: &str, interactive: bool) {
    let mut settings = SETTINGS.write().unwrap_or_else(PoisonError::into_inner);
    settings.backend = backend.to_string();
    settings.interactive = interactive;
}

pub fn set_param(key: &str, value: &str) {
    SETTINGS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .params
        .insert(key.to_string(), value.to_string());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowOutcome {
    /// A window would have been opened.
    Displayed,
    /// Headless mode; nothing to show.
    Suppressed,
}

/// Display pending figures. A no-op in headless mode.
pub fn show() -> ShowOutcome {
    let settings = current();
    if settings.interactive {
        tracing::debug!(backend = %settings.backend, "Displaying figures");
        ShowOutcome::Displayed
    } else {
        tracing::debug!(backend = %settings.backend, "show() suppressed in headless mode");
        ShowOutcome::Suppressed
    }
}

/// Forces headless rendering until restored. The full settings captured at
/// engage time are written back verbatim.
#[derive(Debug)]
pub struct RenderModeSwitch {
    saved: Option<RenderSettings>,
}

impl RenderModeSwitch {
    pub fn engage(headless_backend: &str) -> Self {
        let mut headless = current();
        headless.backend = headless_backend.to_string();
        headless.interactive = false;
        let saved = replace(headless);
        tracing::debug!(previous = %saved.backend, headless = headless_backend, "Render mode switched");
        Self { saved: Some(saved) }
    }

    pub fn restore(mut self) {
        self.restore_saved();
    }

    fn restore_saved(&mut self) {
        if let Some(saved) = self.saved.take() {
            tracing::debug!(backend = %saved.backend, "Render mode restored");
            replace(saved);
        }
    }
}

impl Drop for RenderModeSwitch {
    fn drop(&mut self) {
        self.restore_saved();
    }
}
