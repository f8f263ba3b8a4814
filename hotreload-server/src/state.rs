use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use hotreload_core::Settings;

use crate::auth::CapabilityCheck;
use crate::launcher::SupervisorLauncher;

/// Shared state of one server generation.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub(crate) capability: Arc<dyn CapabilityCheck>,
    pub(crate) launcher: Arc<dyn SupervisorLauncher>,
    /// Serializes admissions within this process.
    pub(crate) admission: Arc<Mutex<()>>,
    handing_off: Arc<AtomicBool>,
    shutdown: broadcast::Sender<()>,
}

impl AppState {
    /// State authenticating against the settings' token table.
    pub fn new(
        settings: Settings,
        launcher: Arc<dyn SupervisorLauncher>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        let settings = Arc::new(settings);
        AppState {
            capability: settings.clone(),
            settings,
            launcher,
            admission: Arc::new(Mutex::new(())),
            handing_off: Arc::new(AtomicBool::new(false)),
            shutdown,
        }
    }

    pub fn with_capability(mut self, capability: Arc<dyn CapabilityCheck>) -> Self {
        self.capability = capability;
        self
    }

    /// True once a supervisor has taken over; no further admissions.
    pub fn is_handing_off(&self) -> bool {
        self.handing_off.load(Ordering::SeqCst)
    }

    /// Mark the hand-off and ask the server loop to stop gracefully.
    pub(crate) fn begin_handoff(&self) {
        self.handing_off.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }
}
