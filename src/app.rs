//! Shared application state

use std::sync::Arc;

use crate::bus::BusHandle;
use crate::config::Settings;
use crate::hub::Hub;

/// Everything a request handler may touch, built once in `main`
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub bus: BusHandle,
    pub hub: Arc<Hub>,
}

impl AppContext {
    pub fn new(settings: Arc<Settings>, bus: BusHandle) -> Self {
        let hub = Arc::new(Hub::new(Arc::clone(&settings), bus.clone()));
        Self { settings, bus, hub }
    }
}
