//! Configuration lookups consumed by the orchestrator.
//!
//! The gateway's configuration store lives outside this crate. The engine only
//! needs three synchronous lookups returning immutable snapshots, expressed by
//! [`ConfigRepository`]. [`InMemoryRepository`] backs embedding and tests.

use dashmap::DashMap;

use crate::config::NorthConnectorConfig;
use crate::model::ScanMode;

pub trait ConfigRepository: Send + Sync {
    fn find_connector_by_id(&self, id: &str) -> Option<NorthConnectorConfig>;

    /// Ids of the South connectors whose data this North connector receives.
    /// Empty means "everything".
    fn list_subscriptions(&self, north_id: &str) -> Vec<String>;

    fn find_scan_mode_by_id(&self, id: &str) -> Option<ScanMode>;
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    connectors: DashMap<String, NorthConnectorConfig>,
    subscriptions: DashMap<String, Vec<String>>,
    scan_modes: DashMap<String, ScanMode>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_connector(&self, connector: NorthConnectorConfig) {
        self.connectors.insert(connector.id.clone(), connector);
    }

    pub fn remove_connector(&self, id: &str) {
        self.connectors.remove(id);
        self.subscriptions.remove(id);
    }

    pub fn set_subscriptions(&self, north_id: &str, south_ids: Vec<String>) {
        self.subscriptions.insert(north_id.to_string(), south_ids);
    }

    pub fn upsert_scan_mode(&self, scan_mode: ScanMode) {
        self.scan_modes.insert(scan_mode.id.clone(), scan_mode);
    }

    pub fn remove_scan_mode(&self, id: &str) {
        self.scan_modes.remove(id);
    }
}

impl ConfigRepository for InMemoryRepository {
    fn find_connector_by_id(&self, id: &str) -> Option<NorthConnectorConfig> {
        self.connectors.get(id).map(|r| r.value().clone())
    }

    fn list_subscriptions(&self, north_id: &str) -> Vec<String> {
        self.subscriptions
            .get(north_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    fn find_scan_mode_by_id(&self, id: &str) -> Option<ScanMode> {
        self.scan_modes.get(id).map(|r| r.value().clone())
    }
}
