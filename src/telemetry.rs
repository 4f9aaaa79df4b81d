//! Machine material telemetry.
//!
//! The orchestrator asks a [`MaterialFeed`] which material a machine has
//! loaded when no committed interval precedes the probed slot (typically at
//! shift start). A feed answer wins over the material recorded on the
//! [`Machine`](crate::models::Machine).

use std::collections::HashMap;

use parking_lot::RwLock;

/// Source of "material currently loaded" readings.
pub trait MaterialFeed: Send + Sync {
    fn current_material(&self, machine_id: &str) -> Option<String>;
}

/// A feed that never reports anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTelemetry;

impl MaterialFeed for NoTelemetry {
    fn current_material(&self, _machine_id: &str) -> Option<String> {
        None
    }
}

/// In-memory feed, updated by whoever polls the machines.
#[derive(Debug, Default)]
pub struct StaticMaterialFeed {
    readings: RwLock<HashMap<String, String>>,
}

impl StaticMaterialFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reading(self, machine_id: impl Into<String>, material: impl Into<String>) -> Self {
        self.set(machine_id, material);
        self
    }

    /// Records the latest reading for a machine.
    pub fn set(&self, machine_id: impl Into<String>, material: impl Into<String>) {
        self.readings
            .write()
            .insert(machine_id.into(), material.into());
    }

    pub fn clear(&self, machine_id: &str) {
        self.readings.write().remove(machine_id);
    }
}

impl MaterialFeed for StaticMaterialFeed {
    fn current_material(&self, machine_id: &str) -> Option<String> {
        self.readings.read().get(machine_id).cloned()
    }
}
