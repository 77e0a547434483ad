//! Run-scoped accumulator for the values document. Written concurrently by
//! service tasks, read once after every stream has drained.

use std::collections::BTreeMap;
use std::sync::Mutex;

use hawser_core::values::{IngressValues, PersistenceValues, ValuesDocument};

#[derive(Default)]
pub struct ValuesAccumulator {
    inner: Mutex<ValuesDocument>,
}

impl ValuesAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_image(&self, service: &str, image: &str) {
        let mut doc = self.inner.lock().unwrap();
        doc.entry(service.to_string()).or_default().image = Some(image.to_string());
    }

    pub fn set_ingress(&self, service: &str, ingress: IngressValues) {
        let mut doc = self.inner.lock().unwrap();
        doc.entry(service.to_string()).or_default().ingress = Some(ingress);
    }

    /// Register the per-volume toggle and capacity default (disabled until
    /// the chart author opts in).
    pub fn set_persistence(&self, service: &str, volume: &str) {
        let mut doc = self.inner.lock().unwrap();
        doc.entry(service.to_string())
            .or_default()
            .persistence
            .insert(volume.to_string(), PersistenceValues::default());
    }

    /// Record a secret literal; the secret store holds only a templated
    /// reference back to this key.
    pub fn set_extra(&self, service: &str, key: &str, value: &str) {
        let mut doc = self.inner.lock().unwrap();
        doc.entry(service.to_string())
            .or_default()
            .extra
            .insert(key.to_string(), value.to_string());
    }

    pub fn snapshot(&self) -> ValuesDocument {
        self.inner.lock().unwrap().clone()
    }
}
