//! Camera capability interface and backend registry.
//!
//! Camera services in the fleet are thin façades over vendor SDKs; the
//! engine only ever talks to them through this narrow seam. One
//! implementation per backend, selected at runtime by backend name;
//! there is no vendor class hierarchy.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Region of interest in sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for Roi {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 512,
            height: 512,
        }
    }
}

/// Narrow camera capability interface.
///
/// Vendor-specific behavior lives behind `get`/`set`; the named methods
/// cover the parameters every backend must support.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Backend identifier this camera was built from (e.g. `"mock"`).
    fn backend(&self) -> &str;

    /// Connect to the device and apply initial configuration.
    async fn init(&mut self) -> Result<()>;

    /// Read a backend-defined parameter.
    async fn get(&self, key: &str) -> Result<serde_json::Value>;

    /// Write a backend-defined parameter.
    async fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()>;

    async fn set_roi(&mut self, roi: Roi) -> Result<()>;

    async fn set_exposure_ms(&mut self, ms: f64) -> Result<()>;

    async fn set_gain(&mut self, gain: f64) -> Result<()>;

    /// Begin continuous acquisition.
    async fn start(&mut self) -> Result<()>;

    /// Stop continuous acquisition.
    async fn stop(&mut self) -> Result<()>;

    /// Release the device. Must be idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// Factory closure producing a fresh camera for a backend.
pub type CameraFactory = Box<dyn Fn() -> Box<dyn Camera> + Send + Sync>;

/// Runtime registry of camera backends, keyed by backend name.
///
/// Backends register at process start (composition root); services look
/// them up by the name carried in their configuration.
#[derive(Default)]
pub struct CameraRegistry {
    factories: HashMap<String, CameraFactory>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend. Later registrations replace earlier ones of the
    /// same name.
    pub fn register(&mut self, backend: impl Into<String>, factory: CameraFactory) {
        self.factories.insert(backend.into(), factory);
    }

    /// Instantiate a camera for `backend`, if registered.
    pub fn create(&self, backend: &str) -> Option<Box<dyn Camera>> {
        self.factories.get(backend).map(|f| f())
    }

    /// Names of all registered backends, sorted.
    pub fn backends(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullCamera;

    #[async_trait]
    impl Camera for NullCamera {
        fn backend(&self) -> &str {
            "null"
        }
        async fn init(&mut self) -> Result<()> {
            Ok(())
        }
        async fn get(&self, _key: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn set(&mut self, _key: &str, _value: serde_json::Value) -> Result<()> {
            Ok(())
        }
        async fn set_roi(&mut self, _roi: Roi) -> Result<()> {
            Ok(())
        }
        async fn set_exposure_ms(&mut self, _ms: f64) -> Result<()> {
            Ok(())
        }
        async fn set_gain(&mut self, _gain: f64) -> Result<()> {
            Ok(())
        }
        async fn start(&mut self) -> Result<()> {
            Ok(())
        }
        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registry_creates_by_backend_name() {
        let mut registry = CameraRegistry::new();
        registry.register("null", Box::new(|| Box::new(NullCamera)));

        assert!(registry.create("null").is_some());
        assert!(registry.create("missing").is_none());
        assert_eq!(registry.backends(), vec!["null"]);
    }
}
