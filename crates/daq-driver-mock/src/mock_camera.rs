//! Mock camera backend.

use std::collections::HashMap;

use async_trait::async_trait;

use daq_core::camera::{Camera, CameraRegistry, Roi};
use daq_core::{DaqError, Result};

/// Software camera: parameters live in a map, frames are imaginary.
pub struct MockCamera {
    params: HashMap<String, serde_json::Value>,
    roi: Roi,
    initialized: bool,
    acquiring: bool,
}

impl MockCamera {
    pub fn new() -> Self {
        let mut params = HashMap::new();
        params.insert("exposure_ms".into(), serde_json::json!(10.0));
        params.insert("gain".into(), serde_json::json!(1.0));
        Self {
            params,
            roi: Roi::default(),
            initialized: false,
            acquiring: false,
        }
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Camera for MockCamera {
    fn backend(&self) -> &str {
        "mock"
    }

    async fn init(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<serde_json::Value> {
        self.params
            .get(key)
            .cloned()
            .ok_or_else(|| DaqError::Configuration(format!("unknown camera parameter '{}'", key)))
    }

    async fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        if !self.params.contains_key(key) {
            return Err(DaqError::Configuration(format!(
                "unknown camera parameter '{}'",
                key
            )));
        }
        self.params.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_roi(&mut self, roi: Roi) -> Result<()> {
        self.roi = roi;
        Ok(())
    }

    async fn set_exposure_ms(&mut self, ms: f64) -> Result<()> {
        self.set("exposure_ms", serde_json::json!(ms)).await
    }

    async fn set_gain(&mut self, gain: f64) -> Result<()> {
        self.set("gain", serde_json::json!(gain)).await
    }

    async fn start(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(DaqError::Configuration("camera not initialized".into()));
        }
        self.acquiring = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.acquiring = false;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.acquiring = false;
        self.initialized = false;
        Ok(())
    }
}

/// Register the mock backend on a registry.
pub fn register_mock_camera(registry: &mut CameraRegistry) {
    registry.register("mock", Box::new(|| Box::new(MockCamera::new())));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_and_parameters() {
        let mut registry = CameraRegistry::new();
        register_mock_camera(&mut registry);
        let mut camera = registry.create("mock").unwrap();

        assert!(camera.start().await.is_err());
        camera.init().await.unwrap();
        camera.set_exposure_ms(25.0).await.unwrap();
        camera.start().await.unwrap();

        let exposure = camera.get("exposure_ms").await.unwrap();
        assert_eq!(exposure, serde_json::json!(25.0));
        assert!(camera.get("focus").await.is_err());

        camera.stop().await.unwrap();
        camera.close().await.unwrap();
        camera.close().await.unwrap();
    }
}
