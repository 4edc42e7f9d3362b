//! Gateway registry - create, update and look up gateways

use crate::domain::error::GatewayError;
use crate::domain::types::{normalize_gateway_mac, Gateway, GatewayUpdate, Geolocation};
use crate::store::GatewayStore;
use std::sync::Arc;
use tracing::info;

pub struct GatewayRegistry {
    store: Arc<dyn GatewayStore>,
}

impl GatewayRegistry {
    pub fn new(store: Arc<dyn GatewayStore>) -> Self {
        Self { store }
    }

    /// Register a gateway; the mac is normalized before storage
    pub fn create(&self, request: Gateway) -> Result<Gateway, GatewayError> {
        let mac = normalize_gateway_mac(&request.mac);
        if mac.is_empty() {
            return Err(GatewayError::Invalid("mac must contain letters or digits".to_string()));
        }
        let name = validate_name(&request.name)?;
        validate_geolocation(request.geolocation)?;

        let gateway = Gateway { mac, name, geolocation: request.geolocation };
        self.store.insert_gateway(&gateway)?;
        info!(mac = %gateway.mac, name = %gateway.name, "gateway_created");
        Ok(gateway)
    }

    /// Apply a partial update to an existing gateway
    pub fn update(&self, mac: &str, update: GatewayUpdate) -> Result<Gateway, GatewayError> {
        let mut gateway = self.get(mac)?;

        if let Some(name) = update.name.as_deref() {
            gateway.name = validate_name(name)?;
        }
        if update.geolocation.is_some() {
            validate_geolocation(update.geolocation)?;
            gateway.geolocation = update.geolocation;
        }

        if !self.store.update_gateway(&gateway)? {
            return Err(GatewayError::NotFound { mac: gateway.mac });
        }
        info!(mac = %gateway.mac, name = %gateway.name, "gateway_updated");
        Ok(gateway)
    }

    pub fn list(&self) -> Result<Vec<Gateway>, GatewayError> {
        Ok(self.store.list_gateways()?)
    }

    pub fn get(&self, mac: &str) -> Result<Gateway, GatewayError> {
        let normalized = normalize_gateway_mac(mac);
        self.store
            .find_gateway(&normalized)?
            .ok_or(GatewayError::NotFound { mac: normalized })
    }
}

fn validate_name(name: &str) -> Result<String, GatewayError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::Invalid("name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

fn validate_geolocation(geolocation: Option<Geolocation>) -> Result<(), GatewayError> {
    match geolocation {
        Some(geo) if !geo.is_valid() => Err(GatewayError::Invalid(format!(
            "geolocation out of range: latitude {}, longitude {}",
            geo.latitude, geo.longitude
        ))),
        _ => Ok(()),
    }
}
