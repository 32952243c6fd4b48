//! Flat site records.
//!
//! Each site is one hash; the set at [`KeySchema::site_ids_key`] lists every
//! site hash key so the whole fleet can be enumerated.

use crate::error::StoreError;
use crate::keys::KeySchema;
use crate::store::{Batch, Store};
use std::collections::HashMap;
use std::sync::Arc;

/// Geographic position of a site.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

/// A metered installation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Site {
    pub id: u64,
    /// Rated capacity.
    pub capacity: f64,
    pub panels: u32,
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub coordinate: Option<Coordinate>,
}

impl Site {
    /// Flatten into hash fields.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("id".to_string(), self.id.to_string()),
            ("capacity".to_string(), self.capacity.to_string()),
            ("panels".to_string(), self.panels.to_string()),
            ("address".to_string(), self.address.clone()),
            ("city".to_string(), self.city.clone()),
            ("state".to_string(), self.state.clone()),
            ("postal_code".to_string(), self.postal_code.clone()),
        ];
        if let Some(c) = self.coordinate {
            fields.push(("lat".to_string(), c.lat.to_string()));
            fields.push(("lng".to_string(), c.lng.to_string()));
        }
        fields
    }

    /// Rebuild from hash fields. `None` if a required field is missing or malformed.
    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let get = |name: &str| fields.get(name).cloned();
        let coordinate = match (fields.get("lat"), fields.get("lng")) {
            (Some(lat), Some(lng)) => {
                Some(Coordinate { lat: lat.parse().ok()?, lng: lng.parse().ok()? })
            }
            _ => None,
        };
        Some(Self {
            id: get("id")?.parse().ok()?,
            capacity: get("capacity")?.parse().ok()?,
            panels: get("panels")?.parse().ok()?,
            address: get("address")?,
            city: get("city")?,
            state: get("state")?,
            postal_code: get("postal_code")?,
            coordinate,
        })
    }
}

/// Insert and fetch [`Site`] records.
#[derive(Debug)]
pub struct SiteStore<S> {
    store: Arc<S>,
    schema: KeySchema,
}

impl<S> Clone for SiteStore<S> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), schema: self.schema.clone() }
    }
}

impl<S> SiteStore<S>
where
    S: Store + 'static,
{
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    pub fn from_arc(store: Arc<S>) -> Self {
        Self { store, schema: KeySchema::default() }
    }

    pub fn with_schema(mut self, schema: KeySchema) -> Self {
        self.schema = schema;
        self
    }

    /// Write the site hash and register it, in one batch.
    pub async fn insert(&self, site: &Site) -> Result<(), StoreError> {
        let hash_key = self.schema.site_hash_key(site.id);
        let mut batch = Batch::new();
        batch.hset_many(&hash_key, site.to_fields()).sadd(&self.schema.site_ids_key(), hash_key.clone());
        self.store.exec(batch).await?;
        tracing::debug!(target: "tallystore::sites", site_id = site.id, "site stored");
        Ok(())
    }

    pub async fn find_by_id(&self, id: u64) -> Result<Option<Site>, StoreError> {
        let fields = self.store.hgetall(&self.schema.site_hash_key(id)).await?;
        Ok(Site::from_fields(&fields))
    }

    /// Every registered site, ordered by id. Keys whose hash has vanished are skipped.
    pub async fn find_all(&self) -> Result<Vec<Site>, StoreError> {
        let mut sites = Vec::new();
        for hash_key in self.store.smembers(&self.schema.site_ids_key()).await? {
            if let Some(site) = Site::from_fields(&self.store.hgetall(&hash_key).await?) {
                sites.push(site);
            }
        }
        sites.sort_by_key(|s| s.id);
        Ok(sites)
    }
}
