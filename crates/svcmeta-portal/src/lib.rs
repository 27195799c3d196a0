//! Portal collaborator contracts + a file-backed catalog export implementation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use svcmeta_core::RawItem;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "svcmeta-portal";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerProfile {
    pub username: String,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureLayerMetadata {
    pub document_title: Option<String>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("group `{0}` not found in catalog")]
    GroupNotFound(String),
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("owner `{0}` not found")]
    NotFound(String),
    #[error("permission denied looking up owner `{0}`")]
    PermissionDenied(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("item `{0}` has no feature layer collection")]
    NotFound(String),
    #[error("{0}")]
    Message(String),
}

/// Supplies the items shared into a portal group.
pub trait CatalogSource: Send + Sync {
    fn fetch_group(&self, group: &str) -> Result<Vec<RawItem>, CatalogError>;
}

/// Resolves an owner id to the owner's profile.
pub trait OwnerDirectory: Send + Sync {
    fn lookup_owner(&self, owner_id: &str) -> Result<OwnerProfile, LookupError>;
}

/// Resolves the hosted feature layer metadata behind a service item.
pub trait FeatureLayerResolver: Send + Sync {
    fn resolve_feature_layer(&self, item: &RawItem) -> Result<FeatureLayerMetadata, ResolveError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogGroup {
    pub title: String,
    #[serde(default)]
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalUser {
    pub username: String,
    pub full_name: String,
    /// The exporting account could not read this profile.
    #[serde(default)]
    pub restricted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureLayerEntry {
    pub item_id: String,
    #[serde(default)]
    pub document_title: Option<String>,
}

/// Offline dump of the portal state a report run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogExport {
    pub portal_url: String,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub groups: Vec<CatalogGroup>,
    #[serde(default)]
    pub users: Vec<PortalUser>,
    #[serde(default)]
    pub feature_layers: Vec<FeatureLayerEntry>,
}

impl CatalogExport {
    pub fn group_titles(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.title.as_str()).collect()
    }

    pub fn item_count(&self) -> usize {
        self.groups.iter().map(|g| g.items.len()).sum()
    }
}

impl CatalogSource for CatalogExport {
    fn fetch_group(&self, group: &str) -> Result<Vec<RawItem>, CatalogError> {
        self.groups
            .iter()
            .find(|g| g.title.eq_ignore_ascii_case(group))
            .map(|g| g.items.clone())
            .ok_or_else(|| CatalogError::GroupNotFound(group.to_string()))
    }
}

impl OwnerDirectory for CatalogExport {
    fn lookup_owner(&self, owner_id: &str) -> Result<OwnerProfile, LookupError> {
        let user = self
            .users
            .iter()
            .find(|u| u.username == owner_id)
            .ok_or_else(|| LookupError::NotFound(owner_id.to_string()))?;
        if user.restricted {
            return Err(LookupError::PermissionDenied(owner_id.to_string()));
        }
        Ok(OwnerProfile {
            username: user.username.clone(),
            full_name: user.full_name.clone(),
        })
    }
}

impl FeatureLayerResolver for CatalogExport {
    fn resolve_feature_layer(&self, item: &RawItem) -> Result<FeatureLayerMetadata, ResolveError> {
        self.feature_layers
            .iter()
            .find(|f| f.item_id == item.id)
            .map(|f| FeatureLayerMetadata {
                document_title: f.document_title.clone(),
            })
            .ok_or_else(|| ResolveError::NotFound(item.id.clone()))
    }
}

pub fn load_catalog_export(path: impl AsRef<Path>) -> Result<CatalogExport> {
    let path = path.as_ref();
    let export: CatalogExport = read_json_file(path)?;
    debug!(
        path = %path.display(),
        groups = export.groups.len(),
        items = export.item_count(),
        "loaded catalog export"
    );
    Ok(export)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}
