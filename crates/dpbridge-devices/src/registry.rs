//! Fingerprint and profile registries.
//!
//! A [`Registry`] is built once at startup (usually from a
//! [`Catalog`](crate::catalog::Catalog)) and handed to the engine by `Arc`.
//! Both tables sit behind async `RwLock`s, so a registration is visible to
//! the next lookup and readers never observe a half-inserted record.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use dpbridge_core::{ConfigurationError, Error, Result};

use crate::capability::CapabilityName;
use crate::converter::Converter;
use crate::datapoint::DatapointId;
use crate::endpoint::DeviceDescriptor;

/// Endpoint used when a fingerprint names none.
pub const DEFAULT_ENDPOINT: u8 = 1;

fn default_endpoints() -> Vec<u8> {
    vec![DEFAULT_ENDPOINT]
}

/// Wire-level identity of a device variant and the profile it uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub manufacturer_name: String,
    pub model_id: String,
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<u8>,
    pub profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Fingerprint {
    pub fn new(
        manufacturer_name: impl Into<String>,
        model_id: impl Into<String>,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            manufacturer_name: manufacturer_name.into(),
            model_id: model_id.into(),
            endpoints: default_endpoints(),
            profile: profile.into(),
            display_name: None,
        }
    }

    pub fn with_endpoints(mut self, endpoints: Vec<u8>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Exact, case-sensitive comparison against on-wire strings.
    pub fn matches(&self, descriptor: &DeviceDescriptor) -> bool {
        self.manufacturer_name == descriptor.manufacturer_name
            && self.model_id == descriptor.model_id
    }

    /// Endpoints to try in order, falling back to [`DEFAULT_ENDPOINT`] when
    /// the list is empty.
    pub fn endpoint_ids(&self) -> &[u8] {
        if self.endpoints.is_empty() {
            &[DEFAULT_ENDPOINT]
        } else {
            &self.endpoints
        }
    }

    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor::new(&self.manufacturer_name, &self.model_id)
    }

    /// Name shown to users: explicit display name, else `manufacturer model`.
    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.manufacturer_name, self.model_id))
    }
}

/// Free-form profile options.
///
/// The one structured key is `converters`, mapping a datapoint key to a
/// converter definition that replaces the trait's default:
///
/// ```json
/// { "converters": { "temperature": { "kind": "divide", "divisor": 100 } } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileOptions(pub serde_json::Map<String, serde_json::Value>);

impl ProfileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn with_converter(mut self, dp_key: &str, converter: &Converter) -> Self {
        let value = serde_json::to_value(converter).unwrap_or(serde_json::Value::Null);
        let converters = self
            .0
            .entry("converters")
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        if let Some(map) = converters.as_object_mut() {
            map.insert(dp_key.to_string(), value);
        }
        self
    }

    /// Converter override for `dp_key`, validated.
    pub fn converter(&self, dp_key: &str) -> std::result::Result<Option<Converter>, ConfigurationError> {
        let Some(converters) = self.0.get("converters") else {
            return Ok(None);
        };
        let invalid = |reason: String| ConfigurationError::InvalidOption {
            key: format!("converters.{}", dp_key),
            reason,
        };
        let Some(map) = converters.as_object() else {
            return Err(ConfigurationError::InvalidOption {
                key: "converters".to_string(),
                reason: "expected an object".to_string(),
            });
        };
        let Some(raw) = map.get(dp_key) else {
            return Ok(None);
        };
        let converter: Converter =
            serde_json::from_value(raw.clone()).map_err(|e| invalid(e.to_string()))?;
        converter.validate().map_err(invalid)?;
        Ok(Some(converter))
    }
}

/// Declarative capability contract shared by every device that uses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Filled from the `profiles.json` key on load.
    #[serde(default, skip_serializing)]
    pub id: String,
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub dp_map: BTreeMap<String, DatapointId>,
    #[serde(default)]
    pub options: ProfileOptions,
}

impl Profile {
    pub fn new<I, S>(id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            dp_map: BTreeMap::new(),
            options: ProfileOptions::default(),
        }
    }

    pub fn with_datapoint(mut self, key: impl Into<String>, dp: DatapointId) -> Self {
        self.dp_map.insert(key.into(), dp);
        self
    }

    pub fn with_options(mut self, options: ProfileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn datapoint(&self, key: &str) -> Option<DatapointId> {
        self.dp_map.get(key).copied()
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Parsed capability names; fails on the first invalid one.
    pub fn capability_names(&self) -> std::result::Result<Vec<CapabilityName>, ConfigurationError> {
        self.capabilities
            .iter()
            .map(|c| CapabilityName::parse(c.as_str()))
            .collect()
    }

    /// Structural checks that need no trait library.
    pub fn check(&self) -> std::result::Result<(), ConfigurationError> {
        if self.capabilities.is_empty() {
            return Err(ConfigurationError::EmptyCapabilities(self.id.clone()));
        }
        self.capability_names().map(|_| ())
    }
}

/// A fingerprint together with the profile it resolved to.
#[derive(Debug, Clone)]
pub struct ProfileMatch {
    pub fingerprint: Fingerprint,
    pub profile: Arc<Profile>,
}

/// Process-wide, read-mostly fingerprint and profile tables.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    /// Insertion order is match order.
    fingerprints: Arc<RwLock<Vec<Fingerprint>>>,
    profiles: Arc<RwLock<HashMap<String, Arc<Profile>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Profiles ==========

    /// Insert or replace a profile.
    pub async fn register_profile(&self, profile: Profile) -> Result<()> {
        profile.check()?;
        let id = profile.id.clone();
        let replaced = self
            .profiles
            .write()
            .await
            .insert(id.clone(), Arc::new(profile))
            .is_some();
        tracing::debug!(profile = %id, replaced, "Registered profile");
        Ok(())
    }

    /// Strict lookup by id.
    pub async fn resolve(&self, id: &str) -> Result<Arc<Profile>> {
        self.profiles
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnresolvedProfile(id.to_string()).into())
    }

    pub async fn profile(&self, id: &str) -> Option<Arc<Profile>> {
        self.profiles.read().await.get(id).cloned()
    }

    /// All profiles, sorted by id.
    pub async fn list_profiles(&self) -> Vec<Arc<Profile>> {
        let mut profiles: Vec<_> = self.profiles.read().await.values().cloned().collect();
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        profiles
    }

    pub async fn profile_count(&self) -> usize {
        self.profiles.read().await.len()
    }

    // ========== Fingerprints ==========

    /// Add a fingerprint.
    ///
    /// Re-registering the same `(manufacturer, model)` for the same profile
    /// is a no-op; pointing it at a different profile is rejected.
    pub async fn register_fingerprint(&self, fingerprint: Fingerprint) -> Result<()> {
        if fingerprint.manufacturer_name.is_empty() || fingerprint.model_id.is_empty() {
            return Err(Error::MalformedDescriptor(format!(
                "fingerprint '{}/{}' for profile '{}'",
                fingerprint.manufacturer_name, fingerprint.model_id, fingerprint.profile
            )));
        }

        let mut fingerprints = self.fingerprints.write().await;
        let descriptor = fingerprint.descriptor();
        if let Some(existing) = fingerprints.iter().find(|f| f.matches(&descriptor)) {
            if existing.profile == fingerprint.profile {
                tracing::trace!(fingerprint = %descriptor, "Fingerprint already registered");
                return Ok(());
            }
            return Err(ConfigurationError::DuplicateFingerprint {
                manufacturer: fingerprint.manufacturer_name,
                model: fingerprint.model_id,
                existing: existing.profile.clone(),
                requested: fingerprint.profile,
            }
            .into());
        }

        tracing::debug!(fingerprint = %descriptor, profile = %fingerprint.profile, "Registered fingerprint");
        fingerprints.push(fingerprint);
        Ok(())
    }

    /// Remove a fingerprint; returns whether one was present.
    pub async fn unregister_fingerprint(&self, descriptor: &DeviceDescriptor) -> bool {
        let mut fingerprints = self.fingerprints.write().await;
        let before = fingerprints.len();
        fingerprints.retain(|f| !f.matches(descriptor));
        fingerprints.len() != before
    }

    /// Linear scan, first match wins.
    pub async fn find_fingerprint(&self, descriptor: &DeviceDescriptor) -> Option<Fingerprint> {
        self.fingerprints
            .read()
            .await
            .iter()
            .find(|f| f.matches(descriptor))
            .cloned()
    }

    pub async fn list_fingerprints(&self) -> Vec<Fingerprint> {
        self.fingerprints.read().await.clone()
    }

    pub async fn fingerprint_count(&self) -> usize {
        self.fingerprints.read().await.len()
    }

    // ========== Lookup ==========

    /// Match a descriptor and resolve its profile.
    ///
    /// `Ok(None)` means no fingerprint matched. A fingerprint whose profile
    /// is missing is a [`ConfigurationError::UnknownProfile`].
    pub async fn lookup(&self, descriptor: &DeviceDescriptor) -> Result<Option<ProfileMatch>> {
        if descriptor.manufacturer_name.is_empty() || descriptor.model_id.is_empty() {
            return Err(Error::MalformedDescriptor(format!(
                "descriptor '{}' lacks manufacturer or model",
                descriptor
            )));
        }

        let Some(fingerprint) = self.find_fingerprint(descriptor).await else {
            return Ok(None);
        };
        let Some(profile) = self.profile(&fingerprint.profile).await else {
            return Err(ConfigurationError::UnknownProfile {
                profile: fingerprint.profile,
                manufacturer: fingerprint.manufacturer_name,
                model: fingerprint.model_id,
            }
            .into());
        };
        Ok(Some(ProfileMatch {
            fingerprint,
            profile,
        }))
    }

    pub async fn get_profile(&self, descriptor: &DeviceDescriptor) -> Result<Option<Arc<Profile>>> {
        Ok(self.lookup(descriptor).await?.map(|m| m.profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn climate_basic() -> Profile {
        Profile::new("climate_basic", ["measure_temperature", "measure_humidity"])
            .with_datapoint("temperature", 1)
            .with_datapoint("humidity", 2)
    }

    #[tokio::test]
    async fn test_get_profile_exact_match() {
        let registry = Registry::new();
        registry.register_profile(climate_basic()).await.unwrap();
        registry
            .register_fingerprint(Fingerprint::new("_TZE200_abcdefgh", "TS0601", "climate_basic"))
            .await
            .unwrap();

        let profile = registry
            .get_profile(&DeviceDescriptor::new("_TZE200_abcdefgh", "TS0601"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.id, "climate_basic");
        assert_eq!(profile.datapoint("temperature"), Some(1));

        // Case-sensitive
        let miss = registry
            .get_profile(&DeviceDescriptor::new("_tze200_abcdefgh", "TS0601"))
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_unregister_fingerprint() {
        let registry = Registry::new();
        registry.register_profile(climate_basic()).await.unwrap();
        registry
            .register_fingerprint(Fingerprint::new("Acme", "X", "climate_basic"))
            .await
            .unwrap();
        let descriptor = DeviceDescriptor::new("Acme", "X");

        assert!(registry.unregister_fingerprint(&descriptor).await);
        assert!(registry.get_profile(&descriptor).await.unwrap().is_none());
        assert_eq!(registry.fingerprint_count().await, 0);
        assert!(!registry.unregister_fingerprint(&descriptor).await);

        // The slot is free again, even for a different profile.
        registry
            .register_profile(Profile::new("other", ["onoff"]).with_datapoint("onoff", 1))
            .await
            .unwrap();
        registry
            .register_fingerprint(Fingerprint::new("Acme", "X", "other"))
            .await
            .unwrap();
        assert_eq!(registry.get_profile(&descriptor).await.unwrap().unwrap().id, "other");
    }

    #[test]
    fn test_empty_endpoint_list_falls_back_to_default() {
        let fp = Fingerprint::new("Acme", "X", "p").with_endpoints(vec![]);
        assert_eq!(fp.endpoint_ids(), &[DEFAULT_ENDPOINT]);
        let fp = fp.with_endpoints(vec![2, 1]);
        assert_eq!(fp.endpoint_ids(), &[2, 1]);
    }

    #[tokio::test]
    async fn test_unknown_profile_reference_fails_loudly() {
        let registry = Registry::new();
        registry
            .register_fingerprint(Fingerprint::new("Acme", "X", "ghost"))
            .await
            .unwrap();

        let err = registry
            .get_profile(&DeviceDescriptor::new("Acme", "X"))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_policy() {
        let registry = Registry::new();
        let fp = Fingerprint::new("Acme", "X", "a");
        registry.register_fingerprint(fp.clone()).await.unwrap();
        registry.register_fingerprint(fp).await.unwrap();
        assert_eq!(registry.fingerprint_count().await, 1);

        let err = registry
            .register_fingerprint(Fingerprint::new("Acme", "X", "b"))
            .await
            .unwrap_err();
        match err {
            Error::Configuration(ConfigurationError::DuplicateFingerprint {
                existing,
                requested,
                ..
            }) => {
                assert_eq!(existing, "a");
                assert_eq!(requested, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_register_profile_is_upsert() {
        let registry = Registry::new();
        registry.register_profile(climate_basic()).await.unwrap();
        registry
            .register_profile(Profile::new("climate_basic", ["measure_temperature"]))
            .await
            .unwrap();
        assert_eq!(registry.profile_count().await, 1);
        assert_eq!(
            registry.resolve("climate_basic").await.unwrap().capabilities,
            vec!["measure_temperature"]
        );
    }

    #[tokio::test]
    async fn test_register_profile_rejects_empty_and_invalid() {
        let registry = Registry::new();
        let empty = Profile::new("empty", Vec::<String>::new());
        assert!(registry.register_profile(empty).await.unwrap_err().is_configuration());

        let bad = Profile::new("bad", ["Measure-Temp"]);
        assert!(registry.register_profile(bad).await.unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_malformed_descriptor() {
        let registry = Registry::new();
        let err = registry
            .get_profile(&DeviceDescriptor::new("", "TS0601"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedDescriptor(_)));
    }

    #[tokio::test]
    async fn test_resolve_unknown() {
        let registry = Registry::new();
        assert!(matches!(
            registry.resolve("nope").await,
            Err(Error::Configuration(ConfigurationError::UnresolvedProfile(_)))
        ));
    }

    #[test]
    fn test_converter_option() {
        let options = ProfileOptions::new().with_converter("temperature", &Converter::divide(100.0));
        assert_eq!(
            options.converter("temperature").unwrap(),
            Some(Converter::divide(100.0))
        );
        assert_eq!(options.converter("humidity").unwrap(), None);

        let bad: ProfileOptions = serde_json::from_value(serde_json::json!({
            "converters": { "temperature": { "kind": "divide", "divisor": 0 } }
        }))
        .unwrap();
        assert!(matches!(
            bad.converter("temperature"),
            Err(ConfigurationError::InvalidOption { .. })
        ));

        let unknown: ProfileOptions = serde_json::from_value(serde_json::json!({
            "converters": { "temperature": { "kind": "fahrenheit" } }
        }))
        .unwrap();
        assert!(unknown.converter("temperature").is_err());
    }

    #[test]
    fn test_profile_json_shape() {
        let profile: Profile = serde_json::from_value(serde_json::json!({
            "capabilities": ["measure_temperature"],
            "dpMap": { "temperature": 1 },
            "options": {}
        }))
        .unwrap();
        assert_eq!(profile.datapoint("temperature"), Some(1));
        assert!(profile.id.is_empty());

        let fp: Fingerprint = serde_json::from_value(serde_json::json!({
            "manufacturerName": "_TZE200_abcdefgh",
            "modelId": "TS0601",
            "profile": "climate_basic"
        }))
        .unwrap();
        assert_eq!(fp.endpoints, vec![1]);
    }
}
