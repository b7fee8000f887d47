//! `fingerprints.json` / `profiles.json` loading and static validation.
//!
//! ```json
//! // fingerprints.json
//! [{ "manufacturerName": "_TZE200_abcdefgh", "modelId": "TS0601",
//!    "endpoints": [1], "profile": "climate_basic" }]
//!
//! // profiles.json
//! { "climate_basic": { "capabilities": ["measure_temperature"],
//!                      "dpMap": { "temperature": 1 }, "options": {} } }
//! ```
//!
//! Validation is meant to run before release: a fingerprint pointing at a
//! missing profile is a defect in the data, not something to recover from at
//! runtime.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde::Serialize;

use dpbridge_core::{ConfigurationError, EngineConfig, Error, Result};

use crate::datapoint::DatapointId;
use crate::registry::{Fingerprint, Profile, Registry};
use crate::traits::TraitLibrary;

/// Non-fatal findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationWarning {
    /// Two keys of one profile share a datapoint id.
    SharedDatapoint {
        profile: String,
        dp: DatapointId,
        keys: Vec<String>,
    },
    /// The same fingerprint is listed twice for the same profile.
    RepeatedFingerprint { manufacturer: String, model: String },
    /// No fingerprint references the profile.
    UnusedProfile { profile: String },
    /// A fingerprint lists no endpoints; endpoint 1 is assumed.
    NoEndpoints { manufacturer: String, model: String },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedDatapoint { profile, dp, keys } => write!(
                f,
                "profile '{}' maps dp {} under several keys: {}",
                profile,
                dp,
                keys.join(", ")
            ),
            Self::RepeatedFingerprint {
                manufacturer,
                model,
            } => write!(f, "fingerprint {}/{} listed more than once", manufacturer, model),
            Self::UnusedProfile { profile } => {
                write!(f, "profile '{}' is not referenced by any fingerprint", profile)
            }
            Self::NoEndpoints {
                manufacturer,
                model,
            } => write!(f, "fingerprint {}/{} lists no endpoints", manufacturer, model),
        }
    }
}

/// Outcome of [`Catalog::validate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<ConfigurationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// First error, for callers that only need pass/fail.
    pub fn into_result(self) -> std::result::Result<Vec<ValidationWarning>, ConfigurationError> {
        match self.errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(self.warnings),
        }
    }
}

/// Both declarative artifacts, as loaded from disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub fingerprints: Vec<Fingerprint>,
    /// Sorted by id so validation output is stable.
    pub profiles: BTreeMap<String, Profile>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(fingerprints_path: impl AsRef<Path>, profiles_path: impl AsRef<Path>) -> Result<Self> {
        let fingerprints = read_file(fingerprints_path.as_ref())?;
        let profiles = read_file(profiles_path.as_ref())?;
        let catalog = Self::from_json(&fingerprints, &profiles)?;
        tracing::info!(
            fingerprints = catalog.fingerprints.len(),
            profiles = catalog.profiles.len(),
            "Loaded catalog"
        );
        Ok(catalog)
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::load(&config.fingerprints_path, &config.profiles_path)
    }

    pub fn from_json(fingerprints: &str, profiles: &str) -> Result<Self> {
        let fingerprints: Vec<Fingerprint> = serde_json::from_str(fingerprints)?;
        let mut profiles: BTreeMap<String, Profile> = serde_json::from_str(profiles)?;
        for (id, profile) in profiles.iter_mut() {
            profile.id = id.clone();
        }
        Ok(Self {
            fingerprints,
            profiles,
        })
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profiles.insert(profile.id.clone(), profile);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprints.push(fingerprint);
        self
    }

    /// Check every cross-reference the engine relies on.
    pub fn validate(&self, traits: &TraitLibrary) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.validate_fingerprints(&mut report);
        for profile in self.profiles.values() {
            validate_profile(profile, traits, &mut report);
        }
        for id in self.profiles.keys() {
            if !self.fingerprints.iter().any(|f| &f.profile == id) {
                report
                    .warnings
                    .push(ValidationWarning::UnusedProfile { profile: id.clone() });
            }
        }
        report
    }

    fn validate_fingerprints(&self, report: &mut ValidationReport) {
        let mut seen: HashMap<(&str, &str), &str> = HashMap::new();
        for fp in &self.fingerprints {
            if !self.profiles.contains_key(&fp.profile) {
                report.errors.push(ConfigurationError::UnknownProfile {
                    profile: fp.profile.clone(),
                    manufacturer: fp.manufacturer_name.clone(),
                    model: fp.model_id.clone(),
                });
            }
            if fp.endpoints.is_empty() {
                report.warnings.push(ValidationWarning::NoEndpoints {
                    manufacturer: fp.manufacturer_name.clone(),
                    model: fp.model_id.clone(),
                });
            }
            let key = (fp.manufacturer_name.as_str(), fp.model_id.as_str());
            match seen.get(&key) {
                Some(existing) if *existing == fp.profile => {
                    report.warnings.push(ValidationWarning::RepeatedFingerprint {
                        manufacturer: fp.manufacturer_name.clone(),
                        model: fp.model_id.clone(),
                    });
                }
                Some(existing) => {
                    report.errors.push(ConfigurationError::DuplicateFingerprint {
                        manufacturer: fp.manufacturer_name.clone(),
                        model: fp.model_id.clone(),
                        existing: existing.to_string(),
                        requested: fp.profile.clone(),
                    });
                }
                None => {
                    seen.insert(key, &fp.profile);
                }
            }
        }
    }

    /// Build a registry; duplicate fingerprints abort with an error.
    pub async fn into_registry(self) -> Result<Registry> {
        let registry = Registry::new();
        for profile in self.profiles.into_values() {
            registry.register_profile(profile).await?;
        }
        for fingerprint in self.fingerprints {
            registry.register_fingerprint(fingerprint).await?;
        }
        Ok(registry)
    }
}

fn validate_profile(profile: &Profile, traits: &TraitLibrary, report: &mut ValidationReport) {
    if let Err(e) = profile.check() {
        report.errors.push(e);
        return;
    }

    for capability in traits.missing_traits(profile) {
        report.errors.push(ConfigurationError::MissingTrait {
            profile: profile.id.clone(),
            capability,
        });
    }

    let owned = traits.owned_keys(profile);
    for key in profile.dp_map.keys().filter(|k| !owned.contains(*k)) {
        report.errors.push(ConfigurationError::UnknownDatapointKey {
            profile: profile.id.clone(),
            key: key.clone(),
        });
    }

    for key in profile.dp_map.keys() {
        if let Err(e) = profile.options.converter(key) {
            report.errors.push(e);
        }
    }

    let mut by_dp: BTreeMap<DatapointId, Vec<String>> = BTreeMap::new();
    for (key, dp) in &profile.dp_map {
        by_dp.entry(*dp).or_default().push(key.clone());
    }
    for (dp, keys) in by_dp.into_iter().filter(|(_, keys)| keys.len() > 1) {
        report.warnings.push(ValidationWarning::SharedDatapoint {
            profile: profile.id.clone(),
            dp,
            keys,
        });
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FINGERPRINTS: &str = r#"[
        {"manufacturerName": "_TZE200_abcdefgh", "modelId": "TS0601", "endpoints": [1], "profile": "climate_basic"}
    ]"#;

    const PROFILES: &str = r#"{
        "climate_basic": {
            "capabilities": ["measure_temperature", "measure_humidity"],
            "dpMap": {"temperature": 1, "humidity": 2},
            "options": {}
        }
    }"#;

    #[test]
    fn test_from_json_sets_ids() {
        let catalog = Catalog::from_json(FINGERPRINTS, PROFILES).unwrap();
        assert_eq!(catalog.profiles["climate_basic"].id, "climate_basic");
        assert!(catalog.validate(&TraitLibrary::with_defaults()).is_ok());
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let fp_path = dir.path().join("fingerprints.json");
        let pr_path = dir.path().join("profiles.json");
        std::fs::File::create(&fp_path)
            .unwrap()
            .write_all(FINGERPRINTS.as_bytes())
            .unwrap();
        std::fs::File::create(&pr_path)
            .unwrap()
            .write_all(PROFILES.as_bytes())
            .unwrap();

        let catalog = Catalog::load(&fp_path, &pr_path).unwrap();
        assert_eq!(catalog.fingerprints.len(), 1);

        let missing = Catalog::load(dir.path().join("nope.json"), &pr_path).unwrap_err();
        assert!(missing.to_string().contains("nope.json"));
    }

    #[test]
    fn test_validation_findings() {
        let catalog = Catalog::new()
            .with_profile(
                Profile::new("a", ["measure_temperature", "speaker_playing"])
                    .with_datapoint("temperature", 1)
                    .with_datapoint("measure_temperature", 1)
                    .with_datapoint("brightness", 4),
            )
            .with_profile(Profile::new("lonely", ["onoff"]).with_datapoint("onoff", 1))
            .with_fingerprint(Fingerprint::new("Acme", "X", "a"))
            .with_fingerprint(Fingerprint::new("Acme", "X", "a"))
            .with_fingerprint(Fingerprint::new("Acme", "X", "b"))
            .with_fingerprint(Fingerprint::new("Acme", "Y", "ghost"));

        let report = catalog.validate(&TraitLibrary::with_defaults());
        assert!(!report.is_ok());

        let errors = &report.errors;
        assert!(errors.iter().any(|e| matches!(e, ConfigurationError::MissingTrait { capability, .. } if capability == "speaker_playing")));
        assert!(errors.iter().any(|e| matches!(e, ConfigurationError::UnknownDatapointKey { key, .. } if key == "brightness")));
        assert!(errors.iter().any(|e| matches!(e, ConfigurationError::DuplicateFingerprint { requested, .. } if requested == "b")));
        assert!(errors.iter().any(|e| matches!(e, ConfigurationError::UnknownProfile { profile, .. } if profile == "ghost")));

        assert!(report.warnings.contains(&ValidationWarning::SharedDatapoint {
            profile: "a".to_string(),
            dp: 1,
            keys: vec!["measure_temperature".to_string(), "temperature".to_string()],
        }));
        assert!(report.warnings.contains(&ValidationWarning::RepeatedFingerprint {
            manufacturer: "Acme".to_string(),
            model: "X".to_string(),
        }));
        assert!(report.warnings.contains(&ValidationWarning::UnusedProfile {
            profile: "lonely".to_string(),
        }));
    }

    #[test]
    fn test_invalid_converter_option() {
        let profiles = r#"{
            "p": {
                "capabilities": ["measure_temperature"],
                "dpMap": {"temperature": 1},
                "options": {"converters": {"temperature": {"kind": "range", "raw_max": 0, "max": 1}}}
            }
        }"#;
        let catalog = Catalog::from_json("[]", profiles).unwrap();
        let report = catalog.validate(&TraitLibrary::with_defaults());
        assert!(matches!(
            report.errors.as_slice(),
            [ConfigurationError::InvalidOption { .. }]
        ));
    }

    #[tokio::test]
    async fn test_into_registry_rejects_duplicates() {
        let catalog = Catalog::from_json(FINGERPRINTS, PROFILES)
            .unwrap()
            .with_fingerprint(Fingerprint::new("_TZE200_abcdefgh", "TS0601", "other"));
        let err = catalog.into_registry().await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_into_registry() {
        let registry = Catalog::from_json(FINGERPRINTS, PROFILES)
            .unwrap()
            .into_registry()
            .await
            .unwrap();
        assert_eq!(registry.fingerprint_count().await, 1);
        assert_eq!(registry.profile_count().await, 1);
    }
}
