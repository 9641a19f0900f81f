use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::version::Version;

// ---------------------------------------------------------------------------
// Property bags
// ---------------------------------------------------------------------------

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    Array(Vec<PropertyValue>),
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Long(n)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Boolean(b)
    }
}

/// Configuration properties, kept sorted by key.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

// ---------------------------------------------------------------------------
// ResourceKind / ResourcePayload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Module,
    Config,
}

impl ResourceKind {
    /// Prefix used for entity ids of this kind.
    pub fn entity_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Module => "module",
            ResourceKind::Config => "config",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity_prefix())
    }
}

/// Kind-specific data carried by a registered resource.
///
/// Module bytes are not held here: they live in the staging area under the
/// resource digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourcePayload {
    Module {
        symbolic_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_level: Option<u32>,
    },
    Config {
        pid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        factory_pid: Option<String>,
        #[serde(default)]
        properties: PropertyMap,
    },
}

impl ResourcePayload {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourcePayload::Module { .. } => ResourceKind::Module,
            ResourcePayload::Config { .. } => ResourceKind::Config,
        }
    }
}

// ---------------------------------------------------------------------------
// RegisteredResource
// ---------------------------------------------------------------------------

/// One candidate resource claiming an entity identity.
///
/// Values are never mutated once registered; a lifecycle change produces a
/// new value (`with_installable`) that replaces the old one in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredResource {
    pub(crate) url: String,
    pub(crate) scheme: String,
    pub(crate) entity_id: String,
    pub(crate) digest: String,
    #[serde(default)]
    pub(crate) priority: i32,
    #[serde(default)]
    pub(crate) version: Version,
    #[serde(default)]
    pub(crate) serial: u64,
    #[serde(default = "default_installable")]
    pub(crate) installable: bool,
    pub(crate) payload: ResourcePayload,
}

fn default_installable() -> bool {
    true
}

impl RegisteredResource {
    /// Build a resource registered by `scheme` under provider-local `id`.
    pub fn new(
        scheme: &str,
        id: &str,
        entity_id: &str,
        digest: &str,
        priority: i32,
        version: Version,
        payload: ResourcePayload,
    ) -> Self {
        RegisteredResource {
            url: format!("{}:{}", scheme, id),
            scheme: scheme.to_string(),
            entity_id: entity_id.to_string(),
            digest: digest.to_string(),
            priority,
            version,
            serial: 0,
            installable: true,
            payload,
        }
    }

    /// Copy with the given registration serial number.
    pub fn with_serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    /// Copy with a different installable flag.
    pub fn with_installable(&self, installable: bool) -> Self {
        let mut copy = self.clone();
        copy.installable = installable;
        copy
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn installable(&self) -> bool {
        self.installable
    }

    pub fn payload(&self) -> &ResourcePayload {
        &self.payload
    }

    pub fn kind(&self) -> ResourceKind {
        self.payload.kind()
    }

    /// Declared start level for modules; `None` for configs or when undeclared.
    pub fn start_level(&self) -> Option<u32> {
        match &self.payload {
            ResourcePayload::Module { start_level, .. } => *start_level,
            ResourcePayload::Config { .. } => None,
        }
    }
}

impl fmt::Display for RegisteredResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RegisteredResource(url={}, entity={}, version={}, digest={}, installable={})",
            self.url, self.entity_id, self.version, self.digest, self.installable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(digest: &str) -> RegisteredResource {
        RegisteredResource::new(
            "file",
            "mods/a.jar",
            "module:a",
            digest,
            10,
            Version::new(1, 0, 0),
            ResourcePayload::Module {
                symbolic_name: "a".into(),
                start_level: Some(5),
            },
        )
    }

    #[test]
    fn url_joins_scheme_and_id() {
        let r = module("d1");
        assert_eq!(r.url(), "file:mods/a.jar");
        assert_eq!(r.scheme(), "file");
        assert_eq!(r.kind(), ResourceKind::Module);
        assert_eq!(r.start_level(), Some(5));
        assert!(r.installable());
    }

    #[test]
    fn with_installable_leaves_original_untouched() {
        let r = module("d1");
        let pending = r.with_installable(false);
        assert!(r.installable());
        assert!(!pending.installable());
        assert_eq!(r.digest(), pending.digest());
        assert_eq!(r.serial(), pending.serial());
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let payload = ResourcePayload::Config {
            pid: "my.pid".into(),
            factory_pid: None,
            properties: PropertyMap::from([("port".to_string(), PropertyValue::Long(8080))]),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "config");
        assert_eq!(json["properties"]["port"], 8080);
    }

    #[test]
    fn unknown_fields_are_ignored_on_load() {
        let json = r#"{
            "url": "file:a.jar", "scheme": "file", "entity_id": "module:a",
            "digest": "d1", "priority": 1, "version": "1.0.0", "serial": 7,
            "installable": true, "future_field": [1, 2, 3],
            "payload": {"kind": "module", "symbolic_name": "a"}
        }"#;
        let r: RegisteredResource = serde_json::from_str(json).unwrap();
        assert_eq!(r.serial(), 7);
        assert_eq!(r.start_level(), None);
    }
}
