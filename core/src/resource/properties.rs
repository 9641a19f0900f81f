//! Resource type detection and config payload parsing.

use crate::error::{InstallerError, Result};
use crate::types::resource::{PropertyMap, PropertyValue, ResourceKind};

const MODULE_EXTENSIONS: &[&str] = &["jar"];
const CONFIG_EXTENSIONS: &[&str] = &["cfg", "config", "properties", "json"];

/// Extension of the last path segment, lowercased, if any.
pub fn extension(id: &str) -> Option<String> {
    let name = id.rsplit('/').next().unwrap_or(id);
    let dot = name.rfind('.')?;
    if dot == 0 || dot + 1 == name.len() {
        return None;
    }
    Some(name[dot + 1..].to_ascii_lowercase())
}

pub fn is_config_extension(ext: &str) -> bool {
    CONFIG_EXTENSIONS.contains(&ext)
}

/// Derive the resource kind from the id's extension.
pub fn detect_kind(id: &str) -> Result<ResourceKind> {
    match extension(id) {
        Some(ext) if MODULE_EXTENSIONS.contains(&ext.as_str()) => Ok(ResourceKind::Module),
        Some(ext) if is_config_extension(&ext) => Ok(ResourceKind::Config),
        Some(ext) => Err(InstallerError::UnsupportedType {
            id: id.to_string(),
            reason: format!("unknown extension '{}'", ext),
        }),
        None => Err(InstallerError::UnsupportedType {
            id: id.to_string(),
            reason: "no extension and no declared kind".into(),
        }),
    }
}

/// Split a config id into `(factory_pid, pid)`.
///
/// The path is dropped, a config extension is stripped, and a `-` after the
/// first character separates a factory pid from its alias:
/// `conf/org.foo.Factory-main.cfg` is `(Some("org.foo.Factory"), "main")`.
pub fn config_identity(id: &str) -> (Option<String>, String) {
    let mut pid = id.rsplit('/').next().unwrap_or(id);
    if let Some(ext) = extension(pid) {
        if is_config_extension(&ext) {
            if let Some(dot) = pid.rfind('.') {
                pid = &pid[..dot];
            }
        }
    }
    match pid.find('-') {
        Some(n) if n > 0 => (Some(pid[..n].to_string()), pid[n + 1..].to_string()),
        _ => (None, pid.to_string()),
    }
}

/// Entity id of a config: `config:<factory>.<pid>` or `config:<pid>`.
pub fn config_entity(factory_pid: Option<&str>, pid: &str) -> String {
    match factory_pid {
        Some(f) => format!("{}:{}.{}", ResourceKind::Config.entity_prefix(), f, pid),
        None => format!("{}:{}", ResourceKind::Config.entity_prefix(), pid),
    }
}

/// Parse a config payload according to the id's extension.
///
/// `.json` must be a flat object; everything else is read as `key=value`
/// lines.
pub fn parse_config(id: &str, bytes: &[u8]) -> Result<PropertyMap> {
    let malformed = |reason: String| InstallerError::MalformedConfig {
        id: id.to_string(),
        reason,
    };
    let text = std::str::from_utf8(bytes).map_err(|e| malformed(e.to_string()))?;
    match extension(id).as_deref() {
        Some("json") => parse_json(text).map_err(malformed),
        _ => parse_key_values(text).map_err(malformed),
    }
}

fn parse_key_values(text: &str) -> std::result::Result<PropertyMap, String> {
    let mut map = PropertyMap::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let sep = line
            .find(|c: char| c == '=' || c == ':')
            .ok_or_else(|| format!("line {}: expected key=value", lineno + 1))?;
        let key = line[..sep].trim();
        if key.is_empty() {
            return Err(format!("line {}: empty key", lineno + 1));
        }
        map.insert(key.to_string(), typed_value(line[sep + 1..].trim()));
    }
    Ok(map)
}

fn typed_value(raw: &str) -> PropertyValue {
    if raw.eq_ignore_ascii_case("true") {
        return PropertyValue::Boolean(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return PropertyValue::Boolean(false);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return PropertyValue::Long(n);
    }
    PropertyValue::String(raw.to_string())
}

fn parse_json(text: &str) -> std::result::Result<PropertyMap, String> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let object = value
        .as_object()
        .ok_or_else(|| "expected a JSON object".to_string())?;
    let mut map = PropertyMap::new();
    for (key, v) in object {
        map.insert(key.clone(), json_value(key, v)?);
    }
    Ok(map)
}

fn json_value(key: &str, v: &serde_json::Value) -> std::result::Result<PropertyValue, String> {
    use serde_json::Value;
    match v {
        Value::Bool(b) => Ok(PropertyValue::Boolean(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(PropertyValue::Long(i)),
            None => n
                .as_f64()
                .map(PropertyValue::Double)
                .ok_or_else(|| format!("'{}': number out of range", key)),
        },
        Value::String(s) => Ok(PropertyValue::String(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(|i| match i {
                Value::Array(_) | Value::Object(_) => {
                    Err(format!("'{}': nested values are not supported", key))
                }
                other => json_value(key, other),
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(PropertyValue::Array),
        Value::Null | Value::Object(_) => {
            Err(format!("'{}': null and nested objects are not supported", key))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_kind_from_extension() {
        assert_eq!(detect_kind("mods/a.jar").unwrap(), ResourceKind::Module);
        assert_eq!(detect_kind("a.JAR").unwrap(), ResourceKind::Module);
        assert_eq!(detect_kind("conf/x.cfg").unwrap(), ResourceKind::Config);
        assert_eq!(detect_kind("x.properties").unwrap(), ResourceKind::Config);
        assert_eq!(detect_kind("x.json").unwrap(), ResourceKind::Config);
        assert!(detect_kind("x.zip").is_err());
        assert!(detect_kind("noext").is_err());
        assert!(detect_kind("dir.d/noext").is_err());
    }

    #[test]
    fn config_identity_strips_path_and_extension() {
        assert_eq!(config_identity("conf/my.pid.cfg"), (None, "my.pid".into()));
        assert_eq!(
            config_identity("conf/org.foo.Factory-main.cfg"),
            (Some("org.foo.Factory".into()), "main".into())
        );
        // Unknown extensions are part of the pid.
        assert_eq!(config_identity("a.b.c"), (None, "a.b.c".into()));
        // A leading dash is not a factory separator.
        assert_eq!(config_identity("-x.cfg"), (None, "-x".into()));
    }

    #[test]
    fn config_entity_format() {
        assert_eq!(config_entity(None, "p"), "config:p");
        assert_eq!(config_entity(Some("f"), "p"), "config:f.p");
    }

    #[test]
    fn parses_key_value_lines() {
        let text = b"# comment\n! other\nport = 8080\nenabled=true\nname: svc\n\n";
        let map = parse_config("svc.cfg", text).unwrap();
        assert_eq!(map["port"], PropertyValue::Long(8080));
        assert_eq!(map["enabled"], PropertyValue::Boolean(true));
        assert_eq!(map["name"], PropertyValue::String("svc".into()));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn rejects_lines_without_separator() {
        let err = parse_config("svc.cfg", b"just words\n").unwrap_err();
        assert!(matches!(err, InstallerError::MalformedConfig { .. }));
    }

    #[test]
    fn parses_flat_json() {
        let map = parse_config(
            "svc.json",
            br#"{"port": 8080, "ratio": 0.5, "tags": ["a", "b"], "on": false}"#,
        )
        .unwrap();
        assert_eq!(map["port"], PropertyValue::Long(8080));
        assert_eq!(map["ratio"], PropertyValue::Double(0.5));
        assert_eq!(
            map["tags"],
            PropertyValue::Array(vec!["a".into(), "b".into()])
        );
        assert_eq!(map["on"], PropertyValue::Boolean(false));
    }

    #[test]
    fn rejects_nested_json() {
        assert!(parse_config("svc.json", br#"{"a": {"b": 1}}"#).is_err());
        assert!(parse_config("svc.json", b"[1, 2]").is_err());
        assert!(parse_config("svc.json", b"{not json").is_err());
    }
}
