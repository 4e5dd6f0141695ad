//! The build signature: the top-level cache key of one project build.
//!
//! A hex SHA-256 over the ordered concatenation of everything that shapes
//! the build besides the resource contents themselves: schema version,
//! project identity, configuration, dependency and extension identities,
//! and the toolchain version. JSON is canonicalised with recursively sorted
//! keys so map ordering can never leak into the signature.

use crate::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uibuild_core::BuildConfiguration;

/// Schema-version literal; bump to invalidate every recorded build.
pub const SCHEMA_VERSION: &str = "uibuild-cache:1";

/// Everything the build signature is composed from, in order.
#[derive(Debug, Clone)]
pub struct BuildSignatureInputs<'a> {
    pub project_id: &'a str,
    pub project_version: &'a str,
    pub configuration: &'a BuildConfiguration,
    /// Ordered `(id, version)` pairs of the project's dependencies.
    pub dependencies: &'a [(String, String)],
    /// Ordered `(id, version)` pairs of custom extensions.
    pub extensions: &'a [(String, String)],
    pub tool_version: &'a str,
    /// Optional concatenated lockfile hash.
    pub lockfile_hash: Option<&'a str>,
}

/// Serialise any value as canonical JSON with recursively sorted keys.
pub fn stable_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)
        .map_err(|e| crate::Error::Corruption(format!("stable_json: {e}")))?;
    let mut out = String::new();
    write_canonical(&value, &mut out);
    Ok(out)
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            // BTreeMap iteration sorts the keys; rebuild explicitly so the
            // behaviour survives a `preserve_order` feature somewhere in
            // the dependency graph.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Compute the build signature.
pub fn compute_build_signature(inputs: &BuildSignatureInputs<'_>) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut feed = |part: &str| {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    };
    feed(SCHEMA_VERSION);
    feed(inputs.project_id);
    feed(inputs.project_version);
    feed(&stable_json(inputs.configuration)?);
    feed(&stable_json(&inputs.dependencies)?);
    feed(&stable_json(&inputs.extensions)?);
    feed(inputs.tool_version);
    if let Some(lockfile) = inputs.lockfile_hash {
        feed(lockfile);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn base_inputs<'a>(
        configuration: &'a BuildConfiguration,
        dependencies: &'a [(String, String)],
    ) -> BuildSignatureInputs<'a> {
        BuildSignatureInputs {
            project_id: "my.app",
            project_version: "1.2.3",
            configuration,
            dependencies,
            extensions: &[],
            tool_version: "0.3.1",
            lockfile_hash: None,
        }
    }

    #[test]
    fn signature_is_stable() {
        let config = BuildConfiguration::default();
        let deps = vec![("my.lib".to_string(), "2.0.0".to_string())];
        let inputs = base_inputs(&config, &deps);
        let first = compute_build_signature(&inputs).unwrap();
        let second = compute_build_signature(&inputs).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn every_component_changes_the_signature() {
        let config = BuildConfiguration::default();
        let deps = vec![("my.lib".to_string(), "2.0.0".to_string())];
        let base = compute_build_signature(&base_inputs(&config, &deps)).unwrap();

        let mut inputs = base_inputs(&config, &deps);
        inputs.project_version = "1.2.4";
        assert_ne!(compute_build_signature(&inputs).unwrap(), base);

        let mut changed_config = config.clone();
        changed_config.include_dependencies = true;
        let inputs = base_inputs(&changed_config, &deps);
        assert_ne!(compute_build_signature(&inputs).unwrap(), base);

        let bumped = vec![("my.lib".to_string(), "2.0.1".to_string())];
        let inputs = base_inputs(&config, &bumped);
        assert_ne!(compute_build_signature(&inputs).unwrap(), base);

        let mut inputs = base_inputs(&config, &deps);
        inputs.tool_version = "0.4.0";
        assert_ne!(compute_build_signature(&inputs).unwrap(), base);

        let mut inputs = base_inputs(&config, &deps);
        inputs.lockfile_hash = Some("abc");
        assert_ne!(compute_build_signature(&inputs).unwrap(), base);
    }

    #[test]
    fn dependency_order_matters() {
        let config = BuildConfiguration::default();
        let forward = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "1".to_string()),
        ];
        let backward = vec![
            ("b".to_string(), "1".to_string()),
            ("a".to_string(), "1".to_string()),
        ];
        assert_ne!(
            compute_build_signature(&base_inputs(&config, &forward)).unwrap(),
            compute_build_signature(&base_inputs(&config, &backward)).unwrap()
        );
    }

    #[test]
    fn stable_json_sorts_keys_recursively() {
        let mut inner = BTreeMap::new();
        inner.insert("zz", 1);
        inner.insert("aa", 2);
        let value = serde_json::json!({
            "outerB": inner,
            "outerA": [ {"y": 1, "x": 2} ],
        });
        assert_eq!(
            stable_json(&value).unwrap(),
            r#"{"outerA":[{"x":2,"y":1}],"outerB":{"aa":2,"zz":1}}"#
        );
    }
}
