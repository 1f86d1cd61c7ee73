//! Annotation and label keys recognized on package objects.
//!
//! These strings are a compatibility surface shared with the cluster-side
//! controllers and must not change.

/// Assigns an object to a phase by name.
pub const PHASE_ANNOTATION: &str = "package-operator.run/phase";

/// Maps object conditions back into package conditions,
/// e.g. `Available => my-own-prefix/Available`.
pub const CONDITION_MAP_ANNOTATION: &str = "package-operator.run/condition-map";

/// When `"True"`, the object is only observed during its phase, never applied.
pub const EXTERNAL_OBJECT_ANNOTATION: &str = "package-operator.run/external";

/// Name of the package from the manifest.
pub const PACKAGE_LABEL: &str = "package-operator.run/package";

/// Package container image the object originates from.
pub const PACKAGE_SOURCE_IMAGE_ANNOTATION: &str = "package-operator.run/package-source-image";

/// Configuration the object was rendered with.
pub const PACKAGE_CONFIG_ANNOTATION: &str = "package-operator.run/package-config";

/// Name of the package instance.
pub const PACKAGE_INSTANCE_LABEL: &str = "package-operator.run/instance";

/// One `source => target` line of a condition-map annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionMapping {
    pub source: String,
    pub target: String,
}

/// Parse a condition-map annotation value. Blank lines are skipped; lines
/// without `=>` or with an empty side are rejected.
pub fn parse_condition_map(value: &str) -> Result<Vec<ConditionMapping>, String> {
    let mut out = Vec::new();
    for line in value.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((source, target)) = line.split_once("=>") else {
            return Err(format!("condition-map line '{line}' is missing '=>'"));
        };
        let (source, target) = (source.trim(), target.trim());
        if source.is_empty() || target.is_empty() {
            return Err(format!("condition-map line '{line}' has an empty side"));
        }
        out.push(ConditionMapping {
            source: source.to_owned(),
            target: target.to_owned(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_verbatim() {
        assert_eq!(PHASE_ANNOTATION, "package-operator.run/phase");
        assert_eq!(PACKAGE_INSTANCE_LABEL, "package-operator.run/instance");
        assert_eq!(
            PACKAGE_SOURCE_IMAGE_ANNOTATION,
            "package-operator.run/package-source-image"
        );
    }

    #[test]
    fn condition_map_parses_lines() {
        let parsed = parse_condition_map("Available => acme.io/Available\n\nReady=>acme.io/Ready\n")
            .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].source, "Available");
        assert_eq!(parsed[1].target, "acme.io/Ready");
    }

    #[test]
    fn condition_map_rejects_garbage() {
        assert!(parse_condition_map("Available").is_err());
        assert!(parse_condition_map(" => x").is_err());
    }
}
