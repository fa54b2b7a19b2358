use std::collections::BTreeMap;
use std::sync::OnceLock;

use anyhow::{anyhow, Result};

/// Allow-list and rename table from raw class id to output label.
pub type ClassMap = BTreeMap<u32, String>;

/// Per-detector settings the cascade needs at request time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectorConfig {
    pub name: String,
    /// `None`: emit every class under the detector's native label.
    pub class_map: Option<ClassMap>,
}

impl DetectorConfig {
    /// Config that passes every class through under its native label.
    pub fn pass_through(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_map: None,
        }
    }

    pub fn with_class_map(name: impl Into<String>, class_map: ClassMap) -> Self {
        Self {
            name: name.into(),
            class_map: Some(class_map),
        }
    }

    /// Output label for `class_id`, or `None` if the detection must be dropped.
    pub fn resolve(&self, class_id: u32, native_label: &str) -> Option<String> {
        match &self.class_map {
            None => Some(native_label.to_string()),
            Some(map) => map.get(&class_id).cloned(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_detector_name(&self.name)?;
        if let Some(map) = &self.class_map {
            for (class_id, label) in map {
                if label.trim().is_empty() {
                    return Err(anyhow!(
                        "detector '{}': class {} maps to an empty label",
                        self.name,
                        class_id
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Detector names: 1..64 of `[a-z0-9_-]`.
pub fn validate_detector_name(name: &str) -> Result<()> {
    static NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9_-]{1,64}$").expect("detector name pattern is valid")
    });
    if !re.is_match(name) {
        return Err(anyhow!(
            "detector name '{}' must match ^[a-z0-9_-]{{1,64}}$",
            name
        ));
    }
    Ok(())
}

/// Parse a class map whose keys are decimal class ids in string form (TOML tables).
pub fn parse_class_map(detector: &str, raw: &BTreeMap<String, String>) -> Result<ClassMap> {
    let mut map = ClassMap::new();
    for (key, label) in raw {
        let class_id: u32 = key.trim().parse().map_err(|_| {
            anyhow!(
                "detector '{}': class map key '{}' is not a class id",
                detector,
                key
            )
        })?;
        if map.insert(class_id, label.trim().to_string()).is_some() {
            return Err(anyhow!(
                "detector '{}': class id {} mapped twice",
                detector,
                class_id
            ));
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_only() -> DetectorConfig {
        DetectorConfig::with_class_map("person", ClassMap::from([(0, "Person".to_string())]))
    }

    #[test]
    fn pass_through_uses_native_label() {
        let cfg = DetectorConfig::pass_through("ppe");
        assert_eq!(cfg.resolve(3, "hardhat"), Some("hardhat".to_string()));
        assert_eq!(cfg.resolve(999, ""), Some(String::new()));
    }

    #[test]
    fn mapped_class_ignores_native_label() {
        let cfg = person_only();
        assert_eq!(cfg.resolve(0, "human"), Some("Person".to_string()));
        assert_eq!(cfg.resolve(0, "anything"), Some("Person".to_string()));
    }

    #[test]
    fn unmapped_class_is_dropped() {
        let cfg = person_only();
        assert_eq!(cfg.resolve(1, "bicycle"), None);
        assert_eq!(cfg.resolve(2, "Person"), None);
    }

    #[test]
    fn empty_class_map_drops_everything() {
        let cfg = DetectorConfig::with_class_map("none", ClassMap::new());
        assert_eq!(cfg.resolve(0, "person"), None);
    }

    #[test]
    fn validation_rejects_bad_names_and_labels() {
        assert!(DetectorConfig::pass_through("ppe-v2_b").validate().is_ok());
        assert!(DetectorConfig::pass_through("PPE").validate().is_err());
        assert!(DetectorConfig::pass_through("").validate().is_err());
        assert!(DetectorConfig::pass_through("a b").validate().is_err());
        let blank = DetectorConfig::with_class_map("glove", ClassMap::from([(0, "  ".to_string())]));
        assert!(blank.validate().is_err());
    }

    #[test]
    fn parses_string_keyed_class_map() -> Result<()> {
        let raw = BTreeMap::from([
            ("0".to_string(), " person ".to_string()),
            ("17".to_string(), "vest".to_string()),
        ]);
        let map = parse_class_map("ppe", &raw)?;
        assert_eq!(map.get(&0).map(String::as_str), Some("person"));
        assert_eq!(map.get(&17).map(String::as_str), Some("vest"));

        let bad = BTreeMap::from([("zero".to_string(), "person".to_string())]);
        assert!(parse_class_map("ppe", &bad).is_err());

        let dup = BTreeMap::from([
            ("1".to_string(), "a".to_string()),
            ("01".to_string(), "b".to_string()),
        ]);
        assert!(parse_class_map("ppe", &dup).is_err());
        Ok(())
    }
}
