//! Template registry.
//!
//! A template is a named edit: an ordered sequence of clip slots, a duration
//! per slot, clip-count requirements and an optional music bed. The registry is
//! built in, or loaded from a JSON document when `TEMPLATE_REGISTRY_PATH` is set.

use std::collections::HashSet;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable pointing at a JSON registry document.
pub const TEMPLATE_REGISTRY_PATH_ENV: &str = "TEMPLATE_REGISTRY_PATH";

/// One position in a template's clip sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClipSlot {
    /// The geographic flyover clip
    Flyover,
    /// Photo clip slot; maps to clip `i % clip_count`
    Photo(usize),
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Unknown template: {0}")]
    Unknown(String),

    #[error("Invalid template '{name}': {reason}")]
    Invalid { name: String, reason: String },

    #[error("Failed to load template registry: {0}")]
    Load(String),
}

/// Why a template cannot run for a given job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequirementViolation {
    #[error("requires at least {required} clips, got {actual}")]
    TooFewClips { required: usize, actual: usize },

    #[error("accepts at most {max} clips, got {actual}")]
    TooManyClips { max: usize, actual: usize },

    #[error("requires a flyover but no coordinates are available")]
    MissingFlyover,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sequence: Vec<ClipSlot>,
    /// Seconds per slot, same length as `sequence`
    pub durations: Vec<f64>,
    #[serde(default = "default_min_clips")]
    pub min_clips: usize,
    #[serde(default)]
    pub max_clips: Option<usize>,
    #[serde(default)]
    pub requires_flyover: bool,
    /// Music bed file name, resolved under the worker's music directory
    #[serde(default)]
    pub music: Option<String>,
}

fn default_min_clips() -> usize {
    1
}

impl TemplateDefinition {
    /// Whether any slot uses the flyover clip.
    pub fn uses_flyover(&self) -> bool {
        self.sequence.iter().any(|s| matches!(s, ClipSlot::Flyover))
    }

    /// Total running time in seconds.
    pub fn total_duration(&self) -> f64 {
        self.durations.iter().sum()
    }

    pub fn check_requirements(
        &self,
        clip_count: usize,
        has_coordinates: bool,
    ) -> Result<(), RequirementViolation> {
        if clip_count < self.min_clips {
            return Err(RequirementViolation::TooFewClips {
                required: self.min_clips,
                actual: clip_count,
            });
        }
        if let Some(max) = self.max_clips {
            if clip_count > max {
                return Err(RequirementViolation::TooManyClips {
                    max,
                    actual: clip_count,
                });
            }
        }
        if self.requires_flyover && !has_coordinates {
            return Err(RequirementViolation::MissingFlyover);
        }
        Ok(())
    }

    /// Map the slot sequence onto concrete sources.
    ///
    /// Photo slot `i` takes `photo_clips[i % len]`. A flyover slot takes the
    /// flyover clip, or is dropped when there is none and the template does not
    /// require it. Fewer than `min_clips` photo clips is a violation even when
    /// the slots could wrap around them.
    pub fn resolve<T: Clone>(
        &self,
        photo_clips: &[T],
        flyover: Option<&T>,
    ) -> Result<Vec<(T, f64)>, RequirementViolation> {
        if flyover.is_none() && self.requires_flyover {
            return Err(RequirementViolation::MissingFlyover);
        }
        let has_photo_slots = self.sequence.iter().any(|s| matches!(s, ClipSlot::Photo(_)));
        let required = if has_photo_slots {
            self.min_clips.max(1)
        } else {
            self.min_clips
        };
        if photo_clips.len() < required {
            return Err(RequirementViolation::TooFewClips {
                required,
                actual: photo_clips.len(),
            });
        }

        let mut resolved = Vec::with_capacity(self.sequence.len());
        for (slot, duration) in self.sequence.iter().zip(self.durations.iter()) {
            match slot {
                ClipSlot::Photo(i) => {
                    resolved.push((photo_clips[i % photo_clips.len()].clone(), *duration));
                }
                ClipSlot::Flyover => {
                    if let Some(f) = flyover {
                        resolved.push((f.clone(), *duration));
                    }
                }
            }
        }
        Ok(resolved)
    }

    pub fn validate(&self) -> Result<(), TemplateError> {
        let invalid = |reason: String| TemplateError::Invalid {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("empty name".into()));
        }
        if self.sequence.is_empty() {
            return Err(invalid("empty sequence".into()));
        }
        if self.durations.len() != self.sequence.len() {
            return Err(invalid(format!(
                "{} durations for {} slots",
                self.durations.len(),
                self.sequence.len()
            )));
        }
        if let Some(d) = self.durations.iter().find(|d| !d.is_finite() || **d <= 0.0) {
            return Err(invalid(format!("non-positive duration {}", d)));
        }
        if let Some(max) = self.max_clips {
            if max < self.min_clips {
                return Err(invalid(format!("max_clips {} < min_clips {}", max, self.min_clips)));
            }
        }
        if self.requires_flyover && !self.uses_flyover() {
            return Err(invalid("requires a flyover but has no flyover slot".into()));
        }
        Ok(())
    }
}

/// Named templates plus the set produced when a job names none.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TemplateRegistry {
    templates: Vec<TemplateDefinition>,
    default_set: Vec<String>,
}

impl TemplateRegistry {
    /// Build and validate a registry.
    pub fn new(
        templates: Vec<TemplateDefinition>,
        default_set: Vec<String>,
    ) -> Result<Self, TemplateError> {
        let registry = Self {
            templates,
            default_set,
        };
        registry.validate()?;
        Ok(registry)
    }

    pub fn from_json_str(json: &str) -> Result<Self, TemplateError> {
        let parsed: TemplateRegistry =
            serde_json::from_str(json).map_err(|e| TemplateError::Load(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| TemplateError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Load from `TEMPLATE_REGISTRY_PATH` if set, otherwise the built-in set.
    pub fn from_env() -> Result<Self, TemplateError> {
        match std::env::var(TEMPLATE_REGISTRY_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path),
            _ => Ok(Self::builtin()),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TemplateDefinition> {
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&TemplateDefinition, TemplateError> {
        self.get(name)
            .ok_or_else(|| TemplateError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn default_set(&self) -> &[String] {
        &self.default_set
    }

    pub fn validate(&self) -> Result<(), TemplateError> {
        let mut seen = HashSet::new();
        for template in &self.templates {
            template.validate()?;
            if !seen.insert(template.name.as_str()) {
                return Err(TemplateError::Invalid {
                    name: template.name.clone(),
                    reason: "duplicate name".into(),
                });
            }
        }
        if self.default_set.is_empty() {
            return Err(TemplateError::Load("default set is empty".into()));
        }
        for name in &self.default_set {
            if !seen.contains(name.as_str()) {
                return Err(TemplateError::Unknown(name.clone()));
            }
        }
        Ok(())
    }

    /// Built-in templates.
    pub fn builtin() -> Self {
        use ClipSlot::{Flyover, Photo};

        let photos = |n: usize| (0..n).map(Photo).collect::<Vec<_>>();

        let templates = vec![
            TemplateDefinition {
                name: "crescendo".into(),
                description: "Slow opening that accelerates toward the final shot".into(),
                sequence: photos(6),
                durations: vec![3.0, 2.5, 2.0, 1.5, 1.0, 2.5],
                min_clips: 3,
                max_clips: None,
                requires_flyover: false,
                music: None,
            },
            TemplateDefinition {
                name: "wave".into(),
                description: "Alternating long and short cuts".into(),
                sequence: photos(8),
                durations: vec![2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0],
                min_clips: 2,
                max_clips: None,
                requires_flyover: false,
                music: None,
            },
            TemplateDefinition {
                name: "storyteller".into(),
                description: "Establishing flyover when available, then a slow walkthrough".into(),
                sequence: std::iter::once(Flyover).chain(photos(5)).collect(),
                durations: vec![4.0, 3.5, 3.5, 3.5, 3.5, 3.5],
                min_clips: 3,
                max_clips: None,
                requires_flyover: false,
                music: None,
            },
            TemplateDefinition {
                name: "googlezoomintro".into(),
                description: "Map zoom onto the property followed by highlights".into(),
                sequence: std::iter::once(Flyover).chain(photos(4)).collect(),
                durations: vec![5.0, 2.5, 2.5, 2.5, 2.5],
                min_clips: 2,
                max_clips: None,
                requires_flyover: true,
                music: None,
            },
            TemplateDefinition {
                name: "wesanderson".into(),
                description: "Symmetric, evenly paced frames".into(),
                sequence: photos(5),
                durations: vec![2.5; 5],
                min_clips: 3,
                max_clips: Some(20),
                requires_flyover: false,
                music: None,
            },
            TemplateDefinition {
                name: "hyperpop".into(),
                description: "Rapid-fire cuts".into(),
                sequence: photos(12),
                durations: vec![0.5; 12],
                min_clips: 5,
                max_clips: None,
                requires_flyover: false,
                music: None,
            },
        ];

        Self {
            templates,
            default_set: vec!["crescendo".into(), "wave".into(), "storyteller".into()],
        }
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_is_valid() {
        let registry = TemplateRegistry::builtin();
        registry.validate().unwrap();
        assert_eq!(registry.names().len(), 6);
        assert!(registry.get("googlezoomintro").unwrap().requires_flyover);
        assert!(registry.require("nope").is_err());
    }

    #[test]
    fn test_resolve_wraps_photo_slots() {
        let registry = TemplateRegistry::builtin();
        let crescendo = registry.get("crescendo").unwrap();
        let clips = vec!["a", "b", "c"];

        let resolved = crescendo.resolve(&clips, None).unwrap();
        let sources: Vec<_> = resolved.iter().map(|(s, _)| *s).collect();
        assert_eq!(sources, vec!["a", "b", "c", "a", "b", "c"]);
        assert_eq!(resolved[0].1, 3.0);
    }

    #[test]
    fn test_resolve_rejects_too_few_surviving_clips() {
        let registry = TemplateRegistry::builtin();
        let storyteller = registry.get("storyteller").unwrap();
        assert_eq!(
            storyteller.resolve(&["a", "b"], Some(&"map")),
            Err(RequirementViolation::TooFewClips { required: 3, actual: 2 })
        );
        assert_eq!(
            storyteller.resolve::<&str>(&[], None),
            Err(RequirementViolation::TooFewClips { required: 3, actual: 0 })
        );
    }

    #[test]
    fn test_optional_flyover_slot_skipped() {
        let registry = TemplateRegistry::builtin();
        let storyteller = registry.get("storyteller").unwrap();
        let clips = vec!["a", "b", "c"];

        let without = storyteller.resolve(&clips, None).unwrap();
        assert_eq!(without.len(), 5);
        assert_eq!(without[0].0, "a");

        let with = storyteller.resolve(&clips, Some(&"map")).unwrap();
        assert_eq!(with.len(), 6);
        assert_eq!(with[0], ("map", 4.0));
    }

    #[test]
    fn test_required_flyover_missing() {
        let registry = TemplateRegistry::builtin();
        let intro = registry.get("googlezoomintro").unwrap();
        assert_eq!(
            intro.resolve(&["a", "b"], None),
            Err(RequirementViolation::MissingFlyover)
        );
        assert_eq!(
            intro.check_requirements(4, false),
            Err(RequirementViolation::MissingFlyover)
        );
        assert!(intro.check_requirements(4, true).is_ok());
    }

    #[test]
    fn test_clip_count_requirements() {
        let registry = TemplateRegistry::builtin();
        let hyperpop = registry.get("hyperpop").unwrap();
        assert_eq!(
            hyperpop.check_requirements(3, false),
            Err(RequirementViolation::TooFewClips { required: 5, actual: 3 })
        );
        let wes = registry.get("wesanderson").unwrap();
        assert_eq!(
            wes.check_requirements(21, false),
            Err(RequirementViolation::TooManyClips { max: 20, actual: 21 })
        );
    }

    #[test]
    fn test_validate_rejects_mismatched_durations() {
        let bad = TemplateDefinition {
            name: "bad".into(),
            description: String::new(),
            sequence: vec![ClipSlot::Photo(0), ClipSlot::Photo(1)],
            durations: vec![1.0],
            min_clips: 1,
            max_clips: None,
            requires_flyover: false,
            music: None,
        };
        assert!(matches!(bad.validate(), Err(TemplateError::Invalid { .. })));

        let zero = TemplateDefinition {
            durations: vec![1.0, 0.0],
            ..bad
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{
            "templates": [
                {"name": "solo", "sequence": [{"photo": 0}, "flyover"], "durations": [2.0, 3.0]}
            ],
            "default_set": ["solo"]
        }"#;
        let registry = TemplateRegistry::from_json_str(json).unwrap();
        let solo = registry.get("solo").unwrap();
        assert_eq!(solo.min_clips, 1);
        assert_eq!(solo.sequence[1], ClipSlot::Flyover);
        assert_eq!(registry.default_set(), &["solo".to_string()]);
    }

    #[test]
    fn test_load_rejects_unknown_default() {
        let json = r#"{"templates": [], "default_set": ["ghost"]}"#;
        assert!(TemplateRegistry::from_json_str(json).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");
        let json = serde_json::to_string(&TemplateRegistry::builtin()).unwrap();
        std::fs::write(&path, json).unwrap();

        let registry = TemplateRegistry::from_file(&path).unwrap();
        assert_eq!(registry.names(), TemplateRegistry::builtin().names());
    }
}
