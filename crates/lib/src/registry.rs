//! Script registry: the catalog of approved automation scripts and their argument contracts.
//!
//! The built-in catalog is embedded from `config/registry.yaml`; a deployment can point
//! `registry.catalog` at its own YAML file. Every catalog is validated on load and is
//! read-only afterwards.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::sanitize::is_approved_char;

static BUILTIN_CATALOG: &str = include_str!("../config/registry.yaml");

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("parsing script catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("reading script catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("script catalog is empty")]
    Empty,
    #[error("duplicate script name: {0}")]
    DuplicateName(String),
    #[error("invalid script name {0:?}: must be a plain file name of [A-Za-z0-9.-@]")]
    InvalidName(String),
    #[error("script {script}: slot {label} follows a variadic slot")]
    SlotAfterVariadic { script: String, label: String },
    #[error("script {script}: required slot {label} follows an optional slot")]
    RequiredAfterOptional { script: String, label: String },
    #[error("script {script}: enumerated slot {label} lists no values")]
    EmptyEnumeration { script: String, label: String },
    #[error("script {script}: slot {label} sets min but is not an integer slot")]
    MinOnNonInteger { script: String, label: String },
    #[error("script {0} has no worked example")]
    MissingExample(String),
}

/// Root of a catalog file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Catalog {
    scripts: Vec<ScriptSpec>,
}

/// One approved script: file name under the scripts directory, argument contract, and prose for the model.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScriptSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub slots: Vec<ArgSlot>,
    #[serde(default)]
    pub examples: Vec<ScriptExample>,
}

/// One positional argument of a script.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ArgSlot {
    pub label: String,
    pub kind: ArgKind,
    /// Allowed values for `enumerated` slots.
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default = "default_true")]
    pub required: bool,
    /// Absorbs every remaining argument (at least one when required). Must be the last slot.
    #[serde(default)]
    pub variadic: bool,
    /// Smallest accepted value for `integer` slots.
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgKind {
    /// A single word of approved characters.
    FreeText,
    /// One of the slot's `values`.
    Enumerated,
    /// An absolute path inside the data root.
    Path,
    /// A base-10 integer.
    Integer,
}

/// A worked example: task text and the command the model should produce for it.
/// Both may use `{scripts}` and `{data}` placeholders.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScriptExample {
    pub task: String,
    pub command: String,
}

fn default_true() -> bool {
    true
}

impl ArgKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArgKind::FreeText => "free-text",
            ArgKind::Enumerated => "enumerated",
            ArgKind::Path => "path",
            ArgKind::Integer => "integer",
        }
    }
}

impl ScriptSpec {
    /// Usage line: `<scripts_dir>/<name> <a> <b> [c] <d>...`.
    pub fn usage(&self, scripts_dir: &Path) -> String {
        let mut out = scripts_dir.join(&self.name).display().to_string();
        for slot in &self.slots {
            out.push(' ');
            if slot.required {
                out.push_str(&format!("<{}>", slot.label));
            } else {
                out.push_str(&format!("[{}]", slot.label));
            }
            if slot.variadic {
                out.push_str("...");
            }
        }
        out
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let name_ok = !self.name.is_empty()
            && self.name != "."
            && self.name != ".."
            && !self.name.contains('/')
            && !self.name.contains(' ')
            && self.name.chars().all(is_approved_char);
        if !name_ok {
            return Err(RegistryError::InvalidName(self.name.clone()));
        }
        let mut seen_variadic = false;
        let mut seen_optional = false;
        for slot in &self.slots {
            if seen_variadic {
                return Err(RegistryError::SlotAfterVariadic {
                    script: self.name.clone(),
                    label: slot.label.clone(),
                });
            }
            if slot.required && seen_optional {
                return Err(RegistryError::RequiredAfterOptional {
                    script: self.name.clone(),
                    label: slot.label.clone(),
                });
            }
            if slot.kind == ArgKind::Enumerated && slot.values.is_empty() {
                return Err(RegistryError::EmptyEnumeration {
                    script: self.name.clone(),
                    label: slot.label.clone(),
                });
            }
            if slot.min.is_some() && slot.kind != ArgKind::Integer {
                return Err(RegistryError::MinOnNonInteger {
                    script: self.name.clone(),
                    label: slot.label.clone(),
                });
            }
            seen_variadic |= slot.variadic;
            seen_optional |= !slot.required;
        }
        if self.examples.is_empty() {
            return Err(RegistryError::MissingExample(self.name.clone()));
        }
        Ok(())
    }
}

/// The validated, immutable set of approved scripts.
#[derive(Debug, Clone)]
pub struct ScriptRegistry {
    specs: Vec<ScriptSpec>,
}

impl ScriptRegistry {
    /// Validate a set of specs: unique plain names, well-formed slot order, at least one example each.
    pub fn new(specs: Vec<ScriptSpec>) -> Result<Self, RegistryError> {
        if specs.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut names = HashSet::new();
        for spec in &specs {
            spec.validate()?;
            if !names.insert(spec.name.as_str()) {
                return Err(RegistryError::DuplicateName(spec.name.clone()));
            }
        }
        Ok(Self { specs })
    }

    /// The catalog shipped with the library (`config/registry.yaml`).
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_yaml_str(BUILTIN_CATALOG)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, RegistryError> {
        let catalog: Catalog = serde_yaml::from_str(s)?;
        Self::new(catalog.scripts)
    }

    /// Load a catalog file from disk.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let s = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&s)
    }

    pub fn get(&self, name: &str) -> Option<&ScriptSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn specs(&self) -> &[ScriptSpec] {
        &self.specs
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    /// Scripts listed in the catalog but missing from `scripts_dir`. Only used for startup warnings.
    pub fn missing_files(&self, scripts_dir: &Path) -> Vec<String> {
        self.specs
            .iter()
            .filter(|s| !scripts_dir.join(&s.name).is_file())
            .map(|s| s.name.clone())
            .collect()
    }

    /// Render the catalog for the translator prompt: name, usage, arguments and worked examples per script,
    /// in catalog order. Deterministic for a given catalog, scripts dir and data root.
    pub fn render(&self, scripts_dir: &Path, data_root: &Path) -> String {
        let scripts = scripts_dir.display().to_string();
        let data = data_root.display().to_string();
        let fill = |s: &str| s.replace("{scripts}", &scripts).replace("{data}", &data);

        let mut out = String::from("## Approved scripts\n");
        for spec in &self.specs {
            out.push_str("\n### ");
            out.push_str(&spec.name);
            out.push('\n');
            out.push_str(spec.description.trim());
            out.push_str("\nUsage: ");
            out.push_str(&spec.usage(scripts_dir));
            out.push('\n');
            if !spec.slots.is_empty() {
                out.push_str("Arguments, in order:\n");
                for (i, slot) in spec.slots.iter().enumerate() {
                    out.push_str(&format!("{}. {} ({}", i + 1, slot.label, slot.kind.as_str()));
                    if slot.kind == ArgKind::Enumerated {
                        out.push_str(&format!(", one of: {}", slot.values.join(", ")));
                    }
                    if let Some(min) = slot.min {
                        out.push_str(&format!(", at least {}", min));
                    }
                    if !slot.required {
                        out.push_str(", optional");
                    }
                    if slot.variadic {
                        out.push_str(", one or more");
                    }
                    out.push(')');
                    if !slot.description.is_empty() {
                        out.push_str(": ");
                        out.push_str(slot.description.trim());
                    }
                    out.push('\n');
                }
            }
            out.push_str("Examples:\n");
            for ex in &spec.examples {
                out.push_str("- Task: ");
                out.push_str(&fill(&ex.task));
                out.push_str("\n  Command: ");
                out.push_str(&fill(&ex.command));
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn builtin_catalog_is_valid() {
        let reg = ScriptRegistry::builtin().expect("builtin catalog");
        let names: Vec<&str> = reg.names().collect();
        assert_eq!(
            names,
            vec![
                "count-weekday.sh",
                "recent-logs.sh",
                "extract-emails.sh",
                "find-lines.sh",
                "concat-files.sh"
            ]
        );
        let count = reg.get("count-weekday.sh").expect("count-weekday");
        assert_eq!(count.slots[0].kind, ArgKind::Enumerated);
        assert!(count.slots[0].values.iter().any(|v| v == "Friday"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let yaml = r#"
scripts:
  - name: a.sh
    description: first
    examples: [{ task: t, command: "{scripts}/a.sh" }]
  - name: a.sh
    description: second
    examples: [{ task: t, command: "{scripts}/a.sh" }]
"#;
        let err = ScriptRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(n) if n == "a.sh"));
    }

    #[test]
    fn slot_after_variadic_is_rejected() {
        let yaml = r#"
scripts:
  - name: cat.sh
    description: concat
    slots:
      - { label: inputs, kind: path, variadic: true }
      - { label: output, kind: path }
    examples: [{ task: t, command: "{scripts}/cat.sh" }]
"#;
        let err = ScriptRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, RegistryError::SlotAfterVariadic { label, .. } if label == "output"));
    }

    #[test]
    fn names_with_path_separators_are_rejected() {
        let yaml = r#"
scripts:
  - name: ../bin/rm
    description: nope
    examples: [{ task: t, command: c }]
"#;
        let err = ScriptRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName(_)));
    }

    #[test]
    fn names_the_sanitizer_would_mangle_are_rejected() {
        // `_` is stripped by the character filter, so such a name could never be matched.
        let yaml = r#"
scripts:
  - name: count_weekday.sh
    description: nope
    examples: [{ task: t, command: c }]
"#;
        let err = ScriptRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName(n) if n == "count_weekday.sh"));
    }

    #[test]
    fn enumerated_slot_needs_values() {
        let yaml = r#"
scripts:
  - name: x.sh
    description: x
    slots:
      - { label: day, kind: enumerated }
    examples: [{ task: t, command: c }]
"#;
        assert!(matches!(
            ScriptRegistry::from_yaml_str(yaml).unwrap_err(),
            RegistryError::EmptyEnumeration { .. }
        ));
    }

    #[test]
    fn min_is_only_for_integer_slots() {
        let yaml = r#"
scripts:
  - name: x.sh
    description: x
    slots:
      - { label: file, kind: path, min: 1 }
    examples: [{ task: t, command: c }]
"#;
        assert!(matches!(
            ScriptRegistry::from_yaml_str(yaml).unwrap_err(),
            RegistryError::MinOnNonInteger { label, .. } if label == "file"
        ));
        let reg = ScriptRegistry::builtin().expect("builtin catalog");
        let count = &reg.get("recent-logs.sh").expect("recent-logs").slots[1];
        assert_eq!(count.min, Some(1));
        assert!(reg
            .render(&PathBuf::from("/srv/scripts"), &PathBuf::from("/data"))
            .contains("2. count (integer, at least 1)"));
    }

    #[test]
    fn unknown_kind_fails_to_parse() {
        let yaml = r#"
scripts:
  - name: x.sh
    description: x
    slots:
      - { label: n, kind: float }
    examples: [{ task: t, command: c }]
"#;
        assert!(matches!(
            ScriptRegistry::from_yaml_str(yaml).unwrap_err(),
            RegistryError::Parse(_)
        ));
    }

    #[test]
    fn render_lists_every_script_with_usage_and_examples() {
        let reg = ScriptRegistry::builtin().expect("builtin catalog");
        let scripts = PathBuf::from("/srv/scripts");
        let data = PathBuf::from("/data");
        let text = reg.render(&scripts, &data);
        for spec in reg.specs() {
            assert!(text.contains(&format!("### {}", spec.name)));
            assert!(text.contains(&format!("Usage: {}", spec.usage(&scripts))));
        }
        assert!(text.contains(
            "Command: /srv/scripts/count-weekday.sh Wednesday /data/dates.txt /data/dates-wednesdays.txt"
        ));
        assert!(text.contains("Usage: /srv/scripts/concat-files.sh <output> <inputs>..."));
        assert!(!text.contains("{scripts}"));
        assert!(!text.contains("{data}"));
        assert_eq!(text, reg.render(&scripts, &data));
    }
}
