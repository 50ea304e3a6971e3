//! Command sanitizer: turns untrusted model output into a single invocation of a registered script.
//!
//! Steps, in order: drop every character outside the approved set, cut everything before the
//! scripts-directory marker, require the first word after the marker to be a registered script
//! name, then check the remaining words against that script's argument contract.
//! The result carries an argument vector; nothing downstream re-parses it as shell text.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::jail;
use crate::llm::CandidateCommand;
use crate::registry::{ArgKind, ArgSlot, ScriptRegistry, ScriptSpec};

/// Characters allowed to survive sanitization: ASCII alphanumerics, `.`, `/`, space, `-`, `@`.
pub fn is_approved_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '/' | ' ' | '-' | '@')
}

/// Drop every character outside the approved set.
pub fn filter_approved(s: &str) -> String {
    s.chars().filter(|&c| is_approved_char(c)).collect()
}

/// Why a candidate was refused. The message is returned to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("command does not reference an approved script under {marker}")]
    NoScriptMarker { marker: String },
    #[error("no script name follows {marker}")]
    MissingScript { marker: String },
    #[error("script is not registered: {0}")]
    UnknownScript(String),
    #[error("{script}: missing required argument <{label}>")]
    MissingArgument { script: String, label: String },
    #[error("{script}: unexpected extra argument {value:?}")]
    TooManyArguments { script: String, value: String },
    #[error("{script}: argument <{label}> {value:?} {reason}")]
    InvalidArgument {
        script: String,
        label: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SanitizerError {
    #[error("scripts directory {0} must be absolute and use only [A-Za-z0-9./-@] characters")]
    UnsafeScriptsDir(String),
    #[error("data root {0} must be absolute and use only [A-Za-z0-9./-@] characters")]
    UnsafeDataRoot(String),
}

/// A validated invocation of a registered script. Only [`Sanitizer::sanitize`] creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedCommand {
    script: String,
    program: PathBuf,
    args: Vec<String>,
    line: String,
}

impl SanitizedCommand {
    /// Registered script name (file name under the scripts directory).
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Absolute path of the script.
    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Command line as it would be typed: script path followed by the arguments.
    pub fn as_str(&self) -> &str {
        &self.line
    }
}

impl fmt::Display for SanitizedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

/// True when `p` is absolute, has no spaces, and every character is approved.
fn is_safe_dir(p: &Path) -> bool {
    let s = p.display().to_string();
    p.is_absolute() && !s.contains(' ') && s.chars().all(is_approved_char)
}

/// Sanitizer bound to one registry, scripts directory and data root.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    registry: Arc<ScriptRegistry>,
    scripts_dir: PathBuf,
    /// Scripts directory followed by `/`.
    marker: String,
    data_root: PathBuf,
    /// `data_root` with symlinks resolved, for checking where path arguments really point.
    resolved_data_root: PathBuf,
}

impl Sanitizer {
    /// Both directories must survive the character filter unchanged, otherwise no candidate could ever match.
    pub fn new(
        registry: Arc<ScriptRegistry>,
        scripts_dir: &Path,
        data_root: &Path,
    ) -> Result<Self, SanitizerError> {
        if !is_safe_dir(scripts_dir) {
            return Err(SanitizerError::UnsafeScriptsDir(
                scripts_dir.display().to_string(),
            ));
        }
        if !is_safe_dir(data_root) {
            return Err(SanitizerError::UnsafeDataRoot(data_root.display().to_string()));
        }
        let dir = scripts_dir.display().to_string();
        let dir = dir.trim_end_matches('/');
        Ok(Self {
            registry,
            scripts_dir: PathBuf::from(dir),
            marker: format!("{}/", dir),
            data_root: data_root.to_path_buf(),
            resolved_data_root: jail::canonicalize_lenient(data_root, "")
                .unwrap_or_else(|_| data_root.to_path_buf()),
        })
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Validate a candidate. Rejections carry a human-readable reason.
    pub fn sanitize(&self, candidate: &CandidateCommand) -> Result<SanitizedCommand, Rejection> {
        let filtered = filter_approved(candidate.as_str());
        let start = filtered
            .find(&self.marker)
            .ok_or_else(|| Rejection::NoScriptMarker {
                marker: self.marker.clone(),
            })?;
        let rest = &filtered[start + self.marker.len()..];

        let name = rest.split(' ').next().unwrap_or("");
        if name.is_empty() {
            return Err(Rejection::MissingScript {
                marker: self.marker.clone(),
            });
        }
        let spec = self
            .registry
            .get(name)
            .ok_or_else(|| Rejection::UnknownScript(name.to_string()))?;

        let words: Vec<&str> = rest[name.len()..].split_whitespace().collect();
        let args = self.check_args(spec, &words)?;

        let program = self.scripts_dir.join(&spec.name);
        let mut line = program.display().to_string();
        for a in &args {
            line.push(' ');
            line.push_str(a);
        }
        Ok(SanitizedCommand {
            script: spec.name.clone(),
            program,
            args,
            line,
        })
    }

    /// Match words to slots in order; a variadic slot takes everything left.
    fn check_args(&self, spec: &ScriptSpec, words: &[&str]) -> Result<Vec<String>, Rejection> {
        let mut out = Vec::with_capacity(words.len());
        let mut i = 0;
        for slot in &spec.slots {
            if slot.variadic {
                if i >= words.len() && slot.required {
                    return Err(missing(spec, slot));
                }
                for w in &words[i..] {
                    out.push(self.check_value(spec, slot, w)?);
                }
                i = words.len();
                break;
            }
            match words.get(i) {
                Some(w) => {
                    out.push(self.check_value(spec, slot, w)?);
                    i += 1;
                }
                None if slot.required => return Err(missing(spec, slot)),
                None => break,
            }
        }
        if let Some(extra) = words.get(i) {
            return Err(Rejection::TooManyArguments {
                script: spec.name.clone(),
                value: extra.to_string(),
            });
        }
        Ok(out)
    }

    fn check_value(&self, spec: &ScriptSpec, slot: &ArgSlot, value: &str) -> Result<String, Rejection> {
        let invalid = |reason: &str| Rejection::InvalidArgument {
            script: spec.name.clone(),
            label: slot.label.clone(),
            value: value.to_string(),
            reason: reason.to_string(),
        };
        match slot.kind {
            ArgKind::FreeText => {
                if value.starts_with('-') {
                    return Err(invalid("must not start with '-'"));
                }
                Ok(value.to_string())
            }
            ArgKind::Enumerated => slot
                .values
                .iter()
                .find(|v| v.eq_ignore_ascii_case(value))
                .cloned()
                .ok_or_else(|| invalid(&format!("is not one of {}", slot.values.join(", ")))),
            ArgKind::Integer => {
                let n = value.parse::<i64>().map_err(|_| invalid("is not an integer"))?;
                match slot.min {
                    Some(min) if n < min => Err(invalid(&format!("must be at least {}", min))),
                    _ => Ok(n.to_string()),
                }
            }
            ArgKind::Path => {
                let p = Path::new(value);
                if !p.is_absolute() {
                    return Err(invalid("must be an absolute path"));
                }
                if p.components().any(|c| matches!(c, Component::ParentDir)) {
                    return Err(invalid("must not contain '..'"));
                }
                if !p.starts_with(&self.data_root) {
                    return Err(invalid(&format!(
                        "must be inside {}",
                        self.data_root.display()
                    )));
                }
                // Symlinks under the data root must not lead out of it.
                let resolved = jail::canonicalize_lenient(p, value)
                    .map_err(|_| invalid("cannot be resolved"))?;
                if !resolved.starts_with(&self.resolved_data_root) {
                    return Err(invalid(&format!(
                        "resolves outside {}",
                        self.data_root.display()
                    )));
                }
                Ok(value.to_string())
            }
        }
    }
}

fn missing(spec: &ScriptSpec, slot: &ArgSlot) -> Rejection {
    Rejection::MissingArgument {
        script: spec.name.clone(),
        label: slot.label.clone(),
    }
}
