// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! agw-playbook
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use agw_core::{canonical_json, sha256_hex};

/// Errors from playbook registration and execution.
#[derive(Debug, thiserror::Error)]
pub enum PlaybookError {
    /// No playbook is registered under the requested name.
    #[error("unknown playbook '{0}'")]
    Unknown(String),

    /// The playbook's input schema does not compile.
    #[error("playbook '{name}' has an invalid input schema: {reason}")]
    InvalidSchema {
        /// Playbook name.
        name: String,
        /// Compiler diagnostic.
        reason: String,
    },

    /// The supplied inputs do not satisfy the input schema.
    #[error("inputs rejected by schema: {0:?}")]
    InvalidInputs(Vec<String>),

    /// The playbook could not be canonicalised for content addressing.
    #[error(transparent)]
    Contract(#[from] agw_core::ContractError),
}

/// One deterministic QA check applied to rendered output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum QaCheck {
    /// The output must not be empty.
    NonEmpty,
    /// The output must not exceed this many characters.
    MaxChars {
        /// Character ceiling.
        limit: usize,
    },
    /// The output must mention the rendered value of this input.
    MentionsInput {
        /// Input field name.
        field: String,
    },
}

/// Outcome of one QA check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaResult {
    /// The check that ran.
    pub check: QaCheck,
    /// Whether the rendered output satisfied it.
    pub passed: bool,
}

/// A loaded, validated, content-addressed playbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    /// Registered name, referenced by the skill dimension.
    pub name: String,
    /// JSON Schema the execution inputs must satisfy.
    pub inputs_schema: serde_json::Value,
    /// Ordered step templates; `{field}` placeholders substitute inputs.
    pub steps: Vec<String>,
    /// Output kind (e.g. `"markdown"`).
    pub output_kind: String,
    /// Deterministic QA rubric applied to the rendered output.
    pub qa_rubric: Vec<QaCheck>,
}

impl Playbook {
    /// Canonical content hash identifying this playbook revision.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybookError::Contract`] if serialization fails.
    pub fn content_hash(&self) -> Result<String, PlaybookError> {
        let canonical = canonical_json(self)?;
        Ok(sha256_hex(canonical.as_bytes()))
    }
}

/// Deterministic output of a skill execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillOutput {
    /// Playbook name that produced this output.
    pub playbook: String,
    /// Content hash of the playbook revision that ran.
    pub playbook_sha256: String,
    /// Output kind.
    pub output_kind: String,
    /// Rendered output content.
    pub content: String,
    /// QA rubric results.
    pub qa: Vec<QaResult>,
}

struct Entry {
    playbook: Playbook,
    validator: jsonschema::Validator,
    content_hash: String,
}

/// Registry of playbooks, populated at startup and read-only thereafter.
#[derive(Default)]
pub struct PlaybookRegistry {
    entries: BTreeMap<String, Entry>,
}

impl PlaybookRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a playbook, compiling and pinning its input schema.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybookError::InvalidSchema`] when the input schema does
    /// not compile.
    pub fn register(&mut self, playbook: Playbook) -> Result<(), PlaybookError> {
        let validator = jsonschema::validator_for(&playbook.inputs_schema).map_err(|e| {
            PlaybookError::InvalidSchema {
                name: playbook.name.clone(),
                reason: e.to_string(),
            }
        })?;
        let content_hash = playbook.content_hash()?;
        self.entries.insert(
            playbook.name.clone(),
            Entry {
                playbook,
                validator,
                content_hash,
            },
        );
        Ok(())
    }

    /// Look up a playbook by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Playbook> {
        self.entries.get(name).map(|e| &e.playbook)
    }

    /// Registered playbook names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Execute a playbook deterministically over `inputs`.
    ///
    /// # Errors
    ///
    /// - [`PlaybookError::Unknown`] when `name` is not registered.
    /// - [`PlaybookError::InvalidInputs`] when the inputs fail the schema.
    pub fn execute(
        &self,
        name: &str,
        inputs: &serde_json::Value,
    ) -> Result<SkillOutput, PlaybookError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| PlaybookError::Unknown(name.to_string()))?;

        let errors: Vec<String> = entry
            .validator
            .iter_errors(inputs)
            .map(|e| e.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(PlaybookError::InvalidInputs(errors));
        }

        let content = entry
            .playbook
            .steps
            .iter()
            .map(|step| render(step, inputs))
            .collect::<Vec<_>>()
            .join("\n\n");

        let qa = entry
            .playbook
            .qa_rubric
            .iter()
            .map(|check| QaResult {
                check: check.clone(),
                passed: evaluate(check, &content, inputs),
            })
            .collect();

        Ok(SkillOutput {
            playbook: entry.playbook.name.clone(),
            playbook_sha256: entry.content_hash.clone(),
            output_kind: entry.playbook.output_kind.clone(),
            content,
            qa,
        })
    }
}

/// Substitute `{field}` placeholders with input values.
///
/// Strings substitute verbatim; other values substitute as compact JSON.
/// Unknown placeholders are left in place so misconfiguration is visible in
/// the draft rather than silently dropped.
fn render(template: &str, inputs: &serde_json::Value) -> String {
    let mut out = template.to_string();
    if let Some(map) = inputs.as_object() {
        for (key, value) in map {
            let placeholder = format!("{{{key}}}");
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out = out.replace(&placeholder, &rendered);
        }
    }
    out
}

fn evaluate(check: &QaCheck, content: &str, inputs: &serde_json::Value) -> bool {
    match check {
        QaCheck::NonEmpty => !content.trim().is_empty(),
        QaCheck::MaxChars { limit } => content.chars().count() <= *limit,
        QaCheck::MentionsInput { field } => inputs
            .get(field)
            .map(|v| match v {
                serde_json::Value::String(s) => content.contains(s),
                other => content.contains(&other.to_string()),
            })
            .unwrap_or(false),
    }
}
