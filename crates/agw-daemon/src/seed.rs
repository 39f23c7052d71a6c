// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in agent specs and playbooks registered at startup.
//!
//! Deployments normally point `AGW_SPECS_DIR` at a directory of spec JSON
//! files; the built-ins below keep a fresh checkout runnable and give the
//! test suite realistic material.

use std::path::Path;

use anyhow::Context;

use agw_playbook::{Playbook, PlaybookRegistry, QaCheck};
use agw_spec::AgentSpec;

/// The built-in marketing and tutor specs.
///
/// # Panics
///
/// Never panics: the embedded JSON is covered by tests.
#[must_use]
pub fn builtin_specs() -> Vec<AgentSpec> {
    let marketing = serde_json::json!({
        "id": "marketing/v1",
        "spec_type": "marketing",
        "version": "1.0.0",
        "dimensions": {
            "skill": {
                "version": "1.0.0",
                "name": "weekly-post",
                "playbook": "weekly-post",
                "inputs": ["topic"]
            },
            "industry": {
                "version": "1.0.0",
                "vertical": "saas",
                "corpus_ref": null
            },
            "team": null,
            "integrations": {
                "version": "1.0.0",
                "channels": ["blog"],
                "autopublish": false
            },
            "ui": {"version": "2.0.0", "theme": "light", "layout": null},
            "localization": {"version": "1.0.0", "locale": "en-US", "fallback": null},
            "trial": {"version": "1.0.0", "trial_days": 14, "banner": null},
            "budget": {"version": "1.0.0", "alert_threshold": 0.8, "show_costs": true}
        }
    });

    let tutor = serde_json::json!({
        "id": "tutor/v1",
        "spec_type": "tutor",
        "version": "1.0.0",
        "dimensions": {
            "skill": {
                "version": "1.0.0",
                "name": "lesson-outline",
                "playbook": "lesson-outline",
                "inputs": ["subject"]
            },
            "industry": null,
            "team": null,
            "ui": {"version": "2.0.0", "theme": "light", "layout": null},
            "localization": null,
            "trial": {"version": "1.0.0", "trial_days": 7, "banner": null},
            "budget": null
        }
    });

    [marketing, tutor]
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect()
}

/// The built-in playbook registry matching [`builtin_specs`].
#[must_use]
pub fn builtin_playbooks() -> PlaybookRegistry {
    let mut registry = PlaybookRegistry::new();

    let weekly_post = Playbook {
        name: "weekly-post".into(),
        inputs_schema: serde_json::json!({
            "type": "object",
            "required": ["topic"],
            "properties": {
                "topic": {"type": "string"},
                "tone": {"type": "string"}
            },
            "additionalProperties": false
        }),
        steps: vec![
            "# Weekly update: {topic}".into(),
            "Summarise what changed around {topic} this week.".into(),
            "Close with one concrete next step for readers.".into(),
        ],
        output_kind: "markdown".into(),
        qa_rubric: vec![
            QaCheck::NonEmpty,
            QaCheck::MaxChars { limit: 20_000 },
            QaCheck::MentionsInput {
                field: "topic".into(),
            },
        ],
    };

    let lesson_outline = Playbook {
        name: "lesson-outline".into(),
        inputs_schema: serde_json::json!({
            "type": "object",
            "required": ["subject"],
            "properties": {
                "subject": {"type": "string"},
                "level": {"type": "string"}
            },
            "additionalProperties": false
        }),
        steps: vec![
            "# Lesson outline: {subject}".into(),
            "List three learning goals for {subject}.".into(),
            "Sketch one exercise per goal.".into(),
        ],
        output_kind: "markdown".into(),
        qa_rubric: vec![
            QaCheck::NonEmpty,
            QaCheck::MentionsInput {
                field: "subject".into(),
            },
        ],
    };

    // Registration only fails on an invalid schema; both are embedded and
    // covered by tests.
    for playbook in [weekly_post, lesson_outline] {
        let _ = registry.register(playbook);
    }
    registry
}

/// Load agent specs from a directory of `*.json` files.
///
/// # Errors
///
/// Returns an error when the directory cannot be read or a file does not
/// parse as a spec; validation happens later in [`crate::AppState::build`].
pub fn load_specs_dir(dir: &Path) -> anyhow::Result<Vec<AgentSpec>> {
    let mut specs = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("read specs dir {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("read spec file {}", path.display()))?;
        let spec: AgentSpec = serde_json::from_str(&raw)
            .with_context(|| format!("parse spec file {}", path.display()))?;
        specs.push(spec);
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agw_spec::DimensionRegistry;

    #[test]
    fn builtin_specs_parse_and_validate() {
        let specs = builtin_specs();
        assert_eq!(specs.len(), 2);
        let registry = DimensionRegistry::platform();
        for spec in &specs {
            assert!(
                agw_spec::validate(spec, &registry).is_empty(),
                "spec '{}' should validate",
                spec.id
            );
        }
    }

    #[test]
    fn builtin_playbooks_cover_builtin_skills() {
        let playbooks = builtin_playbooks();
        assert!(playbooks.get("weekly-post").is_some());
        assert!(playbooks.get("lesson-outline").is_some());
    }

    #[test]
    fn specs_dir_loads_json_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let spec = &builtin_specs()[0];
        std::fs::write(
            dir.path().join("marketing.json"),
            serde_json::to_string(spec).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let specs = load_specs_dir(dir.path()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id, "marketing/v1");
    }
}
