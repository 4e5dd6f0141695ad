//! Ordered task lists per project kind, plus custom-task insertion.

use crate::{Error, Result};
use uibuild_core::{Project, ProjectKind};

/// One entry of a project's execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub name: String,
    pub params: serde_json::Value,
}

impl TaskSpec {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: serde_json::Value::Null,
        }
    }

    /// The registry name of the task implementation: collision suffixes
    /// (`--2`, `--3`, ...) are not part of the implementation name.
    #[must_use]
    pub fn base_name(&self) -> &str {
        match self.name.rsplit_once("--") {
            Some((base, suffix)) if suffix.chars().all(|c| c.is_ascii_digit()) => base,
            _ => &self.name,
        }
    }
}

/// The type-specific standard definition: an ordered sequence of task
/// names.
#[must_use]
pub fn standard_tasks(kind: ProjectKind) -> Vec<TaskSpec> {
    let names: &[&str] = match kind {
        ProjectKind::Application => &[
            "replace-copyright",
            "replace-version",
            "minify",
            "generate-component-preload",
            "generate-bundle",
            "generate-version-info",
        ],
        ProjectKind::Library => &[
            "replace-copyright",
            "replace-version",
            "build-themes",
            "minify",
            "generate-library-manifest",
            "generate-library-preload",
        ],
        ProjectKind::Component => &[
            "replace-copyright",
            "replace-version",
            "minify",
            "generate-component-preload",
        ],
        // Plain modules pass their resources through untouched.
        ProjectKind::Module => &[],
        ProjectKind::ThemeLibrary => &[
            "replace-copyright",
            "replace-version",
            "build-themes",
            "generate-theme-designer-resources",
        ],
    };
    names.iter().map(|n| TaskSpec::named(n)).collect()
}

/// Compose a project's execution order: the standard definition minus
/// exclusions, with the project's custom tasks inserted at their
/// `beforeTask`/`afterTask` anchors.
pub fn compose_task_list(project: &Project, excluded: &[String]) -> Result<Vec<TaskSpec>> {
    let mut tasks: Vec<TaskSpec> = standard_tasks(project.kind)
        .into_iter()
        .filter(|t| !excluded.iter().any(|e| e == &t.name))
        .collect();

    for custom in &project.custom_tasks {
        let spec = TaskSpec {
            name: unique_name(&tasks, &custom.name),
            params: custom.configuration.clone(),
        };
        match (&custom.before_task, &custom.after_task) {
            (Some(_), Some(_)) => {
                return Err(Error::configuration(format!(
                    "Custom task '{}' defines both beforeTask and afterTask",
                    custom.name
                )));
            }
            (None, None) => {
                if tasks.is_empty() {
                    tasks.push(spec);
                } else {
                    return Err(Error::configuration(format!(
                        "Custom task '{}' defines neither beforeTask nor afterTask",
                        custom.name
                    )));
                }
            }
            (Some(anchor), None) => {
                let idx = anchor_index(&tasks, anchor, &custom.name)?;
                tasks.insert(idx, spec);
            }
            (None, Some(anchor)) => {
                let idx = anchor_index(&tasks, anchor, &custom.name)?;
                tasks.insert(idx + 1, spec);
            }
        }
    }
    Ok(tasks)
}

fn anchor_index(tasks: &[TaskSpec], anchor: &str, custom: &str) -> Result<usize> {
    tasks
        .iter()
        .position(|t| t.name == anchor)
        .ok_or_else(|| {
            Error::configuration(format!(
                "Custom task '{custom}' references unknown task '{anchor}'"
            ))
        })
}

/// Resolve a name collision by appending `--N`, N starting at 2.
fn unique_name(tasks: &[TaskSpec], name: &str) -> String {
    if !tasks.iter().any(|t| t.name == name) {
        return name.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{name}--{n}");
        if !tasks.iter().any(|t| t.name == candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uibuild_core::CustomTaskDef;

    fn project(kind: ProjectKind, custom: Vec<CustomTaskDef>) -> Project {
        Project {
            id: "my.app".into(),
            version: "1.0.0".into(),
            kind,
            namespace: "/resources/my/app".into(),
            source_root: PathBuf::from("/src"),
            custom_tasks: custom,
            extensions: Vec::new(),
            middleware: Vec::new(),
        }
    }

    fn custom(name: &str, before: Option<&str>, after: Option<&str>) -> CustomTaskDef {
        CustomTaskDef {
            name: name.to_string(),
            before_task: before.map(ToString::to_string),
            after_task: after.map(ToString::to_string),
            configuration: serde_json::Value::Null,
        }
    }

    #[test]
    fn application_standard_order() {
        let tasks = compose_task_list(&project(ProjectKind::Application, vec![]), &[]).unwrap();
        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "replace-copyright",
                "replace-version",
                "minify",
                "generate-component-preload",
                "generate-bundle",
                "generate-version-info",
            ]
        );
    }

    #[test]
    fn before_and_after_insertion() {
        let tasks = compose_task_list(
            &project(
                ProjectKind::Application,
                vec![
                    custom("lint", Some("minify"), None),
                    custom("report", None, Some("generate-bundle")),
                ],
            ),
            &[],
        )
        .unwrap();
        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert_eq!(pos("lint"), pos("minify") - 1);
        assert_eq!(pos("report"), pos("generate-bundle") + 1);
    }

    #[test]
    fn both_anchors_is_an_error() {
        let err = compose_task_list(
            &project(
                ProjectKind::Application,
                vec![custom("lint", Some("minify"), Some("minify"))],
            ),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn neither_anchor_is_an_error_with_standard_tasks() {
        let err = compose_task_list(
            &project(ProjectKind::Application, vec![custom("lint", None, None)]),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn neither_anchor_is_fine_without_standard_tasks() {
        let tasks = compose_task_list(
            &project(ProjectKind::Module, vec![custom("lint", None, None)]),
            &[],
        )
        .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "lint");
    }

    #[test]
    fn unknown_anchor_is_an_error() {
        let err = compose_task_list(
            &project(
                ProjectKind::Application,
                vec![custom("lint", Some("no-such-task"), None)],
            ),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn excluded_anchor_is_an_error() {
        let err = compose_task_list(
            &project(
                ProjectKind::Application,
                vec![custom("lint", Some("minify"), None)],
            ),
            &["minify".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn collisions_get_numeric_suffixes() {
        let tasks = compose_task_list(
            &project(
                ProjectKind::Application,
                vec![
                    custom("minify", Some("generate-bundle"), None),
                    custom("minify", None, Some("generate-bundle")),
                ],
            ),
            &[],
        )
        .unwrap();
        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"minify"));
        assert!(names.contains(&"minify--2"));
        assert!(names.contains(&"minify--3"));
    }

    #[test]
    fn base_name_strips_suffix() {
        let spec = TaskSpec {
            name: "minify--2".into(),
            params: serde_json::Value::Null,
        };
        assert_eq!(spec.base_name(), "minify");

        let spec = TaskSpec {
            name: "weird--name".into(),
            params: serde_json::Value::Null,
        };
        assert_eq!(spec.base_name(), "weird--name");
    }
}
