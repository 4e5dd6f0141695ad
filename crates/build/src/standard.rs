//! Minimal implementations of the standard tasks.
//!
//! These keep the pipeline runnable end-to-end: placeholder replacement,
//! whitespace minification, preload/bundle concatenation, theme and
//! version artifacts. Hosts with real tooling register their own
//! implementations over these names.

use crate::task::{BuildTask, TaskContext, TaskError, TaskRegistry};
use async_trait::async_trait;
use std::sync::Arc;
use uibuild_core::Reader;

/// Suffixes of generated artifacts; source-processing tasks skip these so
/// re-running over an already built workspace stays stable.
const GENERATED_SUFFIXES: &[&str] = &[
    ".min.js",
    "-preload.js",
    "/bundle.js",
    "/version.json",
    "/manifest.json",
    "/themes.json",
];

fn is_generated(path: &str) -> bool {
    GENERATED_SUFFIXES.iter().any(|s| path.ends_with(s))
}

fn decode(content: &[u8]) -> String {
    String::from_utf8_lossy(content).into_owned()
}

/// Replace a `${...}` placeholder in every source file that contains it.
struct ReplacePlaceholder {
    placeholder: &'static str,
    value_of: fn(&uibuild_core::Project) -> String,
}

#[async_trait]
impl BuildTask for ReplacePlaceholder {
    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let value = (self.value_of)(ctx.project);
        let resources = ctx
            .workspace
            .by_glob(&["**/*.js".to_string(), "**/*.json".to_string()])
            .await;
        for resource in resources {
            if is_generated(resource.path()) {
                continue;
            }
            let text = decode(&resource.buffer());
            if text.contains(self.placeholder) {
                ctx.stage
                    .write(resource.path(), text.replace(self.placeholder, &value));
            }
        }
        Ok(())
    }
}

/// Whitespace/comment stripping producing a `.min.js` sibling.
struct Minify;

impl Minify {
    fn minify_source(source: &str) -> String {
        source
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn min_path(path: &str) -> String {
        match path.strip_suffix(".js") {
            Some(base) => format!("{base}.min.js"),
            None => format!("{path}.min"),
        }
    }
}

#[async_trait]
impl BuildTask for Minify {
    fn supports_differential(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let resources = match ctx.changed {
            // Differential mode: only re-minify the changed sources.
            Some(info) => {
                let mut resources = Vec::new();
                for path in &info.changed_project_resource_paths {
                    if path.ends_with(".js") && !is_generated(path) {
                        if let Some(resource) = ctx.workspace.by_path(path).await {
                            resources.push(resource);
                        }
                    }
                }
                resources
            }
            None => ctx.workspace.by_glob(&["**/*.js".to_string()]).await,
        };
        for resource in resources {
            if is_generated(resource.path()) {
                continue;
            }
            let minified = Self::minify_source(&decode(&resource.buffer()));
            ctx.stage.write(Self::min_path(resource.path()), minified);
        }
        Ok(())
    }
}

/// Concatenate the component sources into `Component-preload.js`.
struct GenerateComponentPreload;

#[async_trait]
impl BuildTask for GenerateComponentPreload {
    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let namespace = ctx.project.namespace.trim_end_matches('/');
        let component = format!("{namespace}/Component.js");
        if ctx.workspace.by_path(&component).await.is_none() {
            return Ok(());
        }
        let mut modules = serde_json::Map::new();
        for resource in ctx.workspace.by_glob(&["**/*.js".to_string()]).await {
            if is_generated(resource.path()) {
                continue;
            }
            modules.insert(
                resource.path().to_string(),
                serde_json::Value::String(decode(&resource.buffer())),
            );
        }
        let preload = serde_json::to_string(&serde_json::Value::Object(modules))?;
        ctx.stage
            .write(format!("{namespace}/Component-preload.js"), preload);
        Ok(())
    }
}

/// Concatenate project and dependency sources into one `bundle.js`.
struct GenerateBundle;

#[async_trait]
impl BuildTask for GenerateBundle {
    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let mut sections: Vec<String> = Vec::new();
        for resource in ctx.workspace.by_glob(&["**/*.js".to_string()]).await {
            if !is_generated(resource.path()) {
                sections.push(decode(&resource.buffer()));
            }
        }
        if let Some(dependencies) = ctx.dependencies {
            for resource in dependencies.by_glob(&["**/*.js".to_string()]).await {
                if !is_generated(resource.path()) {
                    sections.push(decode(&resource.buffer()));
                }
            }
        }
        let namespace = ctx.project.namespace.trim_end_matches('/');
        ctx.stage
            .write(format!("{namespace}/bundle.js"), sections.join("\n;\n"));
        Ok(())
    }
}

/// Emit `version.json` from the project metadata alone (reads nothing).
struct GenerateVersionInfo;

#[async_trait]
impl BuildTask for GenerateVersionInfo {
    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let namespace = ctx.project.namespace.trim_end_matches('/');
        let info = serde_json::json!({
            "name": ctx.project.id,
            "version": ctx.project.version,
        });
        ctx.stage
            .write(format!("{namespace}/version.json"), info.to_string());
        Ok(())
    }
}

/// Turn every `.less` source into a `.css` sibling.
struct BuildThemes;

#[async_trait]
impl BuildTask for BuildThemes {
    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        for resource in ctx.workspace.by_glob(&["**/*.less".to_string()]).await {
            let css_path = resource
                .path()
                .strip_suffix(".less")
                .map_or_else(|| format!("{}.css", resource.path()), |b| format!("{b}.css"));
            // Variable resolution is left to real theme tooling; emit the
            // source as-is.
            ctx.stage.write(css_path, resource.buffer());
        }
        Ok(())
    }
}

/// Emit `manifest.json` for a library.
struct GenerateLibraryManifest;

#[async_trait]
impl BuildTask for GenerateLibraryManifest {
    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let namespace = ctx.project.namespace.trim_end_matches('/');
        let dot_library = ctx
            .workspace
            .by_path(&format!("{namespace}/.library"))
            .await;
        let manifest = serde_json::json!({
            "id": ctx.project.id,
            "version": ctx.project.version,
            "hasLibraryDescriptor": dot_library.is_some(),
        });
        ctx.stage
            .write(format!("{namespace}/manifest.json"), manifest.to_string());
        Ok(())
    }
}

/// Concatenate library sources into `library-preload.js`.
struct GenerateLibraryPreload;

#[async_trait]
impl BuildTask for GenerateLibraryPreload {
    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let namespace = ctx.project.namespace.trim_end_matches('/');
        let mut sections: Vec<String> = Vec::new();
        for resource in ctx.workspace.by_glob(&["**/*.js".to_string()]).await {
            if !is_generated(resource.path()) {
                sections.push(decode(&resource.buffer()));
            }
        }
        ctx.stage.write(
            format!("{namespace}/library-preload.js"),
            sections.join("\n;\n"),
        );
        Ok(())
    }
}

/// Emit the theme index consumed by design tooling.
struct GenerateThemeDesignerResources;

#[async_trait]
impl BuildTask for GenerateThemeDesignerResources {
    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let namespace = ctx.project.namespace.trim_end_matches('/');
        let themes: Vec<String> = ctx
            .workspace
            .by_glob(&["**/*.css".to_string()])
            .await
            .iter()
            .map(|r| r.path().to_string())
            .collect();
        ctx.stage.write(
            format!("{namespace}/themes.json"),
            serde_json::json!({ "themes": themes }).to_string(),
        );
        Ok(())
    }
}

/// A registry with every standard task name bound to its minimal
/// implementation.
#[must_use]
pub fn standard_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register(
        "replace-copyright",
        Arc::new(ReplacePlaceholder {
            placeholder: "${copyright}",
            value_of: |p| format!("(c) {}", p.id),
        }),
    );
    registry.register(
        "replace-version",
        Arc::new(ReplacePlaceholder {
            placeholder: "${version}",
            value_of: |p| p.version.clone(),
        }),
    );
    registry.register("minify", Arc::new(Minify));
    registry.register("generate-component-preload", Arc::new(GenerateComponentPreload));
    registry.register("generate-bundle", Arc::new(GenerateBundle));
    registry.register("generate-version-info", Arc::new(GenerateVersionInfo));
    registry.register("build-themes", Arc::new(BuildThemes));
    registry.register("generate-library-manifest", Arc::new(GenerateLibraryManifest));
    registry.register("generate-library-preload", Arc::new(GenerateLibraryPreload));
    registry.register(
        "generate-theme-designer-resources",
        Arc::new(GenerateThemeDesignerResources),
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minify_strips_comments_and_blank_lines() {
        let source = "// header\n\nfunction f() {\n  return 1;\n}\n";
        assert_eq!(Minify::minify_source(source), "function f() {\nreturn 1;\n}");
    }

    #[test]
    fn min_path_suffix() {
        assert_eq!(Minify::min_path("/app/a.js"), "/app/a.min.js");
    }

    #[test]
    fn generated_artifacts_are_recognised() {
        assert!(is_generated("/app/a.min.js"));
        assert!(is_generated("/app/Component-preload.js"));
        assert!(is_generated("/app/bundle.js"));
        assert!(!is_generated("/app/a.js"));
    }

    #[test]
    fn registry_covers_all_standard_names() {
        let registry = standard_registry();
        for kind in [
            uibuild_core::ProjectKind::Application,
            uibuild_core::ProjectKind::Library,
            uibuild_core::ProjectKind::Component,
            uibuild_core::ProjectKind::Module,
            uibuild_core::ProjectKind::ThemeLibrary,
        ] {
            for spec in crate::definitions::standard_tasks(kind) {
                assert!(
                    registry.contains(spec.base_name()),
                    "missing implementation for {}",
                    spec.name
                );
            }
        }
    }
}
