//! Read-only Dockerfile/manifest template catalog (§4.4). Backed by an
//! embedded asset bundle built into the binary via `rust_embed`; the only
//! I/O is the one-time embed at compile time. LLM-driven template
//! *selection* lives in the `resolve_base_images`/`verify_manifests` steps —
//! this module only looks names up and substitutes placeholders.

use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain, Result};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Assets;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateCategory {
    Dockerfile,
    Manifest,
}

impl TemplateCategory {
    fn dir(self) -> &'static str {
        match self {
            TemplateCategory::Dockerfile => "dockerfiles",
            TemplateCategory::Manifest => "manifests",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateBlob {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl TemplateBlob {
    pub fn as_str(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Languages the embedded corpus ships templates for. Anything else falls
/// back to `generic`.
pub const KNOWN_LANGUAGES: &[&str] = &["node", "python", "go", "generic"];

pub struct TemplateCatalog;

impl TemplateCatalog {
    pub fn new() -> Self {
        Self
    }

    /// Fetch the raw Dockerfile blob for `name` (a language tag).
    pub fn dockerfile(&self, name: &str) -> Result<TemplateBlob> {
        self.get(TemplateCategory::Dockerfile, &format!("{name}/Dockerfile"))
    }

    /// Fetch one of the three manifest blobs (`deployment`, `service`, `configmap`) for `name`.
    pub fn manifest(&self, name: &str, kind: &str) -> Result<TemplateBlob> {
        self.get(TemplateCategory::Manifest, &format!("{name}/{kind}.yaml"))
    }

    fn get(&self, category: TemplateCategory, rel_path: &str) -> Result<TemplateBlob> {
        let key = format!("{}/{}", category.dir(), rel_path);
        let file = Assets::get(&key).ok_or_else(|| {
            CtnrError::not_found(ErrorDomain::Config, format!("template {key} not found in embedded catalog"))
        })?;
        let mime = if rel_path.ends_with(".yaml") { "application/yaml" } else { "text/plain" };
        Ok(TemplateBlob {
            bytes: file.data.into_owned(),
            mime,
        })
    }

    /// All language tags with an available Dockerfile, for membership checks
    /// after the orchestrator asks the LLM for a template name.
    pub fn list(&self, category: TemplateCategory) -> Vec<String> {
        let prefix = format!("{}/", category.dir());
        let mut names: Vec<String> = Assets::iter()
            .filter_map(|path| path.strip_prefix(&prefix).map(|rest| rest.split('/').next().unwrap_or("").to_string()))
            .filter(|n| !n.is_empty())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Resolve a language hint to a known template name, falling back to `generic`.
    pub fn resolve_language(&self, hint: &str) -> String {
        let hint = hint.to_lowercase();
        KNOWN_LANGUAGES.iter().find(|&&l| l == hint).map(|s| s.to_string()).unwrap_or_else(|| "generic".to_string())
    }

    /// Render a manifest template, substituting the image reference and app name placeholders.
    pub fn render_manifest(&self, name: &str, kind: &str, image_ref: &str, app_name: &str) -> Result<String> {
        let blob = self.manifest(name, kind)?;
        Ok(blob.as_str().replace("__IMAGE__", image_ref).replace("__APP_NAME__", app_name))
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_languages_all_have_dockerfiles() {
        let catalog = TemplateCatalog::new();
        for lang in KNOWN_LANGUAGES {
            assert!(catalog.dockerfile(lang).is_ok(), "missing dockerfile for {lang}");
        }
    }

    #[test]
    fn unknown_name_is_not_found() {
        let catalog = TemplateCatalog::new();
        assert!(catalog.dockerfile("rust").is_err());
    }

    #[test]
    fn list_enumerates_dockerfile_names() {
        let catalog = TemplateCatalog::new();
        let names = catalog.list(TemplateCategory::Dockerfile);
        assert!(names.contains(&"node".to_string()));
        assert!(names.contains(&"generic".to_string()));
    }

    #[test]
    fn render_manifest_substitutes_placeholders() {
        let catalog = TemplateCatalog::new();
        let rendered = catalog.render_manifest("node", "deployment", "registry.example.com/app:v1", "my-app").unwrap();
        assert!(rendered.contains("registry.example.com/app:v1"));
        assert!(rendered.contains("my-app"));
        assert!(!rendered.contains("__IMAGE__"));
        assert!(!rendered.contains("__APP_NAME__"));
    }

    #[test]
    fn resolve_language_falls_back_to_generic() {
        let catalog = TemplateCatalog::new();
        assert_eq!(catalog.resolve_language("node"), "node");
        assert_eq!(catalog.resolve_language("rust"), "generic");
    }
}
