//! Template cache backed by Handlebars, with MJML post-processing
//!
//! This module provides:
//! - `TemplateEngine`: the long-lived Handlebars instance that helpers are registered on
//! - `TemplateCache`: precompiled templates loaded from a directory, keyed by file name
//! - `TemplateSet`: one immutable generation of compiled templates
//!
//! A load builds a complete `TemplateSet` from a snapshot of the engine and
//! swaps it in, so readers never observe a half-populated cache.

use crate::error::{EmailError, EmailResult};
use arc_swap::ArcSwap;
use handlebars::{Handlebars, HelperDef};
use mrml::{mjml::Mjml, prelude::render::Options as RenderOptions};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Supported template file types, as shown in lookup errors
pub const SUPPORTED_TEMPLATE_TYPES: &str = "*.hbs, *.handlebars, *.mjml";

/// How a template's expanded output is post-processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// `.hbs` / `.handlebars`: output is final HTML
    Handlebars,
    /// `.mjml`: output is MJML markup, converted to HTML after expansion
    Mjml,
}

impl TemplateKind {
    /// Classify a file by substring match on its extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.contains(".mjml") {
            Some(Self::Mjml)
        } else if name.contains(".hbs") || name.contains(".handlebars") {
            Some(Self::Handlebars)
        } else {
            None
        }
    }
}

/// Shared Handlebars instance that templates are compiled against
pub struct TemplateEngine {
    handlebars: RwLock<Handlebars<'static>>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self {
            handlebars: RwLock::new(Handlebars::new()),
        }
    }

    /// Register a named helper for templates compiled from now on
    pub fn register_helper(&self, name: &str, helper: Box<dyn HelperDef + Send + Sync + 'static>) {
        debug!(helper = %name, "Registering template helper");
        self.handlebars.write().register_helper(name, helper);
    }

    /// Run arbitrary configuration against the engine
    pub fn configure<F>(&self, configure: F)
    where
        F: FnOnce(&mut Handlebars<'static>),
    {
        let mut handlebars = self.handlebars.write();
        configure(&mut *handlebars);
    }

    /// Apply a batch of helpers and an optional configure callback
    pub fn apply(&self, configuration: HandlebarsConfiguration) {
        let HandlebarsConfiguration { helpers, configure } = configuration;

        let mut handlebars = self.handlebars.write();
        for (name, helper) in helpers {
            debug!(helper = %name, "Registering template helper");
            handlebars.register_helper(&name, helper);
        }

        if let Some(configure) = configure {
            configure(&mut *handlebars);
        }
    }

    fn snapshot(&self) -> Handlebars<'static> {
        self.handlebars.read().clone()
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

type ConfigureFn = Box<dyn FnOnce(&mut Handlebars<'static>) + Send>;

/// Helpers plus an optional callback to apply to the [`TemplateEngine`]
#[derive(Default)]
pub struct HandlebarsConfiguration {
    helpers: Vec<(String, Box<dyn HelperDef + Send + Sync + 'static>)>,
    configure: Option<ConfigureFn>,
}

impl HandlebarsConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn helper<H>(mut self, name: impl Into<String>, helper: H) -> Self
    where
        H: HelperDef + Send + Sync + 'static,
    {
        self.helpers.push((name.into(), Box::new(helper)));
        self
    }

    pub fn configure<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(&mut Handlebars<'static>) + Send + 'static,
    {
        self.configure = Some(Box::new(configure));
        self
    }
}

/// One generation of compiled templates
pub struct TemplateSet {
    registry: Handlebars<'static>,
    kinds: HashMap<String, TemplateKind>,
}

impl TemplateSet {
    fn empty() -> Self {
        Self {
            registry: Handlebars::new(),
            kinds: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Render a template by exact file name
    pub fn render(&self, name: &str, data: &Value) -> EmailResult<String> {
        let kind = self
            .kinds
            .get(name)
            .ok_or_else(|| EmailError::TemplateNotFound {
                name: name.to_string(),
            })?;

        let expanded = self
            .registry
            .render(name, data)
            .map_err(|e| EmailError::Template(format!("failed to render {}: {}", name, e)))?;

        match kind {
            TemplateKind::Handlebars => Ok(expanded),
            TemplateKind::Mjml => mjml_to_html(expanded),
        }
    }
}

fn mjml_to_html(markup: String) -> EmailResult<String> {
    let parsed = Mjml::parse(markup)
        .map_err(|e| EmailError::Template(format!("invalid MJML: {}", e)))?;

    parsed
        .render(&RenderOptions::default())
        .map_err(|e| EmailError::Template(format!("MJML rendering failed: {}", e)))
}

/// Precompiled templates keyed by file name
///
/// Cloning is cheap; clones share the engine and the current template set.
#[derive(Clone)]
pub struct TemplateCache {
    engine: Arc<TemplateEngine>,
    current: Arc<ArcSwap<TemplateSet>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(TemplateEngine::new()),
            current: Arc::new(ArcSwap::from_pointee(TemplateSet::empty())),
        }
    }

    /// The shared engine new templates are compiled against
    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }

    /// Replace the cache with every supported template found in `dir`.
    ///
    /// The listing is not recursive and unsupported files are skipped. A
    /// missing directory, unreadable file or compile failure leaves the
    /// previous templates in place. Returns the number of templates loaded.
    pub async fn load(&self, dir: impl AsRef<Path>) -> EmailResult<usize> {
        let dir = dir.as_ref();
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut sources = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();

            let Some(kind) = TemplateKind::from_file_name(&file_name) else {
                debug!(file = %file_name, "Skipping unsupported template file");
                continue;
            };

            // Follows symlinks, e.g. ConfigMap-mounted template directories
            if !tokio::fs::metadata(entry.path()).await?.is_file() {
                continue;
            }

            let source = tokio::fs::read_to_string(entry.path()).await?;
            sources.push((file_name, kind, source));
        }

        let mut registry = self.engine.snapshot();
        let mut kinds = HashMap::with_capacity(sources.len());

        for (name, kind, source) in sources {
            registry
                .register_template_string(&name, source)
                .map_err(|e| EmailError::Template(format!("failed to compile {}: {}", name, e)))?;
            kinds.insert(name, kind);
        }

        let count = kinds.len();
        self.current.store(Arc::new(TemplateSet { registry, kinds }));

        info!(dir = %dir.display(), count, "Loaded email templates");

        Ok(count)
    }

    /// Render a cached template; `.mjml` output is converted to HTML
    pub fn render(&self, name: &str, data: &Value) -> EmailResult<String> {
        self.current.load().render(name, data)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.current.load().contains(name)
    }

    /// Names of all cached templates, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.current.load().kinds.keys().cloned().collect();
        names.sort();
        names
    }

    /// The template set currently in use
    pub fn snapshot(&self) -> Arc<TemplateSet> {
        self.current.load_full()
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handlebars::handlebars_helper;
    use serde_json::json;
    use std::fs;

    const MJML_TEMPLATE: &str =
        "<mjml><mj-body><mj-section><mj-column><mj-text>Hello {{name}}</mj-text></mj-column></mj-section></mj-body></mjml>";

    fn template_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.hbs"), "<p>Hello {{name}}</p>").unwrap();
        fs::write(dir.path().join("b.mjml"), MJML_TEMPLATE).unwrap();
        fs::write(dir.path().join("c.txt"), "Hello {{name}}").unwrap();
        dir
    }

    #[test]
    fn test_template_kind_from_file_name() {
        assert_eq!(TemplateKind::from_file_name("a.hbs"), Some(TemplateKind::Handlebars));
        assert_eq!(
            TemplateKind::from_file_name("a.handlebars"),
            Some(TemplateKind::Handlebars)
        );
        assert_eq!(TemplateKind::from_file_name("a.mjml"), Some(TemplateKind::Mjml));
        assert_eq!(TemplateKind::from_file_name("a.txt"), None);
        assert_eq!(TemplateKind::from_file_name("README"), None);
    }

    #[tokio::test]
    async fn test_load_keeps_only_supported_files() {
        let dir = template_dir();
        let cache = TemplateCache::new();

        let count = cache.load(dir.path()).await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(cache.names(), vec!["a.hbs", "b.mjml"]);
        assert!(!cache.contains("c.txt"));
    }

    #[tokio::test]
    async fn test_load_is_not_recursive() {
        let dir = template_dir();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("deep.hbs"), "deep").unwrap();

        let cache = TemplateCache::new();
        cache.load(dir.path()).await.unwrap();

        assert!(!cache.contains("deep.hbs"));
        assert!(!cache.contains("nested/deep.hbs"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_load_follows_symlinked_templates() {
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("real.hbs"), "<p>Welcome {{name}}</p>").unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(source.path().join("real.hbs"), dir.path().join("welcome.hbs"))
            .unwrap();

        let cache = TemplateCache::new();
        let count = cache.load(dir.path()).await.unwrap();

        assert_eq!(count, 1);
        assert!(cache.contains("welcome.hbs"));
        assert_eq!(
            cache.render("welcome.hbs", &json!({"name": "Ada"})).unwrap(),
            "<p>Welcome Ada</p>"
        );
    }

    #[tokio::test]
    async fn test_load_missing_directory_is_filesystem_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TemplateCache::new();

        let err = cache.load(dir.path().join("nope")).await.unwrap_err();

        assert!(matches!(err, EmailError::Filesystem(_)));
    }

    #[tokio::test]
    async fn test_render_handlebars_returns_output_directly() {
        let dir = template_dir();
        let cache = TemplateCache::new();
        cache.load(dir.path()).await.unwrap();

        let html = cache.render("a.hbs", &json!({"name": "Ada"})).unwrap();

        assert_eq!(html, "<p>Hello Ada</p>");
    }

    #[tokio::test]
    async fn test_render_mjml_converts_to_html() {
        let dir = template_dir();
        let cache = TemplateCache::new();
        cache.load(dir.path()).await.unwrap();

        let html = cache.render("b.mjml", &json!({"name": "Ada"})).unwrap();

        assert!(html.contains("Hello Ada"));
        assert!(html.contains("<html"));
        assert!(!html.contains("<mj-text>"));
    }

    #[test]
    fn test_render_missing_template() {
        let cache = TemplateCache::new();

        let err = cache.render("missing.hbs", &json!({})).unwrap_err();

        match &err {
            EmailError::TemplateNotFound { name } => assert_eq!(name, "missing.hbs"),
            other => panic!("expected TemplateNotFound, got {:?}", other),
        }
        let message = err.to_string();
        assert!(message.contains(".hbs"));
        assert!(message.contains(".handlebars"));
        assert!(message.contains(".mjml"));
    }

    #[tokio::test]
    async fn test_missing_data_renders_blank() {
        let dir = template_dir();
        let cache = TemplateCache::new();
        cache.load(dir.path()).await.unwrap();

        let html = cache.render("a.hbs", &json!({})).unwrap();

        assert_eq!(html, "<p>Hello </p>");
    }

    #[tokio::test]
    async fn test_reload_replaces_previous_templates() {
        let first = template_dir();
        let second = tempfile::tempdir().unwrap();
        fs::write(second.path().join("other.handlebars"), "other").unwrap();

        let cache = TemplateCache::new();
        cache.load(first.path()).await.unwrap();
        cache.load(second.path()).await.unwrap();

        assert_eq!(cache.names(), vec!["other.handlebars"]);
        assert!(matches!(
            cache.render("a.hbs", &json!({})),
            Err(EmailError::TemplateNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_reload_same_directory_is_idempotent() {
        let dir = template_dir();
        let cache = TemplateCache::new();
        let data = json!({"name": "Ada"});

        cache.load(dir.path()).await.unwrap();
        let first = (cache.render("a.hbs", &data).unwrap(), cache.render("b.mjml", &data).unwrap());

        cache.load(dir.path()).await.unwrap();
        let second = (cache.render("a.hbs", &data).unwrap(), cache.render("b.mjml", &data).unwrap());

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_compile_failure_keeps_previous_set() {
        let good = template_dir();
        let bad = tempfile::tempdir().unwrap();
        fs::write(bad.path().join("broken.hbs"), "{{#if}}unclosed").unwrap();

        let cache = TemplateCache::new();
        cache.load(good.path()).await.unwrap();
        let err = cache.load(bad.path()).await.unwrap_err();

        assert!(matches!(err, EmailError::Template(_)));
        assert!(cache.contains("a.hbs"));
    }

    #[tokio::test]
    async fn test_snapshot_is_unaffected_by_reload() {
        let dir = template_dir();
        let cache = TemplateCache::new();
        cache.load(dir.path()).await.unwrap();

        let snapshot = cache.snapshot();
        let empty = tempfile::tempdir().unwrap();
        cache.load(empty.path()).await.unwrap();

        assert_eq!(snapshot.len(), 2);
        assert!(cache.snapshot().is_empty());
    }

    handlebars_helper!(shout: |value: String| value.to_uppercase());

    #[tokio::test]
    async fn test_helpers_apply_to_templates_loaded_afterwards() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("shout.hbs"), "{{shout name}}").unwrap();

        let cache = TemplateCache::new();
        cache
            .engine()
            .apply(HandlebarsConfiguration::new().helper("shout", shout));
        cache.load(dir.path()).await.unwrap();

        assert_eq!(cache.render("shout.hbs", &json!({"name": "ada"})).unwrap(), "ADA");
    }

    #[tokio::test]
    async fn test_configure_callback_runs_against_engine() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("strict.hbs"), "{{missing}}").unwrap();

        let cache = TemplateCache::new();
        cache.engine().configure(|handlebars| handlebars.set_strict_mode(true));
        cache.load(dir.path()).await.unwrap();

        assert!(matches!(
            cache.render("strict.hbs", &json!({})),
            Err(EmailError::Template(_))
        ));
    }
}
