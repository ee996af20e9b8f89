//! Email client
//!
//! Holds the active transporter and the template cache. Template bodies are
//! rendered before the message reaches the transporter, so transporters only
//! ever see content-addressed messages.

use crate::config::EmailClientConfig;
use crate::error::EmailResult;
use crate::models::{Message, OutboundMessage};
use crate::templates::{HandlebarsConfiguration, TemplateCache};
use crate::transporter::{ProviderOptions, SendResult, Transporter, TransporterRegistry};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Unified email client
pub struct EmailClient {
    transporter: RwLock<Arc<dyn Transporter>>,
    templates: TemplateCache,
    registry: TransporterRegistry,
}

impl EmailClient {
    /// Create a client using the default provider registry.
    pub async fn new(config: EmailClientConfig) -> EmailResult<Self> {
        Self::with_registry(config, TransporterRegistry::default()).await
    }

    /// Create a client selecting its transporter from `registry`.
    ///
    /// The transporter is selected before any template is read, so an
    /// unsupported provider id fails without touching the filesystem.
    pub async fn with_registry(
        config: EmailClientConfig,
        registry: TransporterRegistry,
    ) -> EmailResult<Self> {
        let EmailClientConfig {
            transporter,
            template_dir,
            options,
        } = config;

        let active = registry.create(&transporter, &options)?;
        info!(transporter = %active.name(), "Email transporter selected");

        let client = Self {
            transporter: RwLock::new(Arc::from(active)),
            templates: TemplateCache::new(),
            registry,
        };

        client.set_templates(template_dir.as_deref()).await?;

        Ok(client)
    }

    /// Replace the active transporter.
    ///
    /// Sends already in flight finish on the previous transporter.
    pub fn set_transporter(&self, id: &str, options: &ProviderOptions) -> EmailResult<()> {
        let transporter = self.registry.create(id, options)?;
        info!(transporter = %transporter.name(), "Email transporter replaced");

        *self.transporter.write() = Arc::from(transporter);
        Ok(())
    }

    /// Rebuild the template cache from `dir`. `None` leaves it untouched.
    pub async fn set_templates(&self, dir: Option<&Path>) -> EmailResult<()> {
        if let Some(dir) = dir {
            self.templates.load(dir).await?;
        }
        Ok(())
    }

    /// Register helpers and run a configure callback on the template engine.
    ///
    /// Only templates loaded afterwards see the change.
    pub fn configure_template_engine(&self, configuration: HandlebarsConfiguration) {
        self.templates.engine().apply(configuration);
    }

    /// Render the message's template, if any, into its HTML body
    pub fn resolve(&self, message: Message) -> EmailResult<OutboundMessage> {
        message.resolve_with(|name, data| self.templates.render(name, data))
    }

    /// Send a message through the active transporter.
    ///
    /// The transporter's result or error is returned as is.
    pub async fn send(&self, message: Message) -> EmailResult<SendResult> {
        let outbound = self.resolve(message)?;
        let transporter = self.transporter();

        debug!(
            transporter = %transporter.name(),
            to = ?outbound.to,
            "Sending email"
        );

        transporter.send(outbound).await
    }

    /// The active transporter
    pub fn transporter(&self) -> Arc<dyn Transporter> {
        self.transporter.read().clone()
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    pub fn registry(&self) -> &TransporterRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmailError;
    use crate::transporter::{MailGun, MemoryTransporter};
    use handlebars::handlebars_helper;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn registry(memory: &MemoryTransporter) -> TransporterRegistry {
        let mut registry = TransporterRegistry::default();
        let memory = memory.clone();
        registry.register("memory", move |_| {
            Ok(Box::new(memory.clone()) as Box<dyn Transporter>)
        });
        registry
    }

    fn template_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.hbs"), "<p>x = {{x}}</p>").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_send_renders_template_before_transport() {
        let memory = MemoryTransporter::new();
        let dir = template_dir();
        let config = EmailClientConfig::new("memory").with_template_dir(dir.path());
        let client = EmailClient::with_registry(config, registry(&memory))
            .await
            .unwrap();

        let message = Message::new("me@example.com")
            .to("you@example.com")
            .subject("Hello")
            .template("a.hbs", json!({ "x": 1 }));

        let result = client.send(message).await.unwrap();
        assert_eq!(result.id.as_deref(), Some("memory-1"));

        let sent = memory.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].html.as_deref(), Some("<p>x = 1</p>"));
        assert_eq!(sent[0].subject.as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn test_missing_template_fails_before_transport() {
        let memory = MemoryTransporter::new();
        let client = EmailClient::with_registry(EmailClientConfig::new("memory"), registry(&memory))
            .await
            .unwrap();

        let err = client
            .send(Message::new("me@example.com").template("missing.hbs", json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, EmailError::TemplateNotFound { ref name } if name == "missing.hbs"));
        assert_eq!(memory.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_transporter_is_rejected_at_construction() {
        let result = EmailClient::new(EmailClientConfig::new("unknown")).await;

        match result {
            Err(EmailError::Configuration(message)) => {
                assert!(message.contains("'unknown'"));
                assert!(message.contains("mailgun"));
            }
            Err(other) => panic!("expected configuration error, got {:?}", other),
            Ok(_) => panic!("expected configuration error"),
        }
    }

    #[tokio::test]
    async fn test_unknown_transporter_is_checked_before_templates() {
        let config =
            EmailClientConfig::new("unknown").with_template_dir("/definitely/not/a/template/dir");

        let result = EmailClient::new(config).await;

        assert!(matches!(result, Err(EmailError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_missing_template_dir_propagates() {
        let memory = MemoryTransporter::new();
        let config =
            EmailClientConfig::new("memory").with_template_dir("/definitely/not/a/template/dir");

        let result = EmailClient::with_registry(config, registry(&memory)).await;

        assert!(matches!(result, Err(EmailError::Filesystem(_))));
    }

    #[tokio::test]
    async fn test_set_transporter() {
        let memory = MemoryTransporter::new();
        let client = EmailClient::with_registry(EmailClientConfig::new("memory"), registry(&memory))
            .await
            .unwrap();
        let before = client.transporter();

        let options = ProviderOptions::from_iter([
            ("api_key".to_string(), json!("key-123")),
            ("domain".to_string(), json!("mg.example.com")),
        ]);
        client.set_transporter("MailGun", &options).unwrap();

        assert_eq!(before.name(), "memory");
        assert_eq!(client.transporter().name(), "mailgun");
        assert!(client
            .transporter()
            .as_any()
            .downcast_ref::<MailGun>()
            .is_some());
    }

    #[tokio::test]
    async fn test_set_transporter_unknown_keeps_current() {
        let memory = MemoryTransporter::new();
        let client = EmailClient::with_registry(EmailClientConfig::new("memory"), registry(&memory))
            .await
            .unwrap();

        let err = client
            .set_transporter("postmark", &ProviderOptions::new())
            .unwrap_err();

        assert!(matches!(err, EmailError::Configuration(_)));
        assert_eq!(client.transporter().name(), "memory");
    }

    #[tokio::test]
    async fn test_set_templates_none_is_noop() {
        let memory = MemoryTransporter::new();
        let dir = template_dir();
        let config = EmailClientConfig::new("memory").with_template_dir(dir.path());
        let client = EmailClient::with_registry(config, registry(&memory))
            .await
            .unwrap();

        client.set_templates(None).await.unwrap();

        assert_eq!(client.templates().names(), vec!["a.hbs"]);
    }

    #[tokio::test]
    async fn test_configure_template_engine_applies_to_next_load() {
        handlebars_helper!(shout: |s: str| s.to_uppercase());

        let memory = MemoryTransporter::new();
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("greet.hbs"), "{{shout name}}").unwrap();

        let client = EmailClient::with_registry(EmailClientConfig::new("memory"), registry(&memory))
            .await
            .unwrap();
        client.configure_template_engine(HandlebarsConfiguration::new().helper("shout", shout));
        client.set_templates(Some(dir.path())).await.unwrap();

        let outbound = client
            .resolve(Message::new("me@example.com").template("greet.hbs", json!({ "name": "ada" })))
            .unwrap();

        assert_eq!(outbound.html.as_deref(), Some("ADA"));
    }
}
