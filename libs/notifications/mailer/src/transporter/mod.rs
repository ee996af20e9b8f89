//! Transporter implementations
//!
//! A transporter turns an [`OutboundMessage`] into one provider's wire shape
//! and hands it to the provider client it owns. Provider errors are returned
//! as [`EmailError::Provider`] without retry or reinterpretation.

pub mod mailgun;
pub mod memory;
pub mod normalize;
pub mod sendgrid;
pub mod ses;

pub use mailgun::{MailGun, MailgunClient, MailgunConfig};
pub use memory::MemoryTransporter;
pub use sendgrid::{SendGrid, SendGridClient, SendGridConfig};
pub use ses::{AwsSes, AwsSesConfig, LettreComposer, MimeComposer};

use crate::error::{EmailError, EmailResult};
use crate::models::OutboundMessage;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Provider-specific configuration fields, passed through from the client config
pub type ProviderOptions = Map<String, Value>;

/// Result of a send, as reported by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct SendResult {
    /// Provider message id, when the provider returns one
    pub id: Option<String>,
    /// Raw provider response
    pub response: Value,
}

impl SendResult {
    /// Build a result from a provider response, reading the id from `id_field`
    pub fn from_response(response: Value, id_field: &str) -> Self {
        let id = response
            .get(id_field)
            .and_then(Value::as_str)
            .map(str::to_string);

        Self { id, response }
    }
}

/// Capability every provider adapter implements
#[async_trait]
pub trait Transporter: Send + Sync + 'static {
    /// Normalize the message into the provider's shape and send it
    async fn send(&self, message: OutboundMessage) -> EmailResult<SendResult>;

    /// Provider id
    fn name(&self) -> &'static str;

    /// Access the concrete adapter, e.g. to reach its provider client
    fn as_any(&self) -> &dyn Any;
}

type TransporterFactory =
    Arc<dyn Fn(&ProviderOptions) -> EmailResult<Box<dyn Transporter>> + Send + Sync>;

/// Maps provider ids to transporter factories
///
/// The default registry knows `mailgun`, `sendgrid` and `ses` (also
/// registered as `awsses`). Ids are
/// matched case-insensitively.
#[derive(Clone)]
pub struct TransporterRegistry {
    factories: BTreeMap<String, TransporterFactory>,
}

impl TransporterRegistry {
    /// Registry without any providers
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register (or replace) a provider factory
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ProviderOptions) -> EmailResult<Box<dyn Transporter>> + Send + Sync + 'static,
    {
        self.factories
            .insert(id.into().to_ascii_lowercase(), Arc::new(factory));
        self
    }

    pub fn is_supported(&self, id: &str) -> bool {
        self.factories.contains_key(&id.to_ascii_lowercase())
    }

    /// Supported provider ids, sorted
    pub fn supported(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the transporter registered under `id`.
    ///
    /// Unknown ids fail before any provider client is constructed.
    pub fn create(&self, id: &str, options: &ProviderOptions) -> EmailResult<Box<dyn Transporter>> {
        let factory = self
            .factories
            .get(&id.to_ascii_lowercase())
            .ok_or_else(|| {
                EmailError::Configuration(format!(
                    "Not supported transporter '{}'. Currently you can use [{}]",
                    id,
                    self.supported().join(", ")
                ))
            })?;

        factory(options)
    }
}

impl Default for TransporterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register("mailgun", |options| {
                Ok(Box::new(MailGun::from_options(options)?) as Box<dyn Transporter>)
            })
            .register("sendgrid", |options| {
                Ok(Box::new(SendGrid::from_options(options)?) as Box<dyn Transporter>)
            })
            .register("ses", ses_factory)
            .register("awsses", ses_factory);
        registry
    }
}

fn ses_factory(options: &ProviderOptions) -> EmailResult<Box<dyn Transporter>> {
    Ok(Box::new(AwsSes::from_options(options)?))
}

impl fmt::Debug for TransporterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransporterRegistry")
            .field("supported", &self.supported())
            .finish()
    }
}

/// Deserialize a provider's typed config from the pass-through options
pub(crate) fn parse_options<T: DeserializeOwned>(
    provider: &str,
    options: &ProviderOptions,
) -> EmailResult<T> {
    serde_json::from_value(Value::Object(options.clone())).map_err(|e| {
        EmailError::Configuration(format!("invalid {} configuration: {}", provider, e))
    })
}

/// Body of a failed provider response; a read failure is kept in the text
pub(crate) fn error_body<E: fmt::Display>(body: Result<String, E>) -> String {
    body.unwrap_or_else(|e| format!("<unreadable response body: {}>", e))
}
