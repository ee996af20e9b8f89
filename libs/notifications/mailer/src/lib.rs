//! Unified email sending library
//!
//! One [`EmailClient`] fronts several delivery providers. Callers build a
//! [`Message`], optionally addressed by template, and the client renders it
//! and hands it to the active [`Transporter`].
//!
//! ## Components
//!
//! - **Templates**: Handlebars `.hbs`/`.handlebars` and MJML `.mjml` files,
//!   precompiled into a `TemplateCache` keyed by file name
//! - **Transporters**: `MailGun`, `SendGrid` and `AwsSes` adapters, plus an
//!   in-memory transporter for tests
//! - **Client**: `EmailClient` selecting a transporter by provider id
//!
//! ## Usage
//!
//! ```ignore
//! use mailer::{EmailClient, EmailClientConfig, Message};
//! use serde_json::json;
//!
//! let config = EmailClientConfig::new("mailgun")
//!     .with_template_dir("./templates")
//!     .with_option("api_key", "key-...")
//!     .with_option("domain", "mg.example.com");
//!
//! let client = EmailClient::new(config).await?;
//! client
//!     .send(
//!         Message::new("noreply@example.com")
//!             .to("user@example.com")
//!             .subject("Welcome")
//!             .template("welcome.hbs", json!({ "name": "Ada" })),
//!     )
//!     .await?;
//! ```

pub mod attachments;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod templates;
pub mod transporter;

pub use attachments::{Attachment, AttachmentSource};
pub use client::EmailClient;
pub use config::EmailClientConfig;
pub use error::{BoxError, EmailError, EmailResult};
pub use models::{Body, Message, OutboundMessage};
pub use templates::{HandlebarsConfiguration, TemplateCache, TemplateEngine};
pub use transporter::{
    AwsSes, MailGun, MemoryTransporter, ProviderOptions, SendGrid, SendResult, Transporter,
    TransporterRegistry,
};
