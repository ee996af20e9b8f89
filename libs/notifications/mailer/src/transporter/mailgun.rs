//! Mailgun transporter
//!
//! Sends emails via the Mailgun messages API as multipart form data.

use crate::attachments;
use crate::error::{BoxError, EmailError, EmailResult};
use crate::models::OutboundMessage;
use crate::transporter::normalize::{join_addresses, non_empty};
use crate::transporter::{error_body, parse_options, ProviderOptions, SendResult, Transporter};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::any::Any;
use thiserror::Error;
use tracing::{debug, error};

/// Mailgun API base URL
const MAILGUN_API_URL: &str = "https://api.mailgun.net";

fn default_base_url() -> String {
    MAILGUN_API_URL.to_string()
}

/// Mailgun provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MailgunConfig {
    #[serde(alias = "apiKey")]
    pub api_key: String,
    pub domain: String,
    /// Override for the EU region or tests
    #[serde(default = "default_base_url", alias = "baseUrl")]
    pub base_url: String,
}

/// Attachment as the Mailgun client expects it
#[derive(Debug, Clone, PartialEq)]
pub struct MailgunAttachment {
    pub filename: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

/// Normalized Mailgun payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MailgunMessage {
    pub from: String,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub reply_to: Option<String>,
    pub attachment: Option<Vec<MailgunAttachment>>,
    /// Pass-through fields such as `o:tag` or `v:custom`
    pub extra: Map<String, Value>,
}

/// Mailgun client capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailgunApi: Send + Sync + 'static {
    async fn send(&self, message: MailgunMessage) -> Result<Value, BoxError>;
}

/// Non-success response from the Mailgun API
#[derive(Debug, Error)]
#[error("Mailgun API error ({status}): {body}")]
pub struct MailgunApiError {
    pub status: u16,
    pub body: String,
}

/// HTTP client for the Mailgun messages endpoint
pub struct MailgunClient {
    http: Client,
    api_key: String,
    endpoint: String,
}

impl MailgunClient {
    pub fn new(config: &MailgunConfig) -> Self {
        Self {
            http: Client::new(),
            api_key: config.api_key.clone(),
            endpoint: format!(
                "{}/v3/{}/messages",
                config.base_url.trim_end_matches('/'),
                config.domain
            ),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn form(message: MailgunMessage) -> Result<Form, BoxError> {
        let mut form = Form::new().text("from", message.from);

        let fields = [
            ("to", message.to),
            ("cc", message.cc),
            ("bcc", message.bcc),
            ("subject", message.subject),
            ("text", message.text),
            ("html", message.html),
            ("h:Reply-To", message.reply_to),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                form = form.text(key, value);
            }
        }

        // Arrays become repeated fields, e.g. several `o:tag` values
        for (key, value) in message.extra {
            match value {
                Value::Array(items) => {
                    for item in items {
                        form = form.text(key.clone(), form_text(item));
                    }
                }
                other => form = form.text(key, form_text(other)),
            }
        }

        for attachment in message.attachment.unwrap_or_default() {
            let mut part = Part::bytes(attachment.data).file_name(attachment.filename);
            if let Some(content_type) = &attachment.content_type {
                part = part.mime_str(content_type)?;
            }
            form = form.part("attachment", part);
        }

        Ok(form)
    }
}

fn form_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[async_trait]
impl MailgunApi for MailgunClient {
    async fn send(&self, message: MailgunMessage) -> Result<Value, BoxError> {
        let form = Self::form(message)?;

        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth("api", Some(&self.api_key))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.json::<Value>().await?)
        } else {
            let body = error_body(response.text().await);
            Err(Box::new(MailgunApiError {
                status: status.as_u16(),
                body,
            }))
        }
    }
}

/// Mailgun transporter
pub struct MailGun<C = MailgunClient> {
    client: C,
}

impl MailGun<MailgunClient> {
    pub fn new(config: MailgunConfig) -> Self {
        Self::with_client(MailgunClient::new(&config))
    }

    pub fn from_options(options: &ProviderOptions) -> EmailResult<Self> {
        let config: MailgunConfig = parse_options("mailgun", options)?;
        Ok(Self::new(config))
    }
}

impl<C: MailgunApi> MailGun<C> {
    pub fn with_client(client: C) -> Self {
        Self { client }
    }

    /// The owned Mailgun client, for calls that bypass normalization
    pub fn get(&self) -> &C {
        &self.client
    }

    /// Normalize a message into the Mailgun payload
    pub async fn transform(&self, message: OutboundMessage) -> EmailResult<MailgunMessage> {
        let resolved = attachments::resolve_all(&message.attachments).await?;
        let attachment = non_empty(
            resolved
                .into_iter()
                .map(|a| MailgunAttachment {
                    filename: a.filename,
                    data: a.content,
                    content_type: a.content_type,
                })
                .collect(),
        );

        Ok(MailgunMessage {
            to: join_addresses(&message.to),
            cc: join_addresses(&message.cc),
            bcc: join_addresses(&message.bcc),
            from: message.from,
            subject: message.subject,
            text: message.text,
            html: message.html,
            reply_to: message.reply_to,
            attachment,
            extra: message.extra,
        })
    }
}

#[async_trait]
impl<C: MailgunApi> Transporter for MailGun<C> {
    async fn send(&self, message: OutboundMessage) -> EmailResult<SendResult> {
        let payload = self.transform(message).await?;

        debug!(
            to = ?payload.to,
            subject = ?payload.subject,
            attachments = payload.attachment.as_ref().map_or(0, Vec::len),
            "Sending email via Mailgun"
        );

        let response = self.client.send(payload).await.map_err(|e| {
            error!(error = %e, "Mailgun send failed");
            EmailError::Provider(e)
        })?;

        Ok(SendResult::from_response(response, "id"))
    }

    fn name(&self) -> &'static str {
        "mailgun"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
