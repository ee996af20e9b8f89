//! SendGrid transporter
//!
//! Sends emails via SendGrid HTTP API.

use crate::attachments;
use crate::error::{BoxError, EmailError, EmailResult};
use crate::models::OutboundMessage;
use crate::transporter::normalize::{join_addresses, non_empty, split_addresses};
use crate::transporter::{error_body, parse_options, ProviderOptions, SendResult, Transporter};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::any::Any;
use thiserror::Error;
use tracing::{debug, error};

/// SendGrid API base URL
const SENDGRID_API_URL: &str = "https://api.sendgrid.com";

fn default_base_url() -> String {
    SENDGRID_API_URL.to_string()
}

/// SendGrid provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SendGridConfig {
    #[serde(alias = "apiKey")]
    pub api_key: String,
    #[serde(default = "default_base_url", alias = "baseUrl")]
    pub base_url: String,
}

/// Inline attachment in the SendGrid payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendGridAttachment {
    /// Base64 encoded content
    pub content: String,
    pub filename: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub disposition: String,
}

/// Normalized SendGrid payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendGridMail {
    pub from: String,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub reply_to: Option<String>,
    pub attachments: Option<Vec<SendGridAttachment>>,
    /// Pass-through fields such as `categories` or `send_at`
    pub extra: Map<String, Value>,
}

/// SendGrid client capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SendGridApi: Send + Sync + 'static {
    async fn send(&self, mail: SendGridMail) -> Result<Value, BoxError>;
}

/// Non-success response from the SendGrid API
#[derive(Debug, Error)]
#[error("SendGrid API error ({status}): {body}")]
pub struct SendGridApiError {
    pub status: u16,
    pub body: String,
}

/// SendGrid v3 API request payload
#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<EmailAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    content: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachments: Option<Vec<SendGridAttachment>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

fn addresses(list: Option<&str>) -> Vec<EmailAddress> {
    list.map(|list| {
        split_addresses(list)
            .map(|email| EmailAddress {
                email: email.to_string(),
            })
            .collect()
    })
    .unwrap_or_default()
}

impl From<SendGridMail> for SendGridRequest {
    fn from(mail: SendGridMail) -> Self {
        let mut content = Vec::new();

        // SendGrid requires text/plain to come before text/html
        if let Some(text) = mail.text {
            content.push(Content {
                content_type: "text/plain".to_string(),
                value: text,
            });
        }

        if let Some(html) = mail.html {
            content.push(Content {
                content_type: "text/html".to_string(),
                value: html,
            });
        }

        Self {
            personalizations: vec![Personalization {
                to: addresses(mail.to.as_deref()),
                cc: addresses(mail.cc.as_deref()),
                bcc: addresses(mail.bcc.as_deref()),
            }],
            from: EmailAddress { email: mail.from },
            reply_to: mail.reply_to.map(|email| EmailAddress { email }),
            subject: mail.subject,
            content,
            attachments: mail.attachments,
            extra: mail.extra,
        }
    }
}

/// HTTP client for the SendGrid v3 mail send endpoint
pub struct SendGridClient {
    http: Client,
    api_key: String,
    endpoint: String,
}

impl SendGridClient {
    pub fn new(config: &SendGridConfig) -> Self {
        Self {
            http: Client::new(),
            api_key: config.api_key.clone(),
            endpoint: format!("{}/v3/mail/send", config.base_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SendGridApi for SendGridClient {
    async fn send(&self, mail: SendGridMail) -> Result<Value, BoxError> {
        let request = SendGridRequest::from(mail);

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            // SendGrid returns the message id in a header, the body is empty
            let message_id = response
                .headers()
                .get("X-Message-Id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            Ok(json!({
                "status": status.as_u16(),
                "message_id": message_id,
            }))
        } else {
            let body = error_body(response.text().await);
            Err(Box::new(SendGridApiError {
                status: status.as_u16(),
                body,
            }))
        }
    }
}

/// SendGrid transporter
pub struct SendGrid<C = SendGridClient> {
    client: C,
}

impl SendGrid<SendGridClient> {
    pub fn new(config: SendGridConfig) -> Self {
        Self::with_client(SendGridClient::new(&config))
    }

    pub fn from_options(options: &ProviderOptions) -> EmailResult<Self> {
        let config: SendGridConfig = parse_options("sendgrid", options)?;
        Ok(Self::new(config))
    }
}

impl<C: SendGridApi> SendGrid<C> {
    pub fn with_client(client: C) -> Self {
        Self { client }
    }

    /// The owned SendGrid client, for calls that bypass normalization
    pub fn get(&self) -> &C {
        &self.client
    }

    /// Normalize a message into the SendGrid payload
    pub async fn transform(&self, message: OutboundMessage) -> EmailResult<SendGridMail> {
        let resolved = attachments::resolve_all(&message.attachments).await?;
        let attachments = non_empty(
            resolved
                .into_iter()
                .map(|a| SendGridAttachment {
                    content: a.to_base64(),
                    filename: a.filename,
                    content_type: a.content_type,
                    disposition: "attachment".to_string(),
                })
                .collect(),
        );

        Ok(SendGridMail {
            to: join_addresses(&message.to),
            cc: join_addresses(&message.cc),
            bcc: join_addresses(&message.bcc),
            from: message.from,
            subject: message.subject,
            text: message.text,
            html: message.html,
            reply_to: message.reply_to,
            attachments,
            extra: message.extra,
        })
    }
}

#[async_trait]
impl<C: SendGridApi> Transporter for SendGrid<C> {
    async fn send(&self, message: OutboundMessage) -> EmailResult<SendResult> {
        let mail = self.transform(message).await?;

        debug!(
            to = ?mail.to,
            subject = ?mail.subject,
            "Sending email via SendGrid"
        );

        let response = self.client.send(mail).await.map_err(|e| {
            error!(error = %e, "SendGrid send failed");
            EmailError::Provider(e)
        })?;

        Ok(SendResult::from_response(response, "message_id"))
    }

    fn name(&self) -> &'static str {
        "sendgrid"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
