//! AWS SES (Simple Email Service) transporter
//!
//! SES only accepts a single raw MIME document here, so every message is
//! composed locally first. A composition failure fails the send before SES
//! is contacted.
//!
//! ## Configuration
//!
//! [`AwsSes::from_options`] builds a client from explicit static credentials
//! (`api_key`, `secret`, `region`). [`AwsSes::from_env`] uses the AWS SDK
//! default credential chain instead (environment, IRSA, instance profile,
//! shared credentials file).

use crate::attachments;
use crate::error::{BoxError, EmailError, EmailResult};
use crate::models::OutboundMessage;
use crate::transporter::normalize::{join_addresses, non_empty};
use crate::transporter::{parse_options, ProviderOptions, SendResult, Transporter};
use async_trait::async_trait;
use aws_sdk_sesv2::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_sesv2::primitives::Blob;
use aws_sdk_sesv2::types::{EmailContent, RawMessage};
use aws_sdk_sesv2::Client;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::{Attachment as MimeAttachmentPart, Mailbox, Mailboxes, MultiPart, SinglePart};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::any::Any;
use tracing::{debug, error};

/// SES provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AwsSesConfig {
    #[serde(alias = "apiKey", alias = "accessKeyId")]
    pub api_key: String,
    #[serde(alias = "secretAccessKey")]
    pub secret: String,
    pub region: String,
    /// Custom endpoint, e.g. LocalStack
    #[serde(default, alias = "endpointUrl")]
    pub endpoint_url: Option<String>,
}

/// Attachment in the composed MIME document
#[derive(Debug, Clone, PartialEq)]
pub struct MimeAttachment {
    pub filename: String,
    /// Content encoded as described by `encoding`
    pub content: String,
    pub content_type: Option<String>,
    pub encoding: String,
}

/// Normalized SES payload, input to MIME composition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SesMail {
    pub from: String,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub reply_to: Option<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Option<Vec<MimeAttachment>>,
    pub extra: Map<String, Value>,
}

/// Builds the raw MIME document SES sends
#[cfg_attr(test, mockall::automock)]
pub trait MimeComposer: Send + Sync + 'static {
    fn compose(&self, mail: &SesMail) -> Result<Vec<u8>, BoxError>;
}

/// SES client capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SesApi: Send + Sync + 'static {
    async fn send_raw_email(&self, data: Vec<u8>) -> Result<Value, BoxError>;
}

#[async_trait]
impl SesApi for Client {
    async fn send_raw_email(&self, data: Vec<u8>) -> Result<Value, BoxError> {
        let raw = RawMessage::builder().data(Blob::new(data)).build()?;

        let response = self
            .send_email()
            .content(EmailContent::builder().raw(raw).build())
            .send()
            .await?;

        Ok(json!({ "message_id": response.message_id() }))
    }
}

/// MIME composer built on lettre's message builder
///
/// Of the pass-through fields only `headers` (an object of header name to
/// value) reaches the MIME document, as custom headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LettreComposer;

impl LettreComposer {
    fn body(text: Option<String>, html: Option<String>) -> Body {
        match (text, html) {
            (Some(text), Some(html)) => Body::Multi(MultiPart::alternative_plain_html(text, html)),
            (None, Some(html)) => Body::Single(SinglePart::html(html)),
            (text, None) => Body::Single(SinglePart::plain(text.unwrap_or_default())),
        }
    }
}

enum Body {
    Single(SinglePart),
    Multi(MultiPart),
}

impl MimeComposer for LettreComposer {
    fn compose(&self, mail: &SesMail) -> Result<Vec<u8>, BoxError> {
        let mut builder = lettre::Message::builder().from(mail.from.parse::<Mailbox>()?);

        if let Some(to) = &mail.to {
            for mailbox in to.parse::<Mailboxes>()? {
                builder = builder.to(mailbox);
            }
        }
        if let Some(cc) = &mail.cc {
            for mailbox in cc.parse::<Mailboxes>()? {
                builder = builder.cc(mailbox);
            }
        }
        if let Some(bcc) = &mail.bcc {
            for mailbox in bcc.parse::<Mailboxes>()? {
                builder = builder.bcc(mailbox);
            }
        }
        if let Some(reply_to) = &mail.reply_to {
            builder = builder.reply_to(reply_to.parse::<Mailbox>()?);
        }
        if let Some(subject) = &mail.subject {
            builder = builder.subject(subject);
        }
        if let Some(headers) = mail.extra.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let name = HeaderName::new_from_ascii(name.clone())?;
                builder = builder.raw_header(HeaderValue::new(name, value));
            }
        }

        // SES delivers Bcc recipients from the raw document, keep the header
        builder = builder.keep_bcc();

        let body = Self::body(mail.text.clone(), mail.html.clone());

        let message = match &mail.attachments {
            None => match body {
                Body::Single(part) => builder.singlepart(part)?,
                Body::Multi(part) => builder.multipart(part)?,
            },
            Some(attachments) => {
                let mut mixed = match body {
                    Body::Single(part) => MultiPart::mixed().singlepart(part),
                    Body::Multi(part) => MultiPart::mixed().multipart(part),
                };

                for attachment in attachments {
                    let content = STANDARD.decode(&attachment.content)?;
                    let content_type = ContentType::parse(
                        attachment
                            .content_type
                            .as_deref()
                            .unwrap_or("application/octet-stream"),
                    )?;
                    mixed = mixed.singlepart(
                        MimeAttachmentPart::new(attachment.filename.clone()).body(content, content_type),
                    );
                }

                builder.multipart(mixed)?
            }
        };

        Ok(message.formatted())
    }
}

/// AWS SES transporter
pub struct AwsSes<C = Client, M = LettreComposer> {
    client: C,
    composer: M,
}

impl AwsSes<Client, LettreComposer> {
    pub fn new(config: AwsSesConfig) -> Self {
        let credentials = Credentials::new(
            config.api_key,
            config.secret,
            None, // session token
            None, // expiry
            "mailer",
        );

        let mut builder = aws_sdk_sesv2::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials);

        if let Some(endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        Self::with_client(Client::from_conf(builder.build()))
    }

    pub fn from_options(options: &ProviderOptions) -> EmailResult<Self> {
        let config: AwsSesConfig = parse_options("ses", options)?;
        Ok(Self::new(config))
    }

    /// Create from the default AWS SDK config
    ///
    /// `AWS_SES_REGION` overrides `AWS_REGION` when set.
    pub async fn from_env() -> Self {
        let mut loader = aws_config::from_env();

        if let Ok(region) = std::env::var("AWS_SES_REGION") {
            loader = loader.region(Region::new(region));
        }

        let config = loader.load().await;
        Self::with_client(Client::new(&config))
    }
}

impl<C: SesApi> AwsSes<C, LettreComposer> {
    pub fn with_client(client: C) -> Self {
        Self::with_parts(client, LettreComposer)
    }
}

impl<C: SesApi, M: MimeComposer> AwsSes<C, M> {
    pub fn with_parts(client: C, composer: M) -> Self {
        Self { client, composer }
    }

    /// The owned SES client, for calls that bypass normalization
    pub fn get(&self) -> &C {
        &self.client
    }

    /// Normalize a message into the composer input
    pub async fn transform(&self, message: OutboundMessage) -> EmailResult<SesMail> {
        let resolved = attachments::resolve_all(&message.attachments).await?;
        let attachments = non_empty(
            resolved
                .into_iter()
                .map(|a| MimeAttachment {
                    content: a.to_base64(),
                    filename: a.filename,
                    content_type: a.content_type,
                    encoding: "base64".to_string(),
                })
                .collect(),
        );

        Ok(SesMail {
            to: join_addresses(&message.to),
            cc: join_addresses(&message.cc),
            bcc: join_addresses(&message.bcc),
            from: message.from,
            reply_to: message.reply_to,
            subject: message.subject,
            text: message.text,
            html: message.html,
            attachments,
            extra: message.extra,
        })
    }
}

#[async_trait]
impl<C: SesApi, M: MimeComposer> Transporter for AwsSes<C, M> {
    async fn send(&self, message: OutboundMessage) -> EmailResult<SendResult> {
        let mail = self.transform(message).await?;

        let raw = self.composer.compose(&mail).map_err(|e| {
            error!(error = %e, "MIME composition failed");
            EmailError::Composition(e)
        })?;

        debug!(
            to = ?mail.to,
            subject = ?mail.subject,
            size = raw.len(),
            "Sending raw email via AWS SES"
        );

        let response = self.client.send_raw_email(raw).await.map_err(|e| {
            error!(error = %e, "AWS SES send failed");
            EmailError::Provider(e)
        })?;

        Ok(SendResult::from_response(response, "message_id"))
    }

    fn name(&self) -> &'static str {
        "ses"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
