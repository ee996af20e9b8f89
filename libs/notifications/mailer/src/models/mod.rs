//! Message types.
//!
//! A [`Message`] is what callers build. Its [`Body`] is either
//! content-addressed (text/html already known) or template-addressed (a
//! template file name plus data). Resolving the body produces an
//! [`OutboundMessage`], the only shape transporters ever see.

use crate::attachments::Attachment;
use crate::error::EmailResult;
use serde_json::{Map, Value};

/// Message body, either literal content or a template reference
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Content {
        text: Option<String>,
        html: Option<String>,
    },
    Template {
        /// Template file name including extension, e.g. `welcome.hbs`
        name: String,
        data: Value,
        /// Plain text alternative sent alongside the rendered HTML
        text: Option<String>,
    },
}

impl Default for Body {
    fn default() -> Self {
        Self::Content {
            text: None,
            html: None,
        }
    }
}

/// Email message as built by callers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: Option<String>,
    pub reply_to: Option<String>,
    pub body: Body,
    pub attachments: Vec<Attachment>,
    /// Provider-specific fields, passed through untouched
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Default::default()
        }
    }

    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(address.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    /// Set the plain text body, keeping whichever body variant is active
    pub fn text(mut self, value: impl Into<String>) -> Self {
        match &mut self.body {
            Body::Content { text, .. } | Body::Template { text, .. } => *text = Some(value.into()),
        }
        self
    }

    /// Set the HTML body. Replaces a template reference, if any.
    pub fn html(mut self, value: impl Into<String>) -> Self {
        let text = self.take_text();
        self.body = Body::Content {
            text,
            html: Some(value.into()),
        };
        self
    }

    /// Address the body by template. Replaces any literal HTML.
    pub fn template(mut self, name: impl Into<String>, data: Value) -> Self {
        let text = self.take_text();
        self.body = Body::Template {
            name: name.into(),
            data,
            text,
        };
        self
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Add a pass-through field for the provider payload
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn template_name(&self) -> Option<&str> {
        match &self.body {
            Body::Template { name, .. } => Some(name),
            Body::Content { .. } => None,
        }
    }

    fn take_text(&mut self) -> Option<String> {
        match &mut self.body {
            Body::Content { text, .. } | Body::Template { text, .. } => text.take(),
        }
    }

    /// Turn this message into its content-addressed form.
    ///
    /// Template bodies are rendered with `render(name, data)` and the output
    /// becomes the HTML body; the template reference and its data are dropped.
    pub fn resolve_with<F>(self, render: F) -> EmailResult<OutboundMessage>
    where
        F: FnOnce(&str, &Value) -> EmailResult<String>,
    {
        let (text, html) = match self.body {
            Body::Content { text, html } => (text, html),
            Body::Template { name, data, text } => (text, Some(render(&name, &data)?)),
        };

        Ok(OutboundMessage {
            from: self.from,
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            subject: self.subject,
            reply_to: self.reply_to,
            text,
            html,
            attachments: self.attachments,
            extra: self.extra,
        })
    }
}

/// Content-addressed message handed to a transporter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: Option<String>,
    pub reply_to: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<Attachment>,
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmailError;
    use serde_json::json;

    #[test]
    fn test_builder_collects_recipients_in_order() {
        let message = Message::new("me@example.com")
            .to("a@example.com")
            .to("b@example.com")
            .cc("c@example.com")
            .subject("Hi");

        assert_eq!(message.to, vec!["a@example.com", "b@example.com"]);
        assert_eq!(message.cc, vec!["c@example.com"]);
        assert!(message.bcc.is_empty());
        assert_eq!(message.subject.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_template_replaces_html_and_keeps_text() {
        let message = Message::new("me@example.com")
            .text("plain")
            .html("<p>html</p>")
            .template("welcome.hbs", json!({"name": "Ada"}));

        assert_eq!(message.template_name(), Some("welcome.hbs"));
        assert_eq!(
            message.body,
            Body::Template {
                name: "welcome.hbs".to_string(),
                data: json!({"name": "Ada"}),
                text: Some("plain".to_string()),
            }
        );
    }

    #[test]
    fn test_resolve_with_renders_template_into_html() {
        let message = Message::new("me@example.com")
            .to("you@example.com")
            .template("welcome.hbs", json!({"name": "Ada"}))
            .extra("o:tag", "onboarding");

        let outbound = message
            .resolve_with(|name, data| {
                assert_eq!(name, "welcome.hbs");
                Ok(format!("<h1>{}</h1>", data["name"].as_str().unwrap_or_default()))
            })
            .unwrap();

        assert_eq!(outbound.html.as_deref(), Some("<h1>Ada</h1>"));
        assert_eq!(outbound.text, None);
        assert_eq!(outbound.extra.get("o:tag"), Some(&json!("onboarding")));
    }

    #[test]
    fn test_resolve_with_skips_render_for_content() {
        let message = Message::new("me@example.com").html("<p>hi</p>");

        let outbound = message
            .resolve_with(|_, _| panic!("content bodies are never rendered"))
            .unwrap();

        assert_eq!(outbound.html.as_deref(), Some("<p>hi</p>"));
    }

    #[test]
    fn test_resolve_with_propagates_render_error() {
        let message = Message::new("me@example.com").template("missing.hbs", Value::Null);

        let err = message
            .resolve_with(|name, _| {
                Err(EmailError::TemplateNotFound {
                    name: name.to_string(),
                })
            })
            .unwrap_err();

        assert!(matches!(err, EmailError::TemplateNotFound { name } if name == "missing.hbs"));
    }
}
