//! Send one email through the configured provider
//!
//! Provider selection and credentials come from `EMAIL_*` variables, e.g.
//!
//! ```text
//! EMAIL_TRANSPORTER=mailgun EMAIL_API_KEY=key-... EMAIL_DOMAIN=mg.example.com \
//!   cargo run -p send_email -- --from me@example.com --to you@example.com \
//!   --subject Hello --text "Hi there"
//! ```

use clap::Parser;
use core_config::{Environment, FromEnv, tracing::init_tracing};
use eyre::{Result, WrapErr};
use mailer::{Attachment, EmailClient, EmailClientConfig, Message};
use serde_json::{Value, json};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Send an email through the configured provider")]
struct Args {
    /// Sender address
    #[arg(long, env = "EMAIL_FROM")]
    from: String,

    /// Recipient (repeatable)
    #[arg(long, required = true)]
    to: Vec<String>,

    #[arg(long)]
    cc: Vec<String>,

    #[arg(long)]
    bcc: Vec<String>,

    #[arg(long)]
    subject: Option<String>,

    #[arg(long)]
    reply_to: Option<String>,

    /// Plain text body
    #[arg(long)]
    text: Option<String>,

    /// HTML body
    #[arg(long, conflicts_with = "template")]
    html: Option<String>,

    /// Template file name from EMAIL_TEMPLATE_DIR, e.g. welcome.hbs
    #[arg(long)]
    template: Option<String>,

    /// Template data as a JSON object
    #[arg(long, requires = "template")]
    data: Option<String>,

    /// File to attach (repeatable)
    #[arg(long)]
    attach: Vec<PathBuf>,
}

impl Args {
    fn into_message(self) -> Result<Message> {
        let mut message = Message::new(self.from);

        for address in self.to {
            message = message.to(address);
        }
        for address in self.cc {
            message = message.cc(address);
        }
        for address in self.bcc {
            message = message.bcc(address);
        }
        if let Some(subject) = self.subject {
            message = message.subject(subject);
        }
        if let Some(reply_to) = self.reply_to {
            message = message.reply_to(reply_to);
        }
        if let Some(text) = self.text {
            message = message.text(text);
        }
        if let Some(html) = self.html {
            message = message.html(html);
        }
        if let Some(template) = self.template {
            let data: Value = match self.data {
                Some(data) => serde_json::from_str(&data).wrap_err("--data is not valid JSON")?,
                None => json!({}),
            };
            message = message.template(template, data);
        }

        for path in self.attach {
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| eyre::eyre!("attachment path has no file name: {}", path.display()))?;
            message = message.attachment(Attachment::from_path(filename, path));
        }

        Ok(message)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    core_config::tracing::install_color_eyre();

    let args = Args::parse();

    let environment = Environment::from_env();
    init_tracing(&environment);

    let config = EmailClientConfig::from_env().wrap_err("Failed to load email configuration")?;
    info!(transporter = %config.transporter, "Starting send_email");

    let client = EmailClient::new(config)
        .await
        .wrap_err("Failed to create email client")?;

    let message = args.into_message()?;
    let result = client.send(message).await.wrap_err("Failed to send email")?;

    info!(id = ?result.id, "Email sent");
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "id": result.id,
            "response": result.response,
        }))?
    );

    Ok(())
}
