//! Outbound mail for account flows.

use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{MailConfig, MailSecurity};

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(
        r#"^(([^<>()\[\]\\.,;:\s@"]+(\.[^<>()\[\]\\.,;:\s@"]+)*)|(".+"))@((\[[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\])|(([a-zA-Z\-0-9]+\.)+[a-zA-Z]{2,}))$"#
    ).unwrap();
}

/// Check that `email` looks like a deliverable address.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("mail was not sent within {0}s")]
    Timeout(u64),
    #[error("mail has no recipients")]
    NoRecipients,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub message: String,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: Mail) -> Result<(), MailError>;
}

/// Sends mail through an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let mut builder = match config.security {
            MailSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?,
            MailSecurity::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?,
            MailSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
        };
        builder = builder.port(config.port).timeout(Some(timeout));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        debug!("Using smtp relay {}:{} ({:?})", config.host, config.port, config.security);

        Ok(Self {
            transport: builder.build(),
            timeout,
        })
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, mail: Mail) -> Result<(), MailError> {
        if mail.to.is_empty() {
            return Err(MailError::NoRecipients);
        }

        let mut builder = Message::builder()
            .from(mail.from.parse::<Mailbox>()?)
            .subject(mail.subject)
            .header(ContentType::TEXT_HTML);
        for to in &mail.to {
            builder = builder.to(to.parse::<Mailbox>()?);
        }
        let message = builder.body(mail.message)?;

        match tokio::time::timeout(self.timeout, self.transport.send(message)).await {
            Ok(result) => {
                result?;
                info!("Sent mail to {}", mail.to.join(", "));
                Ok(())
            },
            Err(_) => Err(MailError::Timeout(self.timeout.as_secs())),
        }
    }
}

/// Body of the password reset mail.
pub fn render_reset_message(hint: &str, base_url: &str, reset_uuid: &str) -> String {
    let link = format!("{}/resetPassword?reset_uuid={}", base_url.trim_end_matches('/'), reset_uuid);

    format!(
        "<html>\n<body>\n<p>{hint}</p>\n<p><a href=\"{link}\">{link}</a></p>\n</body>\n</html>\n"
    )
}
