use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use serde::Serialize;
use serde_json::Value;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Mutex,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::Notify;

use crate::config::MailConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    UserWelcome,
    PasswordReset,
}

/// A templated message for one recipient. `data` fills the template.
#[derive(Clone)]
pub struct Notification {
    pub template: Template,
    pub recipient_name: String,
    pub recipient_email: String,
    pub data: Value,
    pub sandbox: bool,
}

impl Notification {
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

// `data` carries one-time codes and stays out of logs.
impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("template", &self.template)
            .field("recipient_email", &self.recipient_email)
            .field("sandbox", &self.sandbox)
            .finish_non_exhaustive()
    }
}

/// Provider status code reported for an accepted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeliveryStatus(pub u16);

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("template {0:?} is missing field '{1}'")]
    Template(Template, &'static str),

    #[error("invalid address: {0}")]
    Address(String),

    #[error("delivery failed after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<DeliveryStatus, NotifierError>;
}

struct RenderedEmail {
    subject: &'static str,
    text: String,
    html: String,
}

fn render(notification: &Notification) -> Result<RenderedEmail, NotifierError> {
    let template = notification.template;
    let username = notification
        .data_str("username")
        .ok_or(NotifierError::Template(template, "username"))?;
    let code = notification
        .data_str("code")
        .ok_or(NotifierError::Template(template, "code"))?;

    let (subject, intro, action) = match template {
        Template::UserWelcome => (
            "Welcome! Activate your account",
            "Thanks for joining us. Use the code below to activate your account.",
            "This code expires in 3 days. If you did not sign up, ignore this email.",
        ),
        Template::PasswordReset => (
            "Your password reset code",
            "We received a request to reset your password. Use the code below to choose a new one.",
            "This code expires soon. If you did not ask for a reset, ignore this email.",
        ),
    };

    let text = format!("Hi {username},\n\n{intro}\n\n    {code}\n\n{action}\n");
    let html = format!(
        r#"<html>
    <body style="font-family: Arial, sans-serif;">
        <p>Hi {username},</p>
        <p>{intro}</p>
        <p style="font-size: 24px; letter-spacing: 4px; font-weight: bold;">{code}</p>
        <p style="color: #666; font-size: 12px;">{action}</p>
    </body>
</html>"#
    );

    Ok(RenderedEmail {
        subject,
        text,
        html,
    })
}

/// SMTP delivery with bounded exponential-backoff retries.
///
/// Sandbox notifications go to the same host over a plain, unauthenticated
/// connection, which is what local mail catchers expect.
#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: SmtpTransport,
    sandbox_mailer: SmtpTransport,
    from: Mailbox,
    max_retries: u32,
}

impl SmtpNotifier {
    pub fn new(config: &MailConfig) -> Result<Self, NotifierError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifierError::Address(e.to_string()))?;

        let mut builder = SmtpTransport::relay(&config.smtp_host)
            .map_err(|e| NotifierError::Transport {
                attempts: 0,
                message: e.to_string(),
            })?
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(10)));

        if !config.smtp_user.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_user.clone(),
                config.smtp_password.clone(),
            ));
        }

        tracing::info!(host = %config.smtp_host, port = config.smtp_port, "SMTP notifier initialized");

        let sandbox_mailer = SmtpTransport::builder_dangerous(&config.smtp_host)
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        Ok(Self {
            mailer: builder.build(),
            sandbox_mailer,
            from,
            max_retries: config.max_retries.max(1),
        })
    }

    fn build_message(&self, notification: &Notification) -> Result<Message, NotifierError> {
        let rendered = render(notification)?;
        let to = Mailbox::new(
            Some(notification.recipient_name.clone()),
            notification
                .recipient_email
                .parse()
                .map_err(|e: lettre::address::AddressError| NotifierError::Address(e.to_string()))?,
        );

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(rendered.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(rendered.text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(rendered.html),
                    ),
            )
            .map_err(|e| NotifierError::Address(e.to_string()))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: Notification) -> Result<DeliveryStatus, NotifierError> {
        let message = self.build_message(&notification)?;
        let mailer = if notification.sandbox {
            &self.sandbox_mailer
        } else {
            &self.mailer
        };

        let attempts = AtomicU32::new(0);
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let (attempts_ref, message_ref, mailer_ref) = (&attempts, &message, mailer);
        let max_retries = self.max_retries;

        let result = retry(policy, || async move {
            let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
            let mailer = mailer_ref.clone();
            let message = message_ref.clone();

            let outcome = tokio::task::spawn_blocking(move || mailer.send(&message))
                .await
                .map_err(|e| backoff::Error::permanent(e.to_string()))?;

            match outcome {
                Ok(response) => Ok(response),
                Err(e) if attempt >= max_retries || e.is_permanent() => {
                    Err(backoff::Error::permanent(e.to_string()))
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "notification delivery failed, retrying");
                    Err(backoff::Error::transient(e.to_string()))
                }
            }
        })
        .await;

        match result {
            Ok(response) => {
                let status = response
                    .code()
                    .to_string()
                    .parse()
                    .unwrap_or(250);
                tracing::info!(
                    template = ?notification.template,
                    to = %notification.recipient_email,
                    sandbox = notification.sandbox,
                    status,
                    "notification delivered"
                );
                Ok(DeliveryStatus(status))
            }
            Err(message) => Err(NotifierError::Transport {
                attempts: attempts.load(Ordering::SeqCst),
                message,
            }),
        }
    }
}

/// Records notifications instead of sending them; can be switched to fail
/// or held until released.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
    held: AtomicBool,
    release: Notify,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Parks every following `send` until `release` is called.
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// The `code` field of the most recent notification, if any.
    pub fn last_code(&self) -> Option<String> {
        self.sent()
            .last()
            .and_then(|n| n.data_str("code").map(str::to_string))
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, notification: Notification) -> Result<DeliveryStatus, NotifierError> {
        render(&notification)?;
        if self.held.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifierError::Transport {
                attempts: 1,
                message: "mock notifier configured to fail".to_string(),
            });
        }
        self.sent
            .lock()
            .map_err(|e| NotifierError::Transport {
                attempts: 1,
                message: format!("mock notifier mutex poisoned: {}", e),
            })?
            .push(notification);
        Ok(DeliveryStatus(202))
    }
}
