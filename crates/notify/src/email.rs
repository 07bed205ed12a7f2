use async_trait::async_trait;
use chrono::Local;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use common::{Alarm, Error, MailSettings, NotificationSink, Result};

use crate::message::AlertMessage;

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte (port 465).
    Implicit,
    /// Plain connection upgraded with STARTTLS, refusing to continue without it.
    StartTls,
    /// STARTTLS when the server offers it.
    Opportunistic,
}

/// Resolved SMTP server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpEndpoint {
    pub host: String,
    pub port: u16,
    pub security: Security,
}

impl SmtpEndpoint {
    /// Well-known providers first, then an explicit host and port.
    pub fn resolve(settings: &MailSettings) -> Option<Self> {
        if let Some(endpoint) = settings.service.as_deref().and_then(well_known) {
            return Some(endpoint);
        }

        let host = settings.host.as_deref().map(str::trim).filter(|h| !h.is_empty())?;
        let port = settings.port?;
        let security = match port {
            465 => Security::Implicit,
            587 | 25 => Security::StartTls,
            _ if settings.secure.unwrap_or(false) => Security::Implicit,
            _ => Security::Opportunistic,
        };
        Some(Self { host: host.to_string(), port, security })
    }
}

fn well_known(service: &str) -> Option<SmtpEndpoint> {
    let (host, port, security) = match service.trim().to_lowercase().as_str() {
        "gmail" => ("smtp.gmail.com", 465, Security::Implicit),
        "yahoo" => ("smtp.mail.yahoo.com", 465, Security::Implicit),
        "outlook" => ("smtp-mail.outlook.com", 587, Security::StartTls),
        "icloud" => ("smtp.mail.me.com", 587, Security::StartTls),
        _ => return None,
    };
    Some(SmtpEndpoint { host: host.to_string(), port, security })
}

/// Sends fired alarms by email.
///
/// Built once per `MailSettings`; changing the settings means building a new
/// notifier and swapping it into the dispatcher.
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    /// `Ok(None)` when the settings are incomplete: email is simply off.
    pub fn from_settings(settings: &MailSettings) -> Result<Option<Self>> {
        if settings.user.trim().is_empty() || settings.pass.is_empty() {
            debug!("Email notifier disabled: no credentials");
            return Ok(None);
        }
        let Some(recipient) = settings.recipient.as_deref().filter(|r| !r.trim().is_empty()) else {
            debug!("Email notifier disabled: no recipient");
            return Ok(None);
        };
        let Some(endpoint) = SmtpEndpoint::resolve(settings) else {
            debug!("Email notifier disabled: no known service or host/port");
            return Ok(None);
        };

        let from: Mailbox = settings
            .user
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid sender address: {e}")))?;
        let to: Mailbox = recipient
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid recipient address: {e}")))?;

        let credentials =
            Credentials::new(settings.user.trim().to_string(), settings.pass.clone());
        let smtp_err = |e: lettre::transport::smtp::Error| {
            Error::Config(format!("SMTP setup failed: {e}"))
        };

        type Transport = AsyncSmtpTransport<Tokio1Executor>;
        let builder = match endpoint.security {
            Security::Implicit => Transport::relay(&endpoint.host).map_err(smtp_err)?,
            Security::StartTls => Transport::starttls_relay(&endpoint.host).map_err(smtp_err)?,
            Security::Opportunistic => {
                let tls = TlsParameters::new(endpoint.host.clone()).map_err(smtp_err)?;
                Transport::builder_dangerous(&endpoint.host).tls(Tls::Opportunistic(tls))
            }
        };
        let transport = builder.port(endpoint.port).credentials(credentials).build();

        info!(
            host = %endpoint.host,
            port = endpoint.port,
            security = ?endpoint.security,
            "Email notifier configured"
        );
        Ok(Some(Self { transport, from, to }))
    }

    async fn send(&self, subject: String, html: String) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| Error::Notify(format!("failed to build email: {e}")))?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| Error::Notify(format!("failed to send email: {e}")))?;
        debug!(code = %response.code(), "Email accepted by SMTP server");
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify_fired(&self, alarm: &Alarm) -> Result<()> {
        let msg = AlertMessage::for_alarm(alarm);
        self.send(msg.email_subject, msg.email_html).await
    }

    async fn send_test(&self) -> Result<()> {
        let html = format!(
            "<h1>This is a test email from PriceWatch!</h1>\n\
             <p>If you received this, your email settings are working correctly.</p>\n\
             <p>Sent at: {}</p>\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        self.send("PriceWatch - Test Email".to_string(), html).await
    }
}
