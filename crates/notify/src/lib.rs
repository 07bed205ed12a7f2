pub mod desktop;
pub mod email;
pub mod message;

use std::sync::Arc;

use tracing::{info, warn};

use common::{MailSettings, NotificationSink};

pub use desktop::DesktopNotifier;
pub use email::{EmailNotifier, Security, SmtpEndpoint};
pub use message::AlertMessage;

/// Build the sinks described by local settings. Broken mail settings are
/// logged and leave email off rather than failing startup.
pub fn build_sinks(desktop: bool, mail: Option<&MailSettings>) -> Vec<Arc<dyn NotificationSink>> {
    let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();

    if desktop {
        sinks.push(Arc::new(DesktopNotifier::new()));
    }

    match mail.map(EmailNotifier::from_settings) {
        Some(Ok(Some(email))) => sinks.push(Arc::new(email)),
        Some(Ok(None)) | None => info!("Email notifications not configured"),
        Some(Err(e)) => warn!(error = %e, "Ignoring invalid mail settings"),
    }

    sinks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_flag_controls_desktop_sink() {
        let names = |sinks: Vec<Arc<dyn NotificationSink>>| {
            sinks.iter().map(|s| s.name().to_string()).collect::<Vec<_>>()
        };
        assert_eq!(names(build_sinks(true, None)), vec!["desktop"]);
        assert!(build_sinks(false, None).is_empty());
    }

    #[test]
    fn incomplete_mail_settings_add_no_email_sink() {
        let mail = MailSettings { service: Some("gmail".into()), ..MailSettings::default() };
        assert!(build_sinks(false, Some(&mail)).is_empty());
    }
}
