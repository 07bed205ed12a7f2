use common::Alarm;

pub const ALERT_TITLE: &str = "Crypto Price Alert!";

/// User-facing wording for a fired alarm, shared by every sink.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub title: String,
    pub body: String,
    pub email_subject: String,
    pub email_html: String,
}

impl AlertMessage {
    pub fn for_alarm(alarm: &Alarm) -> Self {
        let currency = alarm.currency.to_uppercase();
        let target = alarm.target_price;
        // Only fired alarms reach a sink, but render something sane regardless.
        let price = alarm.triggered_price.unwrap_or(target);
        let name = &alarm.coin_name;
        let direction = alarm.kind.to_string().to_uppercase();
        let html_name = escape_html(name);
        let html_currency = escape_html(&currency);

        Self {
            title: ALERT_TITLE.to_string(),
            body: format!(
                "{name} has reached your target of {currency} {target:.2}. \
                 Current price: {currency} {price:.2}"
            ),
            email_subject: format!("Crypto Price Alert: {name}"),
            email_html: format!(
                "<h1>Price Alert Triggered!</h1>\n\
                 <p><b>{html_name}</b> has reached your price target.</p>\n\
                 <ul>\n\
                 <li>Target Price: <b>{html_currency} {target:.2}</b></li>\n\
                 <li>Direction: <b>{direction}</b></li>\n\
                 <li>Triggered Price: <b>{html_currency} {price:.2}</b></li>\n\
                 </ul>\n"
            ),
        }
    }
}

/// Coin names and currencies come from the user; keep them as text.
fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::AlarmKind;

    #[test]
    fn body_names_coin_target_and_price() {
        let alarm = Alarm::new("bitcoin", "Bitcoin", AlarmKind::Up, 50_000.0, "usd")
            .into_fired(51_000.456, Utc::now());
        let msg = AlertMessage::for_alarm(&alarm);
        assert_eq!(msg.title, "Crypto Price Alert!");
        assert_eq!(
            msg.body,
            "Bitcoin has reached your target of USD 50000.00. Current price: USD 51000.46"
        );
        assert_eq!(msg.email_subject, "Crypto Price Alert: Bitcoin");
    }

    #[test]
    fn email_lists_direction_in_caps() {
        let alarm = Alarm::new("ethereum", "Ethereum", AlarmKind::Down, 2_000.0, "eur")
            .into_fired(1_999.0, Utc::now());
        let msg = AlertMessage::for_alarm(&alarm);
        assert!(msg.email_html.contains("Direction: <b>DOWN</b>"));
        assert!(msg.email_html.contains("Triggered Price: <b>EUR 1999.00</b>"));
    }

    #[test]
    fn email_html_escapes_coin_name() {
        let alarm = Alarm::new("x", "<script>alert(1)</script> & Co", AlarmKind::Up, 1.0, "usd")
            .into_fired(2.0, Utc::now());
        let msg = AlertMessage::for_alarm(&alarm);
        assert!(!msg.email_html.contains("<script>"));
        assert!(msg
            .email_html
            .contains("<b>&lt;script&gt;alert(1)&lt;/script&gt; &amp; Co</b>"));
        // Plain-text surfaces keep the name as typed.
        assert!(msg.body.starts_with("<script>alert(1)</script> & Co has reached"));
    }
}
