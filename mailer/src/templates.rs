use crate::{DunningNotice, Recipient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

/// Formats minor currency units, e.g. `4900, "usd"` -> `$49.00`.
pub fn format_amount(amount: i64, currency: &str) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let value = format!("{}.{:02}", abs / 100, abs % 100);
    if currency.eq_ignore_ascii_case("usd") {
        format!("{sign}${value}")
    } else {
        format!("{sign}{value} {}", currency.to_ascii_uppercase())
    }
}

pub fn dunning_subject(attempt: u32, app_name: &str) -> String {
    match attempt {
        0 | 1 => format!("Action required: Payment failed — {app_name}"),
        2 => format!("Reminder: Your payment didn't go through — {app_name}"),
        _ => format!("Final notice: Update your payment details — {app_name}"),
    }
}

pub fn is_final_notice(attempt: u32) -> bool {
    attempt >= 3
}

pub fn welcome(to: &Recipient, plan_name: &str, app_name: &str, app_url: &str) -> RenderedEmail {
    RenderedEmail {
        subject: format!("Welcome to {plan_name} — {app_name}"),
        html: format!(
            r#"<div style="font-family:Inter,sans-serif;max-width:560px;margin:0 auto;padding:32px 24px;">
  <h1 style="font-size:24px;font-weight:700;color:#111827;">You're on {plan_name}</h1>
  <p style="color:#6b7280;">Hi {name}, your upgrade is live. All premium features are now unlocked.</p>
  <a href="{app_url}/dashboard" style="display:inline-block;background:#7c3aed;color:#fff;padding:12px 24px;border-radius:8px;text-decoration:none;">Go to Dashboard</a>
</div>"#,
            name = to.greeting_name(),
        ),
    }
}

pub fn dunning(to: &Recipient, notice: &DunningNotice, app_name: &str) -> RenderedEmail {
    let final_notice = if is_final_notice(notice.attempt) {
        r#"<p style="color:#ef4444;font-size:13px;"><strong>This is our final notice.</strong> Your account will be downgraded to the Free plan if payment isn't updated within 24 hours.</p>"#
    } else {
        ""
    };

    RenderedEmail {
        subject: dunning_subject(notice.attempt, app_name),
        html: format!(
            r#"<div style="font-family:Inter,sans-serif;max-width:560px;margin:0 auto;padding:32px 24px;">
  <h1 style="font-size:24px;font-weight:700;color:#111827;">Payment failed</h1>
  <p style="color:#6b7280;">Hi {name}, we couldn't process your payment of <strong>{amount}</strong>.</p>
  <p style="color:#6b7280;">To keep your subscription active, please update your payment details.</p>
  <a href="{portal_url}" style="display:inline-block;background:#7c3aed;color:#fff;padding:12px 24px;border-radius:8px;text-decoration:none;">Update Payment Details</a>
  {final_notice}
</div>"#,
            name = to.greeting_name(),
            amount = format_amount(notice.amount, &notice.currency),
            portal_url = notice.portal_url,
        ),
    }
}
