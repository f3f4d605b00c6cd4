//! Typed view of the provider's form payload.
//!
//! Downstream consumers never touch the raw form: the validator either
//! produces a `WebhookPayload` or the request dies with a 400 reply.

use std::collections::HashMap;

/// Provider SIDs: two uppercase letters then 32 lowercase alphanumerics.
const SID_LEN: usize = 34;

/// One attached media item.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub url: url::Url,
    pub content_type: Option<String>,
}

/// A single validation problem, logged at `warn` and never echoed to the
/// sender.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    pub problem: String,
}

impl ValidationIssue {
    fn new(field: &str, problem: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            problem: problem.into(),
        }
    }
}

/// The validated inbound payload.
#[derive(Debug, Clone)]
pub struct WebhookPayload {
    /// Sender address in full `whatsapp:+<digits>` form.
    pub from: String,
    /// Message text; empty for media-only messages.
    pub body: String,
    /// Provider message id, the idempotency key.
    pub message_sid: String,
    pub profile_name: Option<String>,
    pub num_media: u32,
    pub media: Vec<MediaItem>,
    /// Remaining provider fields, passed through untouched.
    pub extra: HashMap<String, String>,
}

impl WebhookPayload {
    /// Canonical phone: the sender address without the `whatsapp:` prefix.
    pub fn phone(&self) -> &str {
        self.from.strip_prefix("whatsapp:").unwrap_or(&self.from)
    }

    /// Validate and re-shape the decoded form parameters.
    pub fn from_params(params: &[(String, String)]) -> Result<Self, Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        let lookup: HashMap<&str, &str> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let from = match lookup.get("From") {
            Some(from) if is_valid_from(from) => from.to_string(),
            Some(from) => {
                issues.push(ValidationIssue::new(
                    "From",
                    format!("expected whatsapp:+<digits>, got {} chars", from.len()),
                ));
                String::new()
            }
            None => {
                issues.push(ValidationIssue::new("From", "missing"));
                String::new()
            }
        };

        let body = match lookup.get("Body") {
            // Empty is allowed: media-only messages carry no text.
            Some(body) => body.to_string(),
            None => {
                issues.push(ValidationIssue::new("Body", "missing"));
                String::new()
            }
        };

        let message_sid = match lookup.get("MessageSid") {
            Some(sid) if is_valid_sid(sid) => sid.to_string(),
            Some(_) => {
                issues.push(ValidationIssue::new("MessageSid", "malformed sid"));
                String::new()
            }
            None => {
                issues.push(ValidationIssue::new("MessageSid", "missing"));
                String::new()
            }
        };

        let profile_name = lookup
            .get("ProfileName")
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string());

        let num_media = match lookup.get("NumMedia") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) => n,
                Err(_) => {
                    issues.push(ValidationIssue::new("NumMedia", "not a non-negative integer"));
                    0
                }
            },
            None => 0,
        };

        let mut media = Vec::new();
        for i in 0..10 {
            let Some(raw_url) = lookup.get(format!("MediaUrl{i}").as_str()) else {
                continue;
            };
            match url::Url::parse(raw_url) {
                Ok(parsed) => media.push(MediaItem {
                    url: parsed,
                    content_type: lookup
                        .get(format!("MediaContentType{i}").as_str())
                        .map(|v| v.to_string()),
                }),
                Err(_) => {
                    issues.push(ValidationIssue::new(&format!("MediaUrl{i}"), "invalid URL"));
                }
            }
        }

        let consumed = |key: &str| {
            matches!(key, "From" | "Body" | "MessageSid" | "ProfileName" | "NumMedia")
                || key.starts_with("MediaUrl")
                || key.starts_with("MediaContentType")
        };
        let extra: HashMap<String, String> = params
            .iter()
            .filter(|(k, _)| !consumed(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if issues.is_empty() {
            Ok(Self {
                from,
                body,
                message_sid,
                profile_name,
                num_media,
                media,
                extra,
            })
        } else {
            Err(issues)
        }
    }
}

/// `^whatsapp:\+\d+$`
fn is_valid_from(value: &str) -> bool {
    value
        .strip_prefix("whatsapp:+")
        .map(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

/// `^[A-Z]{2}[a-z0-9]{32}$`
fn is_valid_sid(value: &str) -> bool {
    value.len() == SID_LEN
        && value.as_bytes()[..2].iter().all(|b| b.is_ascii_uppercase())
        && value.as_bytes()[2..]
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Per-route add-on: reject bodies over `max_chars`.
pub fn validate_message_length(
    payload: &WebhookPayload,
    max_chars: usize,
) -> Result<(), ValidationIssue> {
    let len = payload.body.chars().count();
    if len > max_chars {
        return Err(ValidationIssue::new(
            "Body",
            format!("{len} chars exceeds limit of {max_chars}"),
        ));
    }
    Ok(())
}

/// Per-route add-on: bound the attachment count and content types.
pub fn validate_media(
    payload: &WebhookPayload,
    max_count: usize,
    allowed_types: &[&str],
) -> Result<(), ValidationIssue> {
    if payload.media.len() > max_count {
        return Err(ValidationIssue::new(
            "NumMedia",
            format!("{} attachments exceeds limit of {max_count}", payload.media.len()),
        ));
    }
    for item in &payload.media {
        if let Some(content_type) = &item.content_type {
            if !allowed_types.iter().any(|t| content_type.starts_with(t)) {
                return Err(ValidationIssue::new(
                    "MediaContentType",
                    format!("{content_type} not allowed"),
                ));
            }
        }
    }
    Ok(())
}
