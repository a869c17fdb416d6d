use crate::types::{LeadOrigin, LeadRequest, RawLeadSubmission};

pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 2_000;
pub const MAX_ATTACHMENT_REFS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", describe(.missing_fields, .invalid_fields))]
pub struct ValidationError {
    pub missing_fields: Vec<&'static str>,
    pub invalid_fields: Vec<&'static str>,
}

fn describe(missing: &[&'static str], invalid: &[&'static str]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing required fields: {}", missing.join(", ")));
    }
    if !invalid.is_empty() {
        parts.push(format!("invalid fields: {}", invalid.join(", ")));
    }
    parts.join("; ")
}

#[derive(Clone, Debug)]
pub struct Validator {
    max_message_chars: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_CHARS)
    }
}

impl Validator {
    #[must_use]
    pub fn new(max_message_chars: usize) -> Self {
        Self {
            max_message_chars: max_message_chars.max(1),
        }
    }

    pub fn validate(&self, raw: RawLeadSubmission) -> Result<LeadRequest, ValidationError> {
        let mut missing_fields = Vec::new();
        let mut invalid_fields = Vec::new();

        let name = normalize_required(raw.name, "name", &mut missing_fields);
        let phone = normalize_required(raw.phone, "phone", &mut missing_fields);
        let service_name =
            normalize_required(raw.service_name, "serviceName", &mut missing_fields);

        let email = normalize_optional(raw.email);
        if email.as_deref().is_some_and(|value| !value.contains('@')) {
            invalid_fields.push("email");
        }

        let attachment_refs = raw
            .attachment_refs
            .unwrap_or_default()
            .into_iter()
            .map(|value| value.trim().to_string())
            .collect::<Vec<_>>();
        if attachment_refs.len() > MAX_ATTACHMENT_REFS
            || attachment_refs.iter().any(String::is_empty)
        {
            invalid_fields.push("attachmentRefs");
        }

        if !missing_fields.is_empty() || !invalid_fields.is_empty() {
            return Err(ValidationError {
                missing_fields,
                invalid_fields,
            });
        }

        Ok(LeadRequest {
            name: name.unwrap_or_default(),
            phone: phone.unwrap_or_default(),
            email,
            service_name: service_name.unwrap_or_default(),
            message: normalize_optional(raw.message)
                .map(|message| truncate_chars(&message, self.max_message_chars)),
            explicit_target_id: normalize_optional(raw.explicit_target_id),
            origin: raw
                .origin
                .as_deref()
                .map(LeadOrigin::from_tag)
                .unwrap_or_default(),
            attachment_refs,
        })
    }
}

fn normalize_required(
    value: Option<String>,
    field: &'static str,
    missing: &mut Vec<&'static str>,
) -> Option<String> {
    let normalized = normalize_optional(value);
    if normalized.is_none() {
        missing.push(field);
    }
    normalized
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Cuts at a character boundary, never inside a code point.
#[must_use]
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_index, _)) => value[..byte_index].to_string(),
        None => value.to_string(),
    }
}
