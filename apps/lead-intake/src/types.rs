use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const LEAD_ID_PREFIX: &str = "lead_";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum LeadOrigin {
    #[default]
    WebForm,
    ChatWidget,
    Other,
}

impl LeadOrigin {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebForm => "web-form",
            Self::ChatWidget => "chat-widget",
            Self::Other => "other",
        }
    }

    /// Unknown tags collapse to `Other`; a blank tag means the default web form.
    #[must_use]
    pub fn from_tag(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "" | "web-form" | "web" | "form" => Self::WebForm,
            "chat-widget" | "chat" | "chatbot" => Self::ChatWidget,
            _ => Self::Other,
        }
    }
}

/// Opaque reference to a delivery channel. Only the relay interprets it.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelAddress(String);

impl ChannelAddress {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

// Addresses may embed relay credentials, keep them out of debug output.
impl fmt::Debug for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChannelAddress").field(&"<redacted>").finish()
    }
}

/// Inbound wire shape of a lead submission, before validation.
///
/// Older site forms post `service` and `contractorId`; both are still accepted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLeadSubmission {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "service")]
    pub service_name: Option<String>,
    pub message: Option<String>,
    #[serde(alias = "contractorId")]
    pub explicit_target_id: Option<String>,
    pub origin: Option<String>,
    pub attachment_refs: Option<Vec<String>>,
}

/// A validated lead. Only the validator constructs these for the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeadRequest {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_target_id: Option<String>,
    pub origin: LeadOrigin,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment_refs: Vec<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StorageTier {
    Primary,
    Fallback,
}

impl StorageTier {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "primary" => Some(Self::Primary),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredLead {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub storage_tier: StorageTier,
    #[serde(flatten)]
    pub request: LeadRequest,
}

impl StoredLead {
    /// Same lead, ignoring which tier accepted it.
    #[must_use]
    pub fn is_equivalent(&self, other: &StoredLead) -> bool {
        self.id == other.id && self.created_at == other.created_at && self.request == other.request
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", from = "ContractorRecord")]
pub struct Contractor {
    pub id: String,
    pub display_name: String,
    pub services_offered: Vec<String>,
    pub notification_address: Option<ChannelAddress>,
    pub phone: Option<String>,
}

/// Directory file shape. Older directory files name the contractor by `company`
/// or `name`, list a single `service`, and carry a per-contractor Telegram bot
/// as `telegramToken` plus `telegramChatId`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractorRecord {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "services")]
    services_offered: Option<ServiceList>,
    #[serde(default)]
    service: Option<ServiceList>,
    #[serde(default)]
    notification_address: Option<ChannelAddress>,
    #[serde(default)]
    telegram_token: Option<String>,
    #[serde(default)]
    telegram_chat_id: Option<ChatId>,
    #[serde(default)]
    phone: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ServiceList {
    One(String),
    Many(Vec<String>),
}

impl ServiceList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(service) => vec![service],
            Self::Many(services) => services,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChatId {
    Text(String),
    Number(i64),
}

impl ChatId {
    fn into_string(self) -> String {
        match self {
            Self::Text(chat_id) => chat_id.trim().to_string(),
            Self::Number(chat_id) => chat_id.to_string(),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl From<ContractorRecord> for Contractor {
    fn from(record: ContractorRecord) -> Self {
        let display_name = non_blank(record.display_name)
            .or_else(|| non_blank(record.company))
            .or_else(|| non_blank(record.name))
            .unwrap_or_else(|| record.id.clone());

        let mut services_offered = record
            .services_offered
            .map(ServiceList::into_vec)
            .unwrap_or_default();
        if let Some(service) = record.service {
            services_offered.extend(service.into_vec());
        }
        services_offered.retain(|service| !service.trim().is_empty());

        // An explicit address wins over the per-contractor bot pair.
        let bot_address = match (
            non_blank(record.telegram_token),
            record.telegram_chat_id.map(ChatId::into_string),
        ) {
            (Some(token), Some(chat_id)) if !chat_id.is_empty() => {
                Some(ChannelAddress::new(format!("{}/{chat_id}", token.trim())))
            }
            _ => None,
        };
        let notification_address = record
            .notification_address
            .filter(|address| !address.is_blank())
            .or(bot_address);

        Self {
            id: record.id,
            display_name,
            services_offered,
            notification_address,
            phone: record.phone,
        }
    }
}

impl Contractor {
    /// The configured address, if it is usable.
    #[must_use]
    pub fn reachable_address(&self) -> Option<&ChannelAddress> {
        self.notification_address
            .as_ref()
            .filter(|address| !address.is_blank())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Operations,
    Contractor,
}

impl DestinationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operations => "operations",
            Self::Contractor => "contractor",
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTarget {
    pub destination_kind: DestinationKind,
    #[serde(skip_serializing)]
    pub address: ChannelAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contractor_id: Option<String>,
}

impl NotificationTarget {
    #[must_use]
    pub fn operations(address: ChannelAddress) -> Self {
        Self {
            destination_kind: DestinationKind::Operations,
            address,
            contractor_id: None,
        }
    }

    #[must_use]
    pub fn contractor(contractor: &Contractor, address: ChannelAddress) -> Self {
        Self {
            destination_kind: DestinationKind::Contractor,
            address,
            contractor_id: Some(contractor.id.clone()),
        }
    }

    /// Log-safe label: never includes the address.
    #[must_use]
    pub fn label(&self) -> String {
        match self.contractor_id.as_deref() {
            Some(contractor_id) => format!("{}:{contractor_id}", self.destination_kind.as_str()),
            None => self.destination_kind.as_str().to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryOutcome {
    Delivered,
    TransientFailure,
    PermanentFailure,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub target: NotificationTarget,
    pub attempt_number: u32,
    pub outcome: DeliveryOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-lead notification result once every target has settled.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Notified,
    PartiallyNotified,
    Unnotified,
}

impl NotificationStatus {
    #[must_use]
    pub fn summarize(targets: &[NotificationTarget], attempts: &[DeliveryAttempt]) -> Self {
        let delivered = targets
            .iter()
            .filter(|target| {
                attempts.iter().any(|attempt| {
                    attempt.outcome == DeliveryOutcome::Delivered && &attempt.target == *target
                })
            })
            .count();
        if targets.is_empty() || delivered == 0 {
            Self::Unnotified
        } else if delivered == targets.len() {
            Self::Notified
        } else {
            Self::PartiallyNotified
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notified => "notified",
            Self::PartiallyNotified => "partially_notified",
            Self::Unnotified => "unnotified",
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        ChannelAddress, Contractor, DeliveryAttempt, DeliveryOutcome, LeadOrigin,
        NotificationStatus, NotificationTarget, RawLeadSubmission,
    };

    fn attempt(target: &NotificationTarget, outcome: DeliveryOutcome) -> DeliveryAttempt {
        DeliveryAttempt {
            target: target.clone(),
            attempt_number: 1,
            outcome,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn raw_submission_accepts_legacy_field_names() {
        let raw: RawLeadSubmission = serde_json::from_value(serde_json::json!({
            "name": "Thandi",
            "phone": "0821234567",
            "service": "Plumbing",
            "contractorId": "ct-1"
        }))
        .expect("legacy payload should decode");
        assert_eq!(raw.service_name.as_deref(), Some("Plumbing"));
        assert_eq!(raw.explicit_target_id.as_deref(), Some("ct-1"));
    }

    #[test]
    fn origin_tags_normalize() {
        assert_eq!(LeadOrigin::from_tag(""), LeadOrigin::WebForm);
        assert_eq!(LeadOrigin::from_tag("Chat_Widget"), LeadOrigin::ChatWidget);
        assert_eq!(LeadOrigin::from_tag("kiosk"), LeadOrigin::Other);
    }

    #[test]
    fn contractor_with_blank_address_is_unreachable() {
        let contractor: Contractor = serde_json::from_value(serde_json::json!({
            "id": "ct-1",
            "company": "Drip Fixers",
            "services": ["Plumbing Repair"],
            "notificationAddress": "  "
        }))
        .expect("contractor should decode");
        assert_eq!(contractor.display_name, "Drip Fixers");
        assert!(contractor.reachable_address().is_none());
    }

    #[test]
    fn contractor_decodes_single_service_and_bot_pair() {
        let contractor: Contractor = serde_json::from_value(serde_json::json!({
            "id": "ct-2",
            "name": "Spark Co",
            "service": "Electrical",
            "telegramToken": "999:abc",
            "telegramChatId": "-1001"
        }))
        .expect("contractor should decode");
        assert_eq!(contractor.display_name, "Spark Co");
        assert_eq!(contractor.services_offered, vec!["Electrical".to_string()]);
        assert_eq!(
            contractor.reachable_address().map(ChannelAddress::as_str),
            Some("999:abc/-1001")
        );

        let without_chat: Contractor = serde_json::from_value(serde_json::json!({
            "id": "ct-3",
            "telegramToken": "999:abc"
        }))
        .expect("contractor should decode");
        assert_eq!(without_chat.display_name, "ct-3");
        assert!(without_chat.reachable_address().is_none());
    }

    #[test]
    fn channel_address_debug_is_redacted() {
        let address = ChannelAddress::new("123:secret/42");
        assert!(!format!("{address:?}").contains("secret"));
    }

    #[test]
    fn notification_status_reflects_per_target_delivery() {
        let ops = NotificationTarget::operations(ChannelAddress::new("ops"));
        let contractor = NotificationTarget {
            destination_kind: super::DestinationKind::Contractor,
            address: ChannelAddress::new("ct"),
            contractor_id: Some("ct-1".to_string()),
        };
        let targets = vec![ops.clone(), contractor.clone()];

        let all = vec![
            attempt(&ops, DeliveryOutcome::Delivered),
            attempt(&contractor, DeliveryOutcome::TransientFailure),
            attempt(&contractor, DeliveryOutcome::Delivered),
        ];
        assert_eq!(
            NotificationStatus::summarize(&targets, &all),
            NotificationStatus::Notified
        );

        let partial = vec![
            attempt(&ops, DeliveryOutcome::Delivered),
            attempt(&contractor, DeliveryOutcome::PermanentFailure),
        ];
        assert_eq!(
            NotificationStatus::summarize(&targets, &partial),
            NotificationStatus::PartiallyNotified
        );

        let none = vec![attempt(&ops, DeliveryOutcome::PermanentFailure)];
        assert_eq!(
            NotificationStatus::summarize(&targets, &none),
            NotificationStatus::Unnotified
        );
    }
}
