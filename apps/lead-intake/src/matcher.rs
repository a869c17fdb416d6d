use crate::types::{ChannelAddress, Contractor, LeadRequest, NotificationTarget};

/// Resolves who hears about a lead: operations always, plus at most one contractor.
#[derive(Clone, Debug)]
pub struct RecipientMatcher {
    operations_address: ChannelAddress,
}

impl RecipientMatcher {
    #[must_use]
    pub fn new(operations_address: ChannelAddress) -> Self {
        Self { operations_address }
    }

    #[must_use]
    pub fn resolve(
        &self,
        lead: &LeadRequest,
        contractors: &[Contractor],
    ) -> Vec<NotificationTarget> {
        let mut targets = vec![NotificationTarget::operations(
            self.operations_address.clone(),
        )];

        if let Some(explicit_id) = lead.explicit_target_id.as_deref() {
            match find_explicit(contractors, explicit_id) {
                Some(contractor) => {
                    if let Some(address) = contractor.reachable_address() {
                        targets.push(NotificationTarget::contractor(contractor, address.clone()));
                        return targets;
                    }
                    tracing::info!(
                        contractor_id = %contractor.id,
                        "explicit contractor has no notification address, matching by service"
                    );
                }
                None => {
                    tracing::info!(
                        explicit_target_id = explicit_id,
                        "explicit contractor not in directory, matching by service"
                    );
                }
            }
        }

        if let Some((contractor, address)) = match_by_service(contractors, &lead.service_name) {
            targets.push(NotificationTarget::contractor(contractor, address.clone()));
        }
        targets
    }
}

fn find_explicit<'a>(contractors: &'a [Contractor], explicit_id: &str) -> Option<&'a Contractor> {
    let explicit_id = explicit_id.trim();
    contractors.iter().find(|contractor| {
        contractor.id == explicit_id
            || contractor
                .phone
                .as_deref()
                .is_some_and(|phone| phone.trim() == explicit_id)
    })
}

/// First word of the requested service, lowercased. "Plumbing Repair" -> "plumbing".
#[must_use]
pub fn leading_service_token(service_name: &str) -> Option<String> {
    service_name
        .split_whitespace()
        .next()
        .map(str::to_lowercase)
}

fn match_by_service<'a>(
    contractors: &'a [Contractor],
    service_name: &str,
) -> Option<(&'a Contractor, &'a ChannelAddress)> {
    let token = leading_service_token(service_name)?;
    contractors.iter().find_map(|contractor| {
        let address = contractor.reachable_address()?;
        contractor
            .services_offered
            .iter()
            .any(|service| service.to_lowercase().contains(&token))
            .then_some((contractor, address))
    })
}
