pub const ROUTE_HEALTHZ: &str = "/healthz";
pub const ROUTE_READYZ: &str = "/readyz";
pub const ROUTE_API_LEAD: &str = "/api/lead";
pub const ROUTE_API_LEADS_STATS: &str = "/api/leads/stats";
pub const ROUTE_API_LEAD_BY_ID: &str = "/api/leads/:lead_id";
