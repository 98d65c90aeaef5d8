use serde::Deserialize;

/// Response envelope for the standard search endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub statuses: Vec<serde_json::Value>,
    pub search_metadata: SearchMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchMetadata {
    pub max_id_str: Option<String>,
    pub next_results: Option<String>,
    pub count: Option<u32>,
}

/// One entry in a trends/place response. The endpoint returns an array with
/// a single element for the requested place.
#[derive(Debug, Clone, Deserialize)]
pub struct TrendsResponse {
    pub trends: Vec<TrendEntry>,
    pub locations: Vec<TrendLocation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrendEntry {
    pub name: String,
    pub tweet_volume: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrendLocation {
    pub name: String,
    pub woeid: u64,
}

/// Minimal identity payload from verify_credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedUser {
    pub id_str: String,
    pub screen_name: String,
}
