use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RecommendationResponse {
    pub recommendation: String,
}
