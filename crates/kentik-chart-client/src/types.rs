//! Kentik API types

use serde::Deserialize;

/// A rendered chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Response body of `query/topxchart`
#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    #[serde(rename = "dataUri")]
    pub data_uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_response_deserialization() {
        let json = r#"{"dataUri": "data:image/png;base64,iVBORw0KGgo="}"#;

        let response: ChartResponse = serde_json::from_str(json).unwrap();
        assert!(response.data_uri.starts_with("data:image/png"));
    }
}
