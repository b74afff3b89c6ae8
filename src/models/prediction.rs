use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{parse_server_timestamp, RecordId};

const UNKNOWN_CROP: &str = "Unknown Crop";

/// One classification result as the backend stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(default)]
    pub id: Option<RecordId>,
    pub prediction: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl PredictionRecord {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_deref().and_then(parse_server_timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub crop: String,
    pub disease: String,
}

impl Diagnosis {
    /// Split a `"Crop - Disease"` label.
    pub fn parse(label: &str) -> Self {
        let parts: Vec<&str> = label.split(" - ").collect();
        if let [crop, disease] = parts.as_slice() {
            Self {
                crop: crop.trim().to_string(),
                disease: disease.trim().to_string(),
            }
        } else {
            Self {
                crop: UNKNOWN_CROP.to_string(),
                disease: label.to_string(),
            }
        }
    }
}

/// Where a report view gets its data from. Decided once when the view is
/// opened.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportSource {
    /// Result of a prediction that was just made.
    FreshPrediction(PredictionRecord),
    /// Only the id is known; the record must be fetched.
    HistoricalById(RecordId),
    /// A history entry that was already fetched as part of the list.
    HistoricalInline(PredictionRecord),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub prediction_id: Option<RecordId>,
    pub diagnosis: Diagnosis,
    pub confidence: Option<f64>,
    pub image_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub fresh: bool,
}
