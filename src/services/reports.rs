use std::sync::Arc;

use bytes::Bytes;

use crate::api::{ApiError, BackendClient, ImageUpload};
use crate::models::{Diagnosis, PredictionRecord, Report, ReportSource};

/// Diagnosis history and the report view behind it.
pub struct ReportService {
    client: Arc<BackendClient>,
}

impl ReportService {
    pub fn new(client: Arc<BackendClient>) -> Self {
        Self { client }
    }

    /// Upload a leaf photo and return the classification as a fresh report
    /// source.
    pub async fn predict(&self, data: Bytes, filename: &str) -> Result<ReportSource, ApiError> {
        let upload = ImageUpload {
            data,
            filename: filename.to_string(),
            mime_type: mime_for(filename).to_string(),
        };
        let record = self.client.predict(upload).await?;
        tracing::debug!("Prediction result: {}", record.prediction);
        Ok(ReportSource::FreshPrediction(record))
    }

    /// Past diagnoses, newest first.
    pub async fn history(&self) -> Result<Vec<PredictionRecord>, ApiError> {
        let mut records = self.client.predictions().await?;
        records.sort_by_key(|r| std::cmp::Reverse(r.created_at()));
        Ok(records)
    }

    /// Build the report for `source`. Only `HistoricalById` goes to the
    /// network.
    pub async fn resolve(&self, source: ReportSource) -> Result<Report, ApiError> {
        let (record, fresh) = match source {
            ReportSource::FreshPrediction(record) => (record, true),
            ReportSource::HistoricalInline(record) => (record, false),
            ReportSource::HistoricalById(id) => (self.client.prediction(&id).await?, false),
        };
        Ok(self.build_report(record, fresh))
    }

    fn build_report(&self, record: PredictionRecord, fresh: bool) -> Report {
        Report {
            diagnosis: Diagnosis::parse(&record.prediction),
            confidence: record.confidence,
            image_url: record
                .image
                .as_deref()
                .and_then(|path| self.client.resolve_image_url(path)),
            created_at: record.created_at(),
            prediction_id: record.id,
            fresh,
        }
    }
}

fn mime_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}
