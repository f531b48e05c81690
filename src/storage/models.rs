// storage/models.rs
// Rows read back from the metrics database

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// A row of the `websites` table.
#[derive(Debug, Clone, PartialEq)]
pub struct WebsiteRow {
    pub id: i64,
    pub url: String,
    pub regexp: Option<String>,
}

impl WebsiteRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(WebsiteRow {
            id: row.try_get("id")?,
            url: row.try_get("url")?,
            regexp: row.try_get("regexp")?,
        })
    }
}

/// A row of the `metrics` table.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub id: i64,
    pub website_id: i64,
    pub error_code: Option<i64>,
    pub response_time: Option<f64>,
    pub matched_text: Option<String>,
}

impl MetricRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(MetricRow {
            id: row.try_get("id")?,
            website_id: row.try_get("website_id")?,
            error_code: row.try_get("error_code")?,
            response_time: row.try_get("response_time")?,
            matched_text: row.try_get("matched_text")?,
        })
    }
}
