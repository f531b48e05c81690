//! The record that flows through the pipeline.

use serde::{Deserialize, Deserializer, Serialize};

/// One website health observation produced by the upstream crawler.
///
/// On the wire the pattern is keyed `regex_pattern`; `regexp` is accepted
/// too. `error_code` is the HTTP status, sent either as a number or as a
/// string of digits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub url: String,
    #[serde(rename = "regex_pattern", alias = "regexp", default)]
    pub regexp: String,
    #[serde(deserialize_with = "deserialize_error_code")]
    pub error_code: i64,
    pub response_time: f64,
    #[serde(default)]
    pub matched_text: String,
}

impl Record {
    pub fn new(
        url: impl Into<String>,
        regexp: impl Into<String>,
        error_code: i64,
        response_time: f64,
        matched_text: impl Into<String>,
    ) -> Self {
        Record {
            url: url.into(),
            regexp: regexp.into(),
            error_code,
            response_time,
            matched_text: matched_text.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorCode {
    Number(i64),
    Text(String),
}

fn deserialize_error_code<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match ErrorCode::deserialize(deserializer)? {
        ErrorCode::Number(code) => Ok(code),
        ErrorCode::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid error_code: {text:?}"))),
    }
}
