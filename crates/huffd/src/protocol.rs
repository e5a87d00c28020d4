//! Wire types exchanged with clients.
//!
//! Inbound: a loosely typed [`RequestEnvelope`], validated once into a
//! [`JobRequest`] before anything is submitted.
//! Outbound: [`JobEvent`] frames carrying a [`JobStatus`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::CodeTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Encode,
    Decode,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encode => "encode",
            Self::Decode => "decode",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encode" => Ok(Self::Encode),
            "decode" => Ok(Self::Decode),
            other => Err(RequestError::UnknownOperation(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Started,
    Progress,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Request rejected at the boundary; never enters the job state machine.
///
/// Display strings are the messages clients see.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Invalid request format")]
    Malformed(#[source] serde_json::Error),

    #[error("Invalid request format")]
    MissingField(&'static str),

    #[error("Invalid operation")]
    UnknownOperation(String),

    #[error("Missing huffman_codes or padding for decode operation")]
    MissingDecodeParams,

    #[error("Invalid padding {0}: expected 0..=7")]
    InvalidPadding(i64),

    #[error("Invalid huffman_codes key {0:?}: expected a single character")]
    InvalidSymbol(String),
}

/// Inbound request as sent by clients.
///
/// ```json
/// { "operation": "decode", "data": "<base64>", "huffman_codes": {"a": "0"}, "padding": 4 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub huffman_codes: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<i64>,
}

impl RequestEnvelope {
    pub fn parse(raw: &str) -> Result<Self, RequestError> {
        serde_json::from_str(raw).map_err(RequestError::Malformed)
    }

    pub fn encode(data: impl Into<String>) -> Self {
        Self {
            operation: Some(Operation::Encode.as_str().to_string()),
            data: Some(data.into()),
            ..Default::default()
        }
    }

    pub fn decode(data: impl Into<String>, codes: &CodeTable, padding: u8) -> Self {
        Self {
            operation: Some(Operation::Decode.as_str().to_string()),
            data: Some(data.into()),
            huffman_codes: Some(codes.iter().map(|(s, c)| (s.to_string(), c.to_string())).collect()),
            padding: Some(i64::from(padding)),
        }
    }
}

/// Validated job request.
#[derive(Debug, Clone, PartialEq)]
pub enum JobRequest {
    /// Raw text to compress.
    Encode { data: String },
    /// Base64 payload to expand with the given table and padding.
    Decode {
        data: String,
        codes: CodeTable,
        padding: u8,
    },
}

impl JobRequest {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Encode { .. } => Operation::Encode,
            Self::Decode { .. } => Operation::Decode,
        }
    }
}

impl TryFrom<RequestEnvelope> for JobRequest {
    type Error = RequestError;

    fn try_from(envelope: RequestEnvelope) -> Result<Self, Self::Error> {
        let operation = envelope
            .operation
            .ok_or(RequestError::MissingField("operation"))?;
        let data = envelope.data.ok_or(RequestError::MissingField("data"))?;

        match operation.parse::<Operation>()? {
            Operation::Encode => Ok(Self::Encode { data }),
            Operation::Decode => {
                let (Some(raw_codes), Some(padding)) = (envelope.huffman_codes, envelope.padding)
                else {
                    return Err(RequestError::MissingDecodeParams);
                };
                let padding = u8::try_from(padding)
                    .ok()
                    .filter(|p| *p <= 7)
                    .ok_or(RequestError::InvalidPadding(padding))?;

                let mut codes = BTreeMap::new();
                for (key, code) in raw_codes {
                    let mut chars = key.chars();
                    let (Some(symbol), None) = (chars.next(), chars.next()) else {
                        return Err(RequestError::InvalidSymbol(key));
                    };
                    codes.insert(symbol, code);
                }

                Ok(Self::Decode {
                    data,
                    codes: CodeTable::from_codes(codes),
                    padding,
                })
            }
        }
    }
}

/// Outbound progress/result frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub status: JobStatus,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobEvent {
    fn new(status: JobStatus, task_id: impl Into<String>, operation: Option<String>) -> Self {
        Self {
            status,
            task_id: task_id.into(),
            operation,
            progress: None,
            result: None,
            message: None,
        }
    }

    pub fn started(task_id: impl Into<String>, operation: Operation) -> Self {
        Self::new(JobStatus::Started, task_id, Some(operation.to_string()))
    }

    pub fn progress(task_id: impl Into<String>, operation: Operation, percent: u8) -> Self {
        Self {
            progress: Some(percent),
            ..Self::new(JobStatus::Progress, task_id, Some(operation.to_string()))
        }
    }

    pub fn completed(
        task_id: impl Into<String>,
        operation: Operation,
        result: serde_json::Value,
    ) -> Self {
        Self {
            result: Some(result),
            ..Self::new(JobStatus::Completed, task_id, Some(operation.to_string()))
        }
    }

    /// `operation` is the raw client string, absent when the request had none.
    pub fn error(
        task_id: impl Into<String>,
        operation: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(JobStatus::Error, task_id, operation)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// `COMPLETED.result` for an encode job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeResult {
    pub encoded_data: String,
    pub huffman_codes: CodeTable,
    pub padding: u8,
}

/// `COMPLETED.result` for a decode job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeResult {
    pub result: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(raw: &str) -> Result<JobRequest, RequestError> {
        RequestEnvelope::parse(raw).and_then(JobRequest::try_from)
    }

    #[test]
    fn parses_encode_request() {
        let req = request(r#"{"operation":"encode","data":"hello"}"#).unwrap();
        assert_eq!(
            req,
            JobRequest::Encode {
                data: "hello".to_string()
            }
        );
        assert_eq!(req.operation(), Operation::Encode);
    }

    #[test]
    fn empty_data_is_allowed() {
        let req = request(r#"{"operation":"encode","data":""}"#).unwrap();
        assert_eq!(req, JobRequest::Encode { data: String::new() });
    }

    #[test]
    fn parses_decode_request() {
        let req = request(
            r#"{"operation":"decode","data":"4A==","huffman_codes":{"a":"1","b":"0"},"padding":4}"#,
        )
        .unwrap();
        match req {
            JobRequest::Decode {
                data,
                codes,
                padding,
            } => {
                assert_eq!(data, "4A==");
                assert_eq!(codes.get('a'), Some("1"));
                assert_eq!(codes.get('b'), Some("0"));
                assert_eq!(padding, 4);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn missing_fields_are_invalid_format() {
        for raw in [
            r#"{"data":"x"}"#,
            r#"{"operation":"encode"}"#,
            r#"{"operation":null,"data":"x"}"#,
        ] {
            let err = request(raw).unwrap_err();
            assert!(matches!(err, RequestError::MissingField(_)), "{raw}");
            assert_eq!(err.to_string(), "Invalid request format");
        }
    }

    #[test]
    fn non_json_is_malformed() {
        let err = request("not json").unwrap_err();
        assert!(matches!(err, RequestError::Malformed(_)));
        assert_eq!(err.to_string(), "Invalid request format");
    }

    #[test]
    fn unknown_operation_rejected() {
        let err = request(r#"{"operation":"compress","data":"x"}"#).unwrap_err();
        assert!(matches!(err, RequestError::UnknownOperation(ref op) if op == "compress"));
        assert_eq!(err.to_string(), "Invalid operation");
    }

    #[test]
    fn decode_requires_codes_and_padding() {
        for raw in [
            r#"{"operation":"decode","data":"AA=="}"#,
            r#"{"operation":"decode","data":"AA==","padding":0}"#,
            r#"{"operation":"decode","data":"AA==","huffman_codes":{"a":"0"}}"#,
        ] {
            let err = request(raw).unwrap_err();
            assert!(matches!(err, RequestError::MissingDecodeParams), "{raw}");
        }
    }

    #[test]
    fn decode_validates_padding_and_keys() {
        let err = request(r#"{"operation":"decode","data":"","huffman_codes":{},"padding":8}"#)
            .unwrap_err();
        assert!(matches!(err, RequestError::InvalidPadding(8)));

        let err = request(r#"{"operation":"decode","data":"","huffman_codes":{},"padding":-1}"#)
            .unwrap_err();
        assert!(matches!(err, RequestError::InvalidPadding(-1)));

        let err = request(
            r#"{"operation":"decode","data":"","huffman_codes":{"ab":"0"},"padding":0}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RequestError::InvalidSymbol(ref k) if k == "ab"));
    }

    #[test]
    fn envelope_builders_roundtrip_through_validation() {
        let table = CodeTable::build("aab");
        let raw = serde_json::to_string(&RequestEnvelope::decode("QA==", &table, 5)).unwrap();
        let req = request(&raw).unwrap();
        assert_eq!(
            req,
            JobRequest::Decode {
                data: "QA==".to_string(),
                codes: table,
                padding: 5
            }
        );
    }

    #[test]
    fn progress_event_shape() {
        let event = JobEvent::progress("job-1", Operation::Encode, 40);
        insta::assert_json_snapshot!(event, @r#"
        {
          "status": "PROGRESS",
          "task_id": "job-1",
          "operation": "encode",
          "progress": 40
        }
        "#);
    }

    #[test]
    fn error_event_without_operation() {
        let event = JobEvent::error("job-2", None, "Invalid request format");
        insta::assert_json_snapshot!(event, @r#"
        {
          "status": "ERROR",
          "task_id": "job-2",
          "message": "Invalid request format"
        }
        "#);
        assert!(event.is_terminal());
    }

    #[test]
    fn status_serializes_screaming_snake_case() {
        assert_eq!(
            serde_json::to_value([
                JobStatus::Started,
                JobStatus::Progress,
                JobStatus::Completed,
                JobStatus::Error
            ])
            .unwrap(),
            serde_json::json!(["STARTED", "PROGRESS", "COMPLETED", "ERROR"])
        );
        assert!(!JobStatus::Progress.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
    }
}
