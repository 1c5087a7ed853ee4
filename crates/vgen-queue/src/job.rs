//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use vgen_models::{GenerationRequest, JobId, RequestError};

/// Why a job input could not be turned into a generation request.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("job input must be a JSON object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error(transparent)]
    Invalid(#[from] RequestError),
}

/// Job input exactly as submitted.
///
/// Kept as raw JSON so a malformed submission still reaches the handler and
/// fails there as an input error instead of being dropped by the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobInput(Value);

impl JobInput {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Input carrying every field of `request`.
    pub fn from_request(request: &GenerationRequest) -> Self {
        let mut map = Map::new();
        map.insert("prompt".into(), Value::from(request.prompt.clone()));
        map.insert("negative_prompt".into(), Value::from(request.negative_prompt.clone()));
        map.insert("width".into(), Value::from(request.width));
        map.insert("height".into(), Value::from(request.height));
        map.insert("seconds".into(), Value::from(request.seconds.trunc() as i64));
        Self(Value::Object(map))
    }

    /// Parse into a validated generation request.
    ///
    /// All five fields are required. `width`, `height` and `seconds` accept
    /// numbers or integer strings; fractional numbers are truncated toward zero.
    pub fn parse(&self) -> Result<GenerationRequest, InputError> {
        let map = self.0.as_object().ok_or(InputError::NotAnObject)?;

        let prompt = string_field(map, "prompt")?;
        let negative_prompt = string_field(map, "negative_prompt")?;
        let width = dimension_field(map, "width")?;
        let height = dimension_field(map, "height")?;
        let seconds = int_field(map, "seconds")?;

        let request = GenerationRequest::new(prompt, negative_prompt)
            .with_size(width, height)
            .with_seconds(seconds as f64);
        request.validate_all()?;
        Ok(request)
    }
}

fn field<'a>(map: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, InputError> {
    match map.get(name) {
        None | Some(Value::Null) => Err(InputError::MissingField(name)),
        Some(value) => Ok(value),
    }
}

fn string_field(map: &Map<String, Value>, name: &'static str) -> Result<String, InputError> {
    match field(map, name)? {
        Value::String(s) => Ok(s.clone()),
        other => Err(InputError::InvalidField {
            field: name,
            reason: format!("expected a string, got {}", other),
        }),
    }
}

fn int_field(map: &Map<String, Value>, name: &'static str) -> Result<i64, InputError> {
    let invalid = |reason: String| InputError::InvalidField { field: name, reason };

    match field(map, name)? {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f.abs() < i64::MAX as f64 => Ok(f.trunc() as i64),
                    _ => Err(invalid(format!("{} is out of range", n))),
                }
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(format!("'{}' is not an integer", s))),
        other => Err(invalid(format!("expected a number, got {}", other))),
    }
}

fn dimension_field(map: &Map<String, Value>, name: &'static str) -> Result<u32, InputError> {
    let value = int_field(map, name)?;
    u32::try_from(value).map_err(|_| InputError::InvalidField {
        field: name,
        reason: format!("{} is not a valid size", value),
    })
}

/// Job to generate a video, upload it and return a signed URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateVideoJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Raw job input
    pub input: JobInput,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl GenerateVideoJob {
    pub fn new(input: JobInput) -> Self {
        Self {
            job_id: JobId::new(),
            input,
            created_at: Utc::now(),
        }
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("generate:{}", self.job_id)
    }
}

/// Job to load the model ahead of traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmUpJob {
    pub job_id: JobId,
    /// Run a small generation after loading
    #[serde(default)]
    pub test_generation: bool,
    pub created_at: DateTime<Utc>,
}

impl WarmUpJob {
    pub fn new(test_generation: bool) -> Self {
        Self {
            job_id: JobId::new(),
            test_generation,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("warm_up:{}", self.job_id)
    }
}

/// Any job on the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    GenerateVideo(GenerateVideoJob),
    WarmUp(WarmUpJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::GenerateVideo(job) => &job.job_id,
            QueueJob::WarmUp(job) => &job.job_id,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::GenerateVideo(job) => job.idempotency_key(),
            QueueJob::WarmUp(job) => job.idempotency_key(),
        }
    }

    /// Short name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueJob::GenerateVideo(_) => "generate_video",
            QueueJob::WarmUp(_) => "warm_up",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_accepts_numbers_and_numeric_strings() {
        let input = JobInput::new(json!({
            "prompt": "a cat surfing",
            "negative_prompt": "blurry",
            "width": "1280",
            "height": 720,
            "seconds": 3.9
        }));

        let request = input.parse().unwrap();
        assert_eq!(request.width, 1280);
        assert_eq!(request.height, 720);
        assert_eq!(request.seconds, 3.0);
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let input = JobInput::new(json!({
            "prompt": "a cat",
            "negative_prompt": "",
            "width": 1280,
            "height": 720
        }));
        assert!(matches!(input.parse(), Err(InputError::MissingField("seconds"))));

        let input = JobInput::new(json!({"prompt": "a cat", "width": 1280, "height": 720, "seconds": 5}));
        assert!(matches!(input.parse(), Err(InputError::MissingField("negative_prompt"))));
    }

    #[test]
    fn test_parse_rejects_malformed_values() {
        let base = json!({"prompt": "a cat", "negative_prompt": "", "width": 1280, "height": 720, "seconds": 5});

        let mut bad = base.clone();
        bad["width"] = json!("wide");
        assert!(matches!(
            JobInput::new(bad).parse(),
            Err(InputError::InvalidField { field: "width", .. })
        ));

        let mut bad = base.clone();
        bad["seconds"] = json!("2.5");
        assert!(JobInput::new(bad).parse().is_err());

        let mut bad = base.clone();
        bad["height"] = json!(-720);
        assert!(JobInput::new(bad).parse().is_err());

        let mut bad = base;
        bad["prompt"] = json!(42);
        assert!(JobInput::new(bad).parse().is_err());

        assert!(matches!(JobInput::new(json!("a cat")).parse(), Err(InputError::NotAnObject)));
    }

    #[test]
    fn test_parse_runs_request_validation() {
        let input = JobInput::new(json!({
            "prompt": "a cat",
            "negative_prompt": "",
            "width": 1000,
            "height": 722,
            "seconds": 5
        }));
        assert!(matches!(input.parse(), Err(InputError::Invalid(_))));
    }

    #[test]
    fn test_from_request_parses_back() {
        let request = GenerationRequest::new("a cat", "blurry").with_size(640, 360);
        let parsed = JobInput::from_request(&request).parse().unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_queue_job_generate_video_serde() {
        let job = QueueJob::GenerateVideo(GenerateVideoJob::new(JobInput::new(json!({"prompt": 1}))));
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "generate_video");
        assert_eq!(value["input"]["prompt"], 1);

        let decoded: QueueJob = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.job_id(), job.job_id());
        assert_eq!(decoded.kind(), "generate_video");
    }

    #[test]
    fn test_queue_job_warm_up_defaults() {
        let decoded: QueueJob = serde_json::from_value(json!({
            "type": "warm_up",
            "job_id": "abc",
            "created_at": "2025-01-01T00:00:00Z"
        }))
        .unwrap();

        match decoded {
            QueueJob::WarmUp(job) => assert!(!job.test_generation),
            other => panic!("unexpected job: {other:?}"),
        }
    }
}
