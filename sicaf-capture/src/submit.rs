use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use image::codecs::jpeg::JpegEncoder;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::camera::Frame;
use crate::config::{ApiConfig, AppSettings};
use crate::error::{Error, Result};
use crate::face::FaceDescriptor;
use crate::messages;

pub const JPEG_QUALITY: u8 = 80;
pub const REALTIME_PATH: &str = "/asistencia/realtime";

/// Which shift and direction an attendance mark belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    EntradaManana,
    SalidaManana,
    EntradaTarde,
    SalidaTarde,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::EntradaManana => "ENTRADA_MANANA",
            RecordType::SalidaManana => "SALIDA_MANANA",
            RecordType::EntradaTarde => "ENTRADA_TARDE",
            RecordType::SalidaTarde => "SALIDA_TARDE",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRequest {
    pub embedding: FaceDescriptor,
    pub marca_tiempo: String,
    pub tipo_registro: RecordType,
    pub imagen_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solo_validar: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_margin: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersonalId {
    Number(i64),
    Text(String),
}

impl fmt::Display for PersonalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonalId::Number(n) => write!(f, "{}", n),
            PersonalId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttendanceResult {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub matched_personal_id: Option<PersonalId>,
    /// Either a plain name or the user object the API embeds.
    #[serde(default)]
    pub usuario: Option<serde_json::Value>,
    #[serde(default)]
    pub tipo: Option<String>,
    #[serde(default)]
    pub estado: Option<String>,
    #[serde(default)]
    pub fecha: Option<String>,
    /// Display time assigned by the time-control registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hora: Option<String>,
}

impl AttendanceResult {
    pub fn match_percentage(&self) -> Option<u32> {
        self.score.map(|s| (s.clamp(0.0, 1.0) * 100.0).round() as u32)
    }

    pub fn display_name(&self) -> Option<String> {
        match self.usuario.as_ref()? {
            serde_json::Value::String(name) => Some(name.clone()),
            serde_json::Value::Object(obj) => {
                let field = |k: &str| obj.get(k).and_then(|v| v.as_str()).map(str::trim).filter(|s| !s.is_empty());
                match (field("nombres").or_else(|| field("nombre")), field("apellidos")) {
                    (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
                    (Some(first), None) => Some(first.to_string()),
                    (None, _) => field("username").or_else(|| field("email")).map(str::to_string),
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Matched(AttendanceResult),
    /// Reached the server, which rejected or did not recognize the face.
    NoMatch { detail: Option<String> },
}

/// Everything one attempt needs. Built by the session from the frame the
/// descriptor came from.
#[derive(Debug, Clone)]
pub struct Submission {
    pub descriptor: FaceDescriptor,
    pub frame: Frame,
    pub record_type: RecordType,
    pub captured_at: DateTime<Utc>,
    pub settings: AppSettings,
}

impl Submission {
    pub fn to_request(&self, solo_validar: Option<bool>) -> Result<AttendanceRequest> {
        Ok(AttendanceRequest {
            embedding: self.descriptor.clone(),
            marca_tiempo: self.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            tipo_registro: self.record_type,
            imagen_base64: encode_jpeg_data_url(&self.frame, JPEG_QUALITY)?,
            solo_validar,
            threshold: self.settings.face_detection_threshold,
            min_margin: self.settings.face_detection_margin,
        })
    }
}

/// One blocking network attempt per call; callers must not retry inside.
pub trait AttendanceSubmitter: Send + Sync {
    fn submit(&self, submission: &Submission) -> Result<SubmitOutcome>;
}

pub fn encode_jpeg_data_url(frame: &Frame, quality: u8) -> Result<String> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(frame)?;
    Ok(format!(
        "data:image/jpeg;base64,{}",
        general_purpose::STANDARD.encode(&jpeg)
    ))
}

#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Human readable `detail` from an error body, if there is one.
    pub fn detail(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.body).ok()?;
        match value.get("detail")? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

pub fn build_agent(api: &ApiConfig) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(api.timeout()).build()
}

/// POSTs a JSON body. Any HTTP status is a reply; only a missing response is an error.
pub fn post_json<T: Serialize>(agent: &ureq::Agent, url: &str, body: &T) -> Result<HttpReply> {
    let response = match agent.post(url).send_json(body) {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(ureq::Error::Transport(t)) => return Err(Error::Transport(t.to_string())),
    };

    let status = response.status();
    let body = response
        .into_string()
        .map_err(|e| Error::Transport(e.to_string()))?;
    debug!("POST {} -> {}", url, status);
    Ok(HttpReply { status, body })
}

/// Maps a matching API reply to an outcome.
///
/// 5xx is a server failure, any other non-2xx is a rejection, and a 2xx
/// without `matched_personal_id` is a business-level no-match.
pub fn interpret_attendance_reply(reply: &HttpReply) -> Result<SubmitOutcome> {
    if reply.is_server_error() {
        return Err(Error::Server {
            status: reply.status,
            detail: reply.detail().unwrap_or_else(|| messages::UNKNOWN_ERROR.to_string()),
        });
    }
    if !reply.is_success() {
        return Ok(SubmitOutcome::NoMatch { detail: reply.detail() });
    }

    let result: AttendanceResult =
        serde_json::from_str(&reply.body).map_err(|e| Error::Decode(e.to_string()))?;
    if result.matched_personal_id.is_some() {
        Ok(SubmitOutcome::Matched(result))
    } else {
        Ok(SubmitOutcome::NoMatch { detail: reply.detail() })
    }
}

pub struct HttpSubmitter {
    agent: ureq::Agent,
    url: String,
    solo_validar: Option<bool>,
}

impl HttpSubmitter {
    pub fn new(api: &ApiConfig) -> Self {
        Self {
            agent: build_agent(api),
            url: api.endpoint(REALTIME_PATH),
            solo_validar: None,
        }
    }

    /// Identify without recording attendance.
    pub fn validate_only(api: &ApiConfig) -> Self {
        Self {
            solo_validar: Some(true),
            ..Self::new(api)
        }
    }
}

impl AttendanceSubmitter for HttpSubmitter {
    fn submit(&self, submission: &Submission) -> Result<SubmitOutcome> {
        let request = submission.to_request(self.solo_validar)?;
        info!("Submitting {} recognition to {}", request.tipo_registro, self.url);

        let reply = post_json(&self.agent, &self.url, &request)?;
        let outcome = interpret_attendance_reply(&reply);
        match &outcome {
            Ok(SubmitOutcome::Matched(result)) => info!(
                "Matched personal {} (score {:?})",
                result.matched_personal_id.as_ref().map(|id| id.to_string()).unwrap_or_default(),
                result.score
            ),
            Ok(SubmitOutcome::NoMatch { detail }) => info!("No match: {}", detail.as_deref().unwrap_or("-")),
            Err(e) => warn!("Recognition request failed: {}", e),
        }
        outcome
    }
}
