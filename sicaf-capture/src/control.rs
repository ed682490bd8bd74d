//! Entry/exit time control: identify with `solo_validar`, then register the
//! event against the matched person.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::messages;
use crate::submit::{
    build_agent, post_json, AttendanceSubmitter, HttpSubmitter, PersonalId, SubmitOutcome, Submission,
};

pub const REGISTER_PATH: &str = "/control-tiempo/registrar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlType {
    Entrada,
    Salida,
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControlType::Entrada => "ENTRADA",
            ControlType::Salida => "SALIDA",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlRequest {
    pub personal_id: PersonalId,
    pub tipo_registro: ControlType,
    pub categoria: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlResponse {
    /// Display time assigned by the server. Older deployments call it `hora_registro`.
    #[serde(default, alias = "hora_registro")]
    pub hora: Option<String>,
    #[serde(default)]
    pub estado: Option<String>,
    #[serde(default)]
    pub mensaje: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    Registered { hora: Option<String>, estado: Option<String> },
    Rejected { detail: String },
}

pub struct ControlTiempoClient {
    agent: ureq::Agent,
    url: String,
}

impl ControlTiempoClient {
    pub fn new(api: &ApiConfig) -> Self {
        Self {
            agent: build_agent(api),
            url: api.endpoint(REGISTER_PATH),
        }
    }

    pub fn register(&self, request: &ControlRequest) -> Result<RegisterOutcome> {
        info!(
            "Registering {} ({}) for personal {}",
            request.tipo_registro, request.categoria, request.personal_id
        );
        let reply = post_json(&self.agent, &self.url, request)?;

        if reply.is_server_error() {
            return Err(Error::Server {
                status: reply.status,
                detail: reply.detail().unwrap_or_else(|| messages::UNKNOWN_ERROR.to_string()),
            });
        }
        if !reply.is_success() {
            let detail = reply.detail().unwrap_or_else(|| messages::UNKNOWN_ERROR.to_string());
            warn!("Time control registration rejected: {}", detail);
            return Ok(RegisterOutcome::Rejected { detail });
        }

        let response: ControlResponse = if reply.body.trim().is_empty() {
            ControlResponse::default()
        } else {
            serde_json::from_str(&reply.body).map_err(|e| Error::Decode(e.to_string()))?
        };
        Ok(RegisterOutcome::Registered {
            hora: response.hora,
            estado: response.estado.or(response.mensaje),
        })
    }
}

/// Recognition followed by registration, as one submission attempt.
pub struct ControlSubmitter {
    recognizer: Box<dyn AttendanceSubmitter>,
    client: ControlTiempoClient,
    tipo: ControlType,
    categoria: String,
}

impl ControlSubmitter {
    pub fn new(api: &ApiConfig, tipo: ControlType, categoria: impl Into<String>) -> Self {
        Self::with_recognizer(Box::new(HttpSubmitter::validate_only(api)), api, tipo, categoria)
    }

    pub fn with_recognizer(
        recognizer: Box<dyn AttendanceSubmitter>,
        api: &ApiConfig,
        tipo: ControlType,
        categoria: impl Into<String>,
    ) -> Self {
        Self {
            recognizer,
            client: ControlTiempoClient::new(api),
            tipo,
            categoria: categoria.into(),
        }
    }
}

impl AttendanceSubmitter for ControlSubmitter {
    fn submit(&self, submission: &Submission) -> Result<SubmitOutcome> {
        let mut result = match self.recognizer.submit(submission)? {
            SubmitOutcome::Matched(result) => result,
            no_match => return Ok(no_match),
        };
        let Some(personal_id) = result.matched_personal_id.clone() else {
            return Ok(SubmitOutcome::NoMatch { detail: None });
        };

        let request = ControlRequest {
            personal_id,
            tipo_registro: self.tipo,
            categoria: self.categoria.clone(),
        };
        match self.client.register(&request)? {
            RegisterOutcome::Registered { hora, estado } => {
                result.hora = hora;
                if estado.is_some() {
                    result.estado = estado;
                }
                Ok(SubmitOutcome::Matched(result))
            }
            RegisterOutcome::Rejected { detail } => Ok(SubmitOutcome::NoMatch { detail: Some(detail) }),
        }
    }
}
