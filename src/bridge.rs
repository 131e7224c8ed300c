//! Request/response contract between page-level scripts and the gate.
//!
//! Messages arrive as `{source, id, cmd, args}` and are answered with
//! `{source, id, result}` or `{source, id, error}`.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gate::UpdateGateService;
use crate::logging::debug_log;

pub const PAGE_SOURCE: &str = "pagesaver-page";
pub const CONTENT_SOURCE: &str = "pagesaver-content";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    StartUpdateFlow { force: bool },
    SetLocalVersion(String),
    GetLocalVersion,
    ReadState,
    ResetState,
    ForceSetRemoteTag(String),
    Log(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid request")]
    InvalidRequest,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("invalid arguments for {cmd}: {reason}")]
    InvalidArguments { cmd: String, reason: String },
}

impl BridgeCommand {
    pub fn parse(cmd: &str, args: &[Value]) -> Result<Self, BridgeError> {
        let invalid = |reason: &str| BridgeError::InvalidArguments {
            cmd: cmd.to_string(),
            reason: reason.to_string(),
        };
        match cmd {
            "startUpdateFlow" => match args.first() {
                None | Some(Value::Null) => Ok(Self::StartUpdateFlow { force: false }),
                Some(Value::Bool(force)) => Ok(Self::StartUpdateFlow { force: *force }),
                Some(_) => Err(invalid("force must be a boolean")),
            },
            "setLocalVersion" => args
                .first()
                .and_then(scalar_text)
                .map(Self::SetLocalVersion)
                .ok_or_else(|| invalid("version required")),
            "getLocalVersion" => Ok(Self::GetLocalVersion),
            "readState" => Ok(Self::ReadState),
            "resetState" => Ok(Self::ResetState),
            "forceSetRemoteTag" => args
                .first()
                .and_then(scalar_text)
                .map(Self::ForceSetRemoteTag)
                .ok_or_else(|| invalid("tag required")),
            "log" => Ok(Self::Log(
                args.iter()
                    .map(|arg| scalar_text(arg).unwrap_or_else(|| arg.to_string()))
                    .collect(),
            )),
            other => Err(BridgeError::UnknownCommand(other.to_string())),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    /// Echoed back unchanged; any truthy JSON value is accepted.
    pub id: Value,
    pub command: BridgeCommand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Not addressed to us; no reply is sent.
    Ignored,
    Request(BridgeRequest),
    Rejected {
        id: Option<Value>,
        error: BridgeError,
    },
}

impl Inbound {
    pub fn classify(message: &Value) -> Self {
        let Some(object) = message.as_object() else {
            return Self::Ignored;
        };
        if object.get("source").and_then(Value::as_str) != Some(PAGE_SOURCE) {
            return Self::Ignored;
        }

        let id = object.get("id").filter(|id| is_truthy(id)).cloned();
        let cmd = object
            .get("cmd")
            .and_then(Value::as_str)
            .filter(|cmd| !cmd.is_empty());
        let (Some(id), Some(cmd)) = (id.clone(), cmd) else {
            return Self::Rejected {
                id,
                error: BridgeError::InvalidRequest,
            };
        };

        let args = match object.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Self::Rejected {
                    id: Some(id),
                    error: BridgeError::InvalidRequest,
                }
            }
        };

        match BridgeCommand::parse(cmd, &args) {
            Ok(command) => Self::Request(BridgeRequest { id, command }),
            Err(error) => Self::Rejected {
                id: Some(id),
                error,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub source: String,
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            source: CONTENT_SOURCE.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Option<Value>, error: impl ToString) -> Self {
        Self {
            source: CONTENT_SOURCE.to_string(),
            id,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

pub struct Bridge {
    gate: Arc<UpdateGateService>,
}

impl Bridge {
    pub fn new(gate: Arc<UpdateGateService>) -> Self {
        Self { gate }
    }

    pub fn handle(&self, message: &Value) -> Option<BridgeResponse> {
        match Inbound::classify(message) {
            Inbound::Ignored => None,
            Inbound::Rejected { id, error } => {
                debug_log("bridge", format!("rejected request: {error}"));
                Some(BridgeResponse::err(id, error))
            }
            Inbound::Request(request) => {
                debug_log("bridge", format!("{:?}", request.command));
                Some(match self.execute(request.command) {
                    Ok(result) => BridgeResponse::ok(request.id, result),
                    Err(err) => BridgeResponse::err(Some(request.id), err),
                })
            }
        }
    }

    pub fn execute(&self, command: BridgeCommand) -> Result<Value, serde_json::Error> {
        match command {
            BridgeCommand::StartUpdateFlow { force } => serde_json::to_value(self.gate.check(force)),
            BridgeCommand::SetLocalVersion(version) => {
                self.gate.set_local_version(&version);
                Ok(Value::Null)
            }
            BridgeCommand::GetLocalVersion => Ok(Value::String(self.gate.local_version())),
            BridgeCommand::ReadState => serde_json::to_value(self.gate.read_state()),
            BridgeCommand::ResetState => {
                self.gate.reset_state();
                Ok(Value::Null)
            }
            BridgeCommand::ForceSetRemoteTag(tag) => {
                serde_json::to_value(self.gate.force_set_remote_tag(&tag))
            }
            BridgeCommand::Log(parts) => {
                debug_log("page", parts.join(" "));
                Ok(Value::Null)
            }
        }
    }

    /// Newline-delimited JSON in, newline-delimited JSON out.
    pub fn serve<R: BufRead, W: Write>(&self, input: R, mut output: W) -> Result<()> {
        for line in input.lines() {
            let line = line.context("bridge: read request")?;
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<Value>(&line) {
                Ok(message) => self.handle(&message),
                Err(_) => Some(BridgeResponse::err(None, BridgeError::InvalidRequest)),
            };
            if let Some(response) = response {
                serde_json::to_writer(&mut output, &response).context("bridge: encode response")?;
                output.write_all(b"\n").context("bridge: write response")?;
                output.flush().context("bridge: flush")?;
            }
        }
        Ok(())
    }
}
