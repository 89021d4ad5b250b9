use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tally_shared::AppError;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Failure of a remote command, as seen by the client.
///
/// The first four variants mirror the backend's `AppError`; the last one is
/// synthesized locally when the command could not be reached or its reply
/// could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum CommandError {
    #[error("db error: {0}")]
    Db(String),
    #[error("not found")]
    NotFound,
    #[error("regex error: {0}")]
    Regex(String),
    #[error("{0}")]
    Other(String),
    #[error("transport failure: {0}")]
    TransportFailure(String),
}

impl CommandError {
    /// Full structured error, pretty printed for the clipboard.
    pub fn detail_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.to_string())
    }
}

impl From<AppError> for CommandError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Db(detail) => Self::Db(detail),
            AppError::NotFound => Self::NotFound,
            AppError::Regex(detail) => Self::Regex(detail),
            AppError::Other(detail) => Self::Other(detail),
        }
    }
}

/// The desktop shell's command channel.
///
/// `Ok` carries whatever the command answered, its data or the backend's
/// error shape. `Err` means the call itself failed: the backend was
/// unreachable or the bridge could not serialize.
pub trait CommandTransport: Send + Sync {
    fn invoke(
        &self,
        command: &str,
        payload: Value,
    ) -> impl Future<Output = Result<Value, String>> + Send;
}

#[derive(Debug, Clone)]
pub struct CommandClient<T> {
    transport: T,
}

impl<T: CommandTransport> CommandClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[instrument(skip_all, fields(command = command))]
    pub async fn call(&self, command: &str, payload: Value) -> Result<Value, CommandError> {
        let raw = self
            .transport
            .invoke(command, payload)
            .await
            .map_err(|err| {
                warn!(command, error = %err, "command transport failed");
                CommandError::TransportFailure(err)
            })?;
        decode_reply(command, raw)
    }

    pub async fn call_as<R>(&self, command: &str, payload: Value) -> Result<R, CommandError>
    where
        R: DeserializeOwned,
    {
        let data = self.call(command, payload).await?;
        serde_json::from_value(data).map_err(|err| {
            CommandError::TransportFailure(format!("failed to decode {command} reply: {err}"))
        })
    }
}

/// Turns a raw reply into the tagged result. A command answers with either
/// its data or an `AppError` (`{"type": .., "data": ..}`); this is the only
/// place the two are told apart.
pub fn decode_reply(command: &str, raw: Value) -> Result<Value, CommandError> {
    if !is_error_shape(&raw) {
        return Ok(raw);
    }
    match serde_json::from_value::<AppError>(raw) {
        Ok(err) => {
            let err = CommandError::from(err);
            debug!(command, error = %err, "command returned an error");
            Err(err)
        }
        Err(err) => Err(CommandError::TransportFailure(format!(
            "unrecognized error from {command}: {err}"
        ))),
    }
}

/// An object with a string `type` and at most a `data` field beside it.
/// Rows that merely carry a `type` column have other fields too.
fn is_error_shape(raw: &Value) -> bool {
    let Some(fields) = raw.as_object() else {
        return false;
    };
    fields.get("type").is_some_and(Value::is_string)
        && fields.keys().all(|key| key == "type" || key == "data")
}

pub fn encode_args<A>(args: &A) -> Result<Value, CommandError>
where
    A: Serialize + ?Sized,
{
    serde_json::to_value(args)
        .map_err(|err| CommandError::TransportFailure(format!("failed to encode args: {err}")))
}
