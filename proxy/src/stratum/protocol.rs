/// Stratum message model (NiceHash Stratum v1 dialect)
///
/// One struct covers requests, notifications and responses. `params` and
/// `result` are kept as raw JSON so that unrecognized methods pass through
/// without reshaping; the few methods the proxy rewrites are decoded on demand.
///
/// Reference: https://github.com/nicehash/Specifications/blob/master/EthereumStratum_NiceHash_v1.0.0.txt

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::{ProxyError, Result};

pub const METHOD_SUBSCRIBE: &str = "mining.subscribe";
pub const METHOD_AUTHORIZE: &str = "mining.authorize";
pub const METHOD_SUBMIT: &str = "mining.submit";
pub const METHOD_NOTIFY: &str = "mining.notify";

/// Password sent with every rebuilt authorize request.
pub const PLACEHOLDER_PASSWORD: &str = "x";

/// The methods the proxy treats specially. Everything else is opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Subscribe,
    Authorize,
    Submit,
    Notify,
    Other,
}

impl Method {
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some(METHOD_SUBSCRIBE) => Method::Subscribe,
            Some(METHOD_AUTHORIZE) => Method::Authorize,
            Some(METHOD_SUBMIT) => Method::Submit,
            Some(METHOD_NOTIFY) => Method::Notify,
            _ => Method::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Request ID (null on the wire reads as 0)
    #[serde(default, deserialize_with = "null_as_zero")]
    pub id: i64,

    /// Method name, absent on responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Method parameters, shape depends on the method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,

    /// Result payload on responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,

    /// NiceHash worker name carried on submits (null reads as empty)
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "String::is_empty")]
    pub worker: String,
}

fn null_as_zero<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Message {
    /// Parse one wire line.
    pub fn parse(line: &str) -> Result<Self> {
        Self::from_slice(line.as_bytes())
    }

    /// Parse one wire line as read off the socket.
    pub fn from_slice(line: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(line)?)
    }

    pub fn method(&self) -> Method {
        Method::from_name(self.method.as_deref())
    }

    /// Serialize to a single line, without the terminator.
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Success response the proxy hands the miner on behalf of an upstream.
    pub fn ack(id: i64) -> Result<Self> {
        Ok(Self {
            id,
            method: None,
            params: None,
            result: Some(raw(&Value::Bool(true))?),
            worker: String::new(),
        })
    }

    /// Copy of an authorize request with its credentials replaced.
    pub fn with_credentials(&self, username: &str, password: &str) -> Result<Self> {
        let params = Value::Array(vec![
            Value::String(username.to_string()),
            Value::String(password.to_string()),
        ]);
        Ok(Self {
            params: Some(raw(&params)?),
            ..self.clone()
        })
    }

    /// Copy of a submit with the worker field renamed. An empty worker stays
    /// empty so that miners which never set it keep the same wire shape.
    pub fn with_worker(&self, worker: &str) -> Self {
        let mut renamed = self.clone();
        if !renamed.worker.is_empty() {
            renamed.worker = worker.to_string();
        }
        renamed
    }

    /// Decode params as a JSON list. Missing params read as an empty list.
    pub fn param_list(&self) -> Result<Vec<Value>> {
        match &self.params {
            None => Ok(Vec::new()),
            Some(raw) => match serde_json::from_str::<Value>(raw.get())? {
                Value::Array(items) => Ok(items),
                Value::Null => Ok(Vec::new()),
                other => Err(ProxyError::InvalidParams(format!(
                    "expected a parameter list, got {}",
                    other
                ))),
            },
        }
    }

    /// Job id of a `mining.notify`: the first parameter, which must be a string.
    pub fn notify_job_id(&self) -> Result<String> {
        let params = self.param_list()?;
        let first = params
            .first()
            .ok_or_else(|| ProxyError::InvalidParams("notify without job id".into()))?;
        first
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProxyError::InvalidParams("id format not support".into()))
    }

    /// Job id echoed back in a `mining.submit`: `[username, job_id, ...]`.
    pub fn submit_job_id(&self) -> Result<String> {
        let params = self.param_list()?;
        if params.len() < 2 {
            return Err(ProxyError::InvalidParams(format!(
                "submit needs at least 2 params, got {}",
                params.len()
            )));
        }
        params[1]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProxyError::InvalidParams("job id is not a string".into()))
    }

    /// Username of a `mining.authorize`: `[username, password]`.
    pub fn authorize_username(&self) -> Result<String> {
        let params = self.param_list()?;
        params
            .first()
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProxyError::InvalidParams("authorize without username".into()))
    }
}

/// Wallet part of a `wallet.workerName` username.
pub fn wallet_of(username: &str) -> &str {
    username.split('.').next().unwrap_or(username)
}

fn raw(value: &Value) -> Result<Box<RawValue>> {
    Ok(serde_json::value::to_raw_value(value)?)
}
