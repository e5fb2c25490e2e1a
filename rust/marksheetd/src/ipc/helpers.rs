use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::store::StoreError;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        if let StoreError::Db(inner) = &e {
            tracing::error!(error = ?inner, "storage failure");
        }
        HandlerErr {
            code: e.code(),
            details: e.details(),
            message: e.to_string(),
        }
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(|| HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".to_string(),
        details: None,
    })
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Deserializes a params field into a typed value. Type mismatches (for
/// example a mark sent as the string "abc") are rejected as invalid input
/// rather than coerced.
pub fn parse_field<T: DeserializeOwned>(
    params: &serde_json::Value,
    key: &str,
) -> Result<T, HandlerErr> {
    let Some(raw) = params.get(key) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    serde_json::from_value(raw.clone()).map_err(|e| HandlerErr {
        code: "invalid_input",
        message: format!("invalid {}: {}", key, e),
        details: Some(json!({ "field": key })),
    })
}

/// Like [`parse_field`] but for the whole params object.
pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    serde_json::from_value(params.clone()).map_err(|e| HandlerErr {
        code: "invalid_input",
        message: format!("invalid params: {}", e),
        details: None,
    })
}

pub fn get_id_list(
    params: &serde_json::Value,
    key: &str,
    max: usize,
) -> Result<Vec<String>, HandlerErr> {
    let ids: Vec<String> = params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must contain strings", key)))
        })
        .collect::<Result<_, _>>()?;
    if ids.len() > max {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("too many ids in {} (max {})", key, max),
            details: Some(json!({ "count": ids.len(), "max": max })),
        });
    }
    Ok(ids)
}
