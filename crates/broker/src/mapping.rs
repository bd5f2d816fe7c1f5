//! Response mapping for SmartAPI-style brokers.
//!
//! Every endpoint answers with the same envelope
//! `{status, message, errorcode, data}` and may also fail at the HTTP level.
//! The functions here turn `(http status, body)` into the typed contracts of
//! [`algo_options_core::BrokerGateway`] so that the transport code never
//! inspects payloads itself.

use algo_options_core::{BrokerError, BrokerSession, Ltp, OrderAck, INVALID_TOKEN_CODE};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

/// Standard SmartAPI envelope.
#[derive(Debug, Clone, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errorcode: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

impl Envelope {
    fn message(&self) -> String {
        match (self.message.as_deref(), self.errorcode.as_deref()) {
            (Some(m), Some(c)) if !c.is_empty() => format!("{m} ({c})"),
            (Some(m), _) => m.to_string(),
            (None, Some(c)) => c.to_string(),
            (None, None) => "unknown broker error".to_string(),
        }
    }

    fn is_invalid_token(&self) -> bool {
        self.errorcode.as_deref() == Some(INVALID_TOKEN_CODE)
            || self
                .message
                .as_deref()
                .is_some_and(|m| m.to_lowercase().contains("invalid token"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
struct RawOrderData {
    orderid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLtpData {
    ltp: Value,
    #[serde(default, alias = "opnInterest", alias = "opninterest")]
    open_interest: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTokenData {
    jwt_token: String,
    refresh_token: Option<String>,
    feed_token: Option<String>,
}

/// Checks HTTP status and envelope, returning the envelope's `data`.
fn unwrap_envelope(http_status: u16, body: &Value) -> Result<Value, BrokerError> {
    if http_status == 403 || http_status == 429 {
        return Err(BrokerError::RateLimited {
            status: http_status,
        });
    }

    let envelope: Option<Envelope> = serde_json::from_value(body.clone()).ok();

    if let Some(env) = &envelope {
        if env.is_invalid_token() {
            return Err(BrokerError::InvalidSession(env.message()));
        }
    }

    if http_status == 401 {
        return Err(BrokerError::InvalidSession(format!("HTTP 401: {body}")));
    }

    if !(200..300).contains(&http_status) {
        let message = envelope.map_or_else(|| body.to_string(), |e| e.message());
        return Err(BrokerError::Api {
            status: http_status,
            message,
        });
    }

    let env = envelope.ok_or_else(|| BrokerError::Malformed(format!("no envelope in {body}")))?;
    if !env.status {
        return Err(BrokerError::Api {
            status: http_status,
            message: env.message(),
        });
    }

    env.data
        .filter(|d| !d.is_null())
        .ok_or_else(|| BrokerError::Malformed(format!("missing data in {body}")))
}

/// Maps a place-order answer. Refusals carry the full payload.
///
/// # Errors
/// `RateLimited` for HTTP 403/429, `InvalidSession` for expired tokens,
/// `Rejected` for any other refusal.
pub fn map_order_response(http_status: u16, body: &Value) -> Result<OrderAck, BrokerError> {
    let data = match unwrap_envelope(http_status, body) {
        Ok(data) => data,
        Err(BrokerError::Api { message, .. }) => {
            return Err(BrokerError::rejected(message, Some(body.clone())))
        }
        Err(BrokerError::Malformed(message)) => {
            return Err(BrokerError::rejected(message, Some(body.clone())))
        }
        Err(e) => return Err(e),
    };

    let raw: RawOrderData = serde_json::from_value(data)
        .map_err(|e| BrokerError::rejected(format!("unexpected order payload: {e}"), Some(body.clone())))?;

    match raw.orderid.filter(|id| !id.is_empty()) {
        Some(order_id) => Ok(OrderAck {
            order_id,
            raw: body.clone(),
        }),
        None => Err(BrokerError::rejected("order id missing", Some(body.clone()))),
    }
}

/// Maps an LTP answer.
///
/// # Errors
/// `RateLimited`, `InvalidSession`, `Api` or `Malformed`.
pub fn map_ltp_response(http_status: u16, body: &Value) -> Result<Ltp, BrokerError> {
    let data = unwrap_envelope(http_status, body)?;
    let raw: RawLtpData = serde_json::from_value(data)
        .map_err(|e| BrokerError::Malformed(format!("unexpected LTP payload: {e}")))?;

    let price = decimal_from(&raw.ltp)
        .ok_or_else(|| BrokerError::Malformed(format!("non-numeric ltp {}", raw.ltp)))?;
    let open_interest = raw
        .open_interest
        .as_ref()
        .and_then(decimal_from)
        .and_then(|oi| oi.trunc().to_u64());

    Ok(Ltp {
        price,
        open_interest,
    })
}

/// Maps a token refresh answer into the new session for `client_id`.
///
/// # Errors
/// `RateLimited` for HTTP 403/429, `RefreshFailed` for everything else.
pub fn map_refresh_response(
    client_id: &str,
    previous: &BrokerSession,
    http_status: u16,
    body: &Value,
) -> Result<BrokerSession, BrokerError> {
    let data = match unwrap_envelope(http_status, body) {
        Ok(data) => data,
        Err(BrokerError::RateLimited { status }) => return Err(BrokerError::RateLimited { status }),
        Err(e) => return Err(BrokerError::RefreshFailed(e.to_string())),
    };

    let raw: RawTokenData = serde_json::from_value(data)
        .map_err(|e| BrokerError::RefreshFailed(format!("unexpected token payload: {e}")))?;

    Ok(BrokerSession {
        client_id: client_id.to_string(),
        access_token: raw.jwt_token,
        refresh_token: raw.refresh_token.or_else(|| previous.refresh_token.clone()),
        feed_token: raw.feed_token.or_else(|| previous.feed_token.clone()),
    })
}

/// Brokers send prices as numbers or numeric strings.
fn decimal_from(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
