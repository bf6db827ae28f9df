//! The structured turn envelope consumed from the oracle.
//!
//! The oracle outputs one JSON document per turn. Nothing in it is trusted:
//! the raw `serde_json::Value` is walked field by field and converted into
//! the internal sum type here, or rejected as a malformed envelope. Partial
//! acceptance is never allowed.

use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use crate::domain::ledger::MutationKind;
use crate::error::CoreError;

/// What the oracle wants this turn to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Reply,
    Mutate,
    Stop,
}

/// Whether the chat's pending ambiguity (if any) stays eligible for the
/// next inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Continue,
    Stop,
}

/// One outgoing message fragment with its requested pacing delay.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageFragment {
    pub text: String,
    pub delay_ms: u64,
}

/// A proposed ledger mutation, expressed with reference text in place of
/// resolved member ids. Resolution happens in the dispatcher, never here.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationIntent {
    pub kind: MutationKind,
    pub creditor_ref: String,
    pub debtor_ref: String,
    pub amount: Decimal,
    pub currency: String,
    pub note: Option<String>,
}

/// The validated envelope for one turn.
#[derive(Debug, Clone)]
pub struct DispatchEnvelope {
    pub kind: EnvelopeKind,
    pub fragments: Vec<MessageFragment>,
    pub intents: Vec<MutationIntent>,
    pub continuation: Continuation,
}

fn malformed(detail: impl Into<String>) -> CoreError {
    CoreError::MalformedEnvelope(detail.into())
}

impl DispatchEnvelope {
    /// Validate an untrusted oracle value into an envelope.
    ///
    /// Required fields: `kind`, `messages`, `continuation`. `mutations` is
    /// optional. Unknown enum values, non-numeric `delayMs`, and unparsable
    /// amounts all reject the whole envelope.
    pub fn from_value(value: &Value) -> Result<Self, CoreError> {
        let obj = value
            .as_object()
            .ok_or_else(|| malformed("envelope is not a JSON object"))?;

        let kind = match obj.get("kind") {
            Some(Value::String(s)) => match s.as_str() {
                "reply" => EnvelopeKind::Reply,
                "mutate" => EnvelopeKind::Mutate,
                "stop" => EnvelopeKind::Stop,
                other => return Err(malformed(format!("unknown kind `{other}`"))),
            },
            Some(_) => return Err(malformed("kind is not a string")),
            None => return Err(malformed("missing kind")),
        };

        let continuation = match obj.get("continuation") {
            Some(Value::String(s)) => match s.as_str() {
                "continue" => Continuation::Continue,
                "stop" => Continuation::Stop,
                other => return Err(malformed(format!("unknown continuation `{other}`"))),
            },
            Some(_) => return Err(malformed("continuation is not a string")),
            None => return Err(malformed("missing continuation")),
        };

        let messages = obj
            .get("messages")
            .ok_or_else(|| malformed("missing messages"))?
            .as_array()
            .ok_or_else(|| malformed("messages is not an array"))?;

        let mut fragments = Vec::with_capacity(messages.len());
        for (i, msg) in messages.iter().enumerate() {
            fragments.push(parse_fragment(msg).map_err(|e| match e {
                CoreError::MalformedEnvelope(d) => malformed(format!("messages[{i}]: {d}")),
                other => other,
            })?);
        }

        let mut intents = Vec::new();
        if let Some(mutations) = obj.get("mutations") {
            let arr = mutations
                .as_array()
                .ok_or_else(|| malformed("mutations is not an array"))?;
            for (i, m) in arr.iter().enumerate() {
                intents.push(parse_intent(m).map_err(|e| match e {
                    CoreError::MalformedEnvelope(d) => malformed(format!("mutations[{i}]: {d}")),
                    other => other,
                })?);
            }
        }

        Ok(Self {
            kind,
            fragments,
            intents,
            continuation,
        })
    }
}

fn parse_fragment(value: &Value) -> Result<MessageFragment, CoreError> {
    let obj = value
        .as_object()
        .ok_or_else(|| malformed("fragment is not an object"))?;

    let text = obj
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing or non-string text"))?
        .to_string();

    let delay_ms = parse_delay(obj.get("delayMs").ok_or_else(|| malformed("missing delayMs"))?)?;

    Ok(MessageFragment { text, delay_ms })
}

/// `delayMs` arrives as a number or as a numeric string; anything else is
/// a malformed envelope.
fn parse_delay(value: &Value) -> Result<u64, CoreError> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Ok(v)
            } else if let Some(f) = n.as_f64() {
                if f.is_finite() && f >= 0.0 {
                    Ok(f as u64)
                } else {
                    Err(malformed(format!("delayMs out of range: {f}")))
                }
            } else {
                Err(malformed("delayMs is negative"))
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| malformed(format!("non-numeric delayMs `{s}`"))),
        _ => Err(malformed("delayMs is neither number nor string")),
    }
}

fn parse_intent(value: &Value) -> Result<MutationIntent, CoreError> {
    let obj = value
        .as_object()
        .ok_or_else(|| malformed("mutation is not an object"))?;

    let shape = obj
        .get("queryShape")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing queryShape"))?;
    let kind = MutationKind::from_shape(shape)
        .ok_or_else(|| malformed(format!("unknown queryShape `{shape}`")))?;

    let params = obj
        .get("params")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed("missing params object"))?;

    let creditor_ref = required_string(params, "creditorRef")?;
    let debtor_ref = required_string(params, "debtorRef")?;
    let amount = parse_amount(params.get("amount").ok_or_else(|| malformed("missing amount"))?)?;
    let currency = parse_currency(params.get("currency"))?;
    let note = match params.get("note") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.to_string()),
        Some(_) => return Err(malformed("note is not a string")),
    };

    Ok(MutationIntent {
        kind,
        creditor_ref,
        debtor_ref,
        amount,
        currency,
        note,
    })
}

fn required_string(
    params: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<String, CoreError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| malformed(format!("missing or non-string {key}")))
}

/// Amounts arrive normalized (plain numeric), as a number or a string.
/// Range checks (positivity) belong to the ledger executor.
fn parse_amount(value: &Value) -> Result<Decimal, CoreError> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .map_err(|_| malformed(format!("unparsable amount `{n}`"))),
        Value::String(s) => Decimal::from_str(s.trim())
            .map_err(|_| malformed(format!("unparsable amount `{s}`"))),
        _ => Err(malformed("amount is neither number nor string")),
    }
}

/// ISO-ish currency code: 3 to 5 ASCII letters, normalized to uppercase.
/// Defaults to VND when absent, the ledger's home currency.
fn parse_currency(value: Option<&Value>) -> Result<String, CoreError> {
    let code = match value {
        None | Some(Value::Null) => return Ok("VND".to_string()),
        Some(Value::String(s)) => s.trim(),
        Some(_) => return Err(malformed("currency is not a string")),
    };
    if (3..=5).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(malformed(format!("invalid currency code `{code}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_mutate_envelope() {
        let v = json!({
            "kind": "mutate",
            "messages": [
                {"text": "Ok để mình ghi lại nhé", "delayMs": 400},
                {"text": "Xong rồi đó!", "delayMs": "1200"}
            ],
            "mutations": [{
                "queryShape": "debt.create",
                "params": {
                    "creditorRef": "Thịnh",
                    "debtorRef": "Huy",
                    "amount": "200000",
                    "currency": "vnd",
                    "note": "tiền bún chả"
                }
            }],
            "continuation": "continue"
        });

        let env = DispatchEnvelope::from_value(&v).unwrap();
        assert_eq!(env.kind, EnvelopeKind::Mutate);
        assert_eq!(env.continuation, Continuation::Continue);
        assert_eq!(env.fragments.len(), 2);
        assert_eq!(env.fragments[0].delay_ms, 400);
        assert_eq!(env.fragments[1].delay_ms, 1200);
        assert_eq!(env.intents.len(), 1);
        let intent = &env.intents[0];
        assert_eq!(intent.kind, MutationKind::Debt);
        assert_eq!(intent.creditor_ref, "Thịnh");
        assert_eq!(intent.amount, Decimal::from(200_000));
        assert_eq!(intent.currency, "VND");
        assert_eq!(intent.note.as_deref(), Some("tiền bún chả"));
    }

    #[test]
    fn numeric_amount_and_default_currency() {
        let v = json!({
            "kind": "mutate",
            "messages": [],
            "mutations": [{
                "queryShape": "payment.record",
                "params": {"creditorRef": "A", "debtorRef": "B", "amount": 50000}
            }],
            "continuation": "stop"
        });
        let env = DispatchEnvelope::from_value(&v).unwrap();
        assert_eq!(env.intents[0].amount, Decimal::from(50_000));
        assert_eq!(env.intents[0].currency, "VND");
    }

    #[test]
    fn rejects_missing_kind() {
        let v = json!({"messages": [], "continuation": "stop"});
        let err = DispatchEnvelope::from_value(&v).unwrap_err();
        assert!(matches!(err, CoreError::MalformedEnvelope(d) if d.contains("kind")));
    }

    #[test]
    fn rejects_unknown_kind() {
        let v = json!({"kind": "dance", "messages": [], "continuation": "stop"});
        assert!(DispatchEnvelope::from_value(&v).is_err());
    }

    #[test]
    fn rejects_missing_messages() {
        let v = json!({"kind": "reply", "continuation": "stop"});
        let err = DispatchEnvelope::from_value(&v).unwrap_err();
        assert!(matches!(err, CoreError::MalformedEnvelope(d) if d.contains("messages")));
    }

    #[test]
    fn rejects_missing_continuation() {
        let v = json!({"kind": "reply", "messages": []});
        assert!(DispatchEnvelope::from_value(&v).is_err());
    }

    #[test]
    fn rejects_non_numeric_delay() {
        let v = json!({
            "kind": "reply",
            "messages": [{"text": "hi", "delayMs": "soon"}],
            "continuation": "stop"
        });
        let err = DispatchEnvelope::from_value(&v).unwrap_err();
        assert!(matches!(err, CoreError::MalformedEnvelope(d) if d.contains("delayMs")));
    }

    #[test]
    fn rejects_unknown_query_shape() {
        let v = json!({
            "kind": "mutate",
            "messages": [],
            "mutations": [{
                "queryShape": "debt.obliterate",
                "params": {"creditorRef": "A", "debtorRef": "B", "amount": 1}
            }],
            "continuation": "stop"
        });
        assert!(DispatchEnvelope::from_value(&v).is_err());
    }

    #[test]
    fn rejects_unparsable_amount() {
        let v = json!({
            "kind": "mutate",
            "messages": [],
            "mutations": [{
                "queryShape": "debt.create",
                "params": {"creditorRef": "A", "debtorRef": "B", "amount": "hai trăm"}
            }],
            "continuation": "stop"
        });
        assert!(DispatchEnvelope::from_value(&v).is_err());
    }

    #[test]
    fn rejects_bad_currency() {
        let v = json!({
            "kind": "mutate",
            "messages": [],
            "mutations": [{
                "queryShape": "debt.create",
                "params": {"creditorRef": "A", "debtorRef": "B", "amount": 1, "currency": "₫"}
            }],
            "continuation": "stop"
        });
        assert!(DispatchEnvelope::from_value(&v).is_err());
    }

    #[test]
    fn rejects_non_object_envelope() {
        assert!(DispatchEnvelope::from_value(&json!([1, 2, 3])).is_err());
        assert!(DispatchEnvelope::from_value(&json!("reply")).is_err());
    }

    #[test]
    fn error_message_names_the_offending_index() {
        let v = json!({
            "kind": "reply",
            "messages": [
                {"text": "ok", "delayMs": 300},
                {"text": "bad", "delayMs": []}
            ],
            "continuation": "stop"
        });
        let err = DispatchEnvelope::from_value(&v).unwrap_err();
        assert!(matches!(err, CoreError::MalformedEnvelope(d) if d.contains("messages[1]")));
    }
}
