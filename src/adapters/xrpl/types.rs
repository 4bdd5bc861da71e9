//! XRPL WebSocket message types
//!
//! Only the fields the tracker reads are modelled. Everything else on the
//! wire is ignored.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::ports::{AccountActivity, FetchError};

/// Error code returned by `account_info` for unfunded accounts
pub const ACCOUNT_NOT_FOUND: &str = "actNotFound";

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    id: Option<u64>,
    status: Option<String>,
    result: Option<Value>,
    error: Option<String>,
    hash: Option<String>,
    transaction: Option<RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountInfoResult {
    account_data: AccountData,
}

#[derive(Debug, Deserialize)]
struct AccountData {
    #[serde(rename = "Balance")]
    balance: String,
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerMessage {
    /// Reply to a request; `Err` carries the node's error code
    Response {
        id: Option<u64>,
        outcome: Result<Value, String>,
    },
    /// Transaction touching a subscribed account
    Transaction(AccountActivity),
    /// Ledger closes, server status and anything else
    Other,
}

/// Decode one text frame
pub fn parse_message(text: &str) -> Result<LedgerMessage, FetchError> {
    let raw: RawMessage = serde_json::from_str(text)?;

    match raw.kind.as_deref() {
        Some("response") => {
            let outcome = if raw.status.as_deref() == Some("success") {
                Ok(raw.result.unwrap_or(Value::Null))
            } else {
                Err(raw.error.unwrap_or_else(|| "unknown".to_string()))
            };
            Ok(LedgerMessage::Response { id: raw.id, outcome })
        }
        Some("transaction") => {
            let tx_hash = raw.hash.or_else(|| raw.transaction.and_then(|tx| tx.hash));
            Ok(LedgerMessage::Transaction(AccountActivity { tx_hash }))
        }
        _ => Ok(LedgerMessage::Other),
    }
}

/// Balance in drops from an `account_info` result
pub fn parse_balance(result: &Value) -> Result<u64, FetchError> {
    let info = AccountInfoResult::deserialize(result)?;
    info.account_data
        .balance
        .parse::<u64>()
        .map_err(|e| FetchError::Malformed(format!("Balance: {}", e)))
}

pub fn account_info_request(id: u64, address: &str) -> Value {
    json!({
        "id": id,
        "command": "account_info",
        "account": address,
        "ledger_index": "validated",
    })
}

pub fn subscribe_request(id: u64, addresses: &[String]) -> Value {
    json!({
        "id": id,
        "command": "subscribe",
        "accounts": addresses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_account_info() {
        let text = r#"{
            "id": 3,
            "result": {
                "account_data": {
                    "Account": "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh",
                    "Balance": "25000000",
                    "Sequence": 7
                },
                "ledger_index": 91234567,
                "validated": true
            },
            "status": "success",
            "type": "response"
        }"#;

        match parse_message(text).unwrap() {
            LedgerMessage::Response { id, outcome } => {
                assert_eq!(id, Some(3));
                assert_eq!(parse_balance(&outcome.unwrap()).unwrap(), 25_000_000);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_response() {
        let text = r#"{
            "error": "actNotFound",
            "error_code": 19,
            "id": 4,
            "status": "error",
            "type": "response"
        }"#;

        assert_eq!(
            parse_message(text).unwrap(),
            LedgerMessage::Response {
                id: Some(4),
                outcome: Err(ACCOUNT_NOT_FOUND.to_string())
            }
        );
    }

    #[test]
    fn test_parse_transaction() {
        let text = r#"{
            "type": "transaction",
            "validated": true,
            "transaction": {"TransactionType": "Payment", "hash": "ABC123"}
        }"#;
        assert_eq!(
            parse_message(text).unwrap(),
            LedgerMessage::Transaction(AccountActivity {
                tx_hash: Some("ABC123".to_string())
            })
        );
    }

    #[test]
    fn test_parse_ledger_closed_ignored() {
        let text = r#"{"type": "ledgerClosed", "ledger_index": 91234568}"#;
        assert_eq!(parse_message(text).unwrap(), LedgerMessage::Other);
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(parse_message("not json"), Err(FetchError::Malformed(_))));
        assert!(matches!(
            parse_balance(&json!({"account_data": {"Balance": "-5"}})),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn test_requests() {
        let request = account_info_request(9, "rTest");
        assert_eq!(request["command"], "account_info");
        assert_eq!(request["ledger_index"], "validated");

        let request = subscribe_request(1, &["rA".to_string(), "rB".to_string()]);
        assert_eq!(request["accounts"], json!(["rA", "rB"]));
    }
}
