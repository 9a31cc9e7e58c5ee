//! Book events
//!
//! The JSON body published whenever a transaction is recorded:
//!
//! ```json
//! {"event":"book_purchase","userId":"42","bookId":7,"transactionType":"PURCHASE","timestamp":"2024-05-01T12:00:00Z"}
//! ```

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::broker::InboundMessage;
use crate::client::dispatcher::{HandlerError, MessageHandler};

pub const BOOK_PURCHASE_EVENT: &str = "book_purchase";
pub const BOOK_PURCHASES_DESTINATION: &str = "/topic/book-purchases";

/// `YYYY-MM-DDTHH:MM:SSZ`, always UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Borrow,
    Purchase,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Borrow => f.write_str("BORROW"),
            TransactionType::Purchase => f.write_str("PURCHASE"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BORROW" => Ok(TransactionType::Borrow),
            "PURCHASE" => Ok(TransactionType::Purchase),
            _ => Err(format!(
                "transactionType must be BORROW or PURCHASE, got `{s}`"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookEvent {
    pub event: String,
    pub user_id: String,
    pub book_id: i64,
    pub transaction_type: TransactionType,
    pub timestamp: String,
}

impl BookEvent {
    pub fn new(user_id: impl Into<String>, book_id: i64, transaction_type: TransactionType) -> Self {
        Self::at(user_id, book_id, transaction_type, Utc::now())
    }

    pub fn at(
        user_id: impl Into<String>,
        book_id: i64,
        transaction_type: TransactionType,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            event: BOOK_PURCHASE_EVENT.to_string(),
            user_id: user_id.into(),
            book_id,
            transaction_type,
            timestamp: format_timestamp(at),
        }
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Logs every `book_purchase` event it receives. Bodies that are not valid
/// JSON are reported as handler errors.
#[derive(Debug, Default, Clone)]
pub struct BookPurchaseLogger;

#[async_trait]
impl MessageHandler for BookPurchaseLogger {
    async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError> {
        let value: serde_json::Value = message
            .decode()
            .map_err(|e| format!("invalid JSON message `{}`: {e}", message.body))?;

        if value.get("event").and_then(|e| e.as_str()) != Some(BOOK_PURCHASE_EVENT) {
            debug!("Ignoring non-purchase event on {}", message.destination);
            return Ok(());
        }

        let event: BookEvent = serde_json::from_value(value)?;
        info!(
            "Processed book purchase: userId={}, bookId={}, transactionType={}",
            event.user_id, event.book_id, event.transaction_type
        );
        Ok(())
    }
}
