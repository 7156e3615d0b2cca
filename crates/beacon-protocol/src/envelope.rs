// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The envelope wire container: one JSON header line, then a sequence of
//! items, each a JSON item-header line followed by the payload bytes.
//!
//! Encoding is pure and allocation-local; nothing here touches the
//! network. Items with a `length` field carry opaque bytes (which may
//! contain newlines); items without one are single-line JSON documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::client_report::ClientReport;
use crate::dsc::DynamicSamplingContext;
use crate::event::Event;
use crate::ids::EventId;
use crate::metric::MetricBatch;
use crate::session::{Session, SessionAggregates};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid envelope header: {0}")]
    Header(#[source] serde_json::Error),

    #[error("invalid item header: {0}")]
    ItemHeader(#[source] serde_json::Error),

    #[error("item payload length mismatch: declared {declared}, available {available}")]
    LengthMismatch { declared: u64, available: u64 },

    #[error("missing newline after item payload")]
    MissingPayloadTerminator,
}

/// Type tag of one envelope item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Event,
    Transaction,
    Session,
    Sessions,
    ClientReport,
    MetricBatch,
    Attachment,
}

impl ItemType {
    /// The rate-limit category this item is accounted under.
    pub fn category(&self) -> Category {
        match self {
            ItemType::Event => Category::Error,
            ItemType::Transaction => Category::Transaction,
            ItemType::Session | ItemType::Sessions => Category::Session,
            ItemType::Attachment => Category::Attachment,
            ItemType::ClientReport | ItemType::MetricBatch => Category::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemHeader {
    #[serde(rename = "type")]
    pub ty: ItemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeItem {
    pub header: ItemHeader,
    pub payload: Vec<u8>,
}

impl EnvelopeItem {
    /// Serializes an event, picking the `event` or `transaction` item
    /// type from the payload shape.
    pub fn from_event(event: &Event) -> Result<Self, serde_json::Error> {
        let ty = if event.is_transaction() {
            ItemType::Transaction
        } else {
            ItemType::Event
        };
        Ok(EnvelopeItem {
            header: ItemHeader {
                ty,
                length: None,
                filename: None,
                content_type: None,
            },
            payload: serde_json::to_vec(event)?,
        })
    }

    /// Serializes one individual session update.
    pub fn from_session(session: &Session) -> Result<Self, serde_json::Error> {
        Ok(EnvelopeItem {
            header: ItemHeader {
                ty: ItemType::Session,
                length: None,
                filename: None,
                content_type: None,
            },
            payload: serde_json::to_vec(session)?,
        })
    }

    pub fn from_sessions(aggregates: &SessionAggregates) -> Result<Self, serde_json::Error> {
        Ok(EnvelopeItem {
            header: ItemHeader {
                ty: ItemType::Sessions,
                length: None,
                filename: None,
                content_type: None,
            },
            payload: serde_json::to_vec(aggregates)?,
        })
    }

    pub fn from_metrics(batch: &MetricBatch) -> Result<Self, serde_json::Error> {
        Ok(EnvelopeItem {
            header: ItemHeader {
                ty: ItemType::MetricBatch,
                length: None,
                filename: None,
                content_type: None,
            },
            payload: serde_json::to_vec(batch)?,
        })
    }

    pub fn from_client_report(report: &ClientReport) -> Result<Self, serde_json::Error> {
        Ok(EnvelopeItem {
            header: ItemHeader {
                ty: ItemType::ClientReport,
                length: None,
                filename: None,
                content_type: None,
            },
            payload: serde_json::to_vec(report)?,
        })
    }

    /// Builds a binary attachment item. The length field is always set
    /// and always matches the payload.
    pub fn attachment(filename: &str, content_type: Option<&str>, bytes: Vec<u8>) -> Self {
        EnvelopeItem {
            header: ItemHeader {
                ty: ItemType::Attachment,
                length: Some(bytes.len() as u64),
                filename: Some(filename.to_string()),
                content_type: content_type.map(str::to_string),
            },
            payload: bytes,
        }
    }

    pub fn category(&self) -> Category {
        self.header.ty.category()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<DynamicSamplingContext>,
}

impl EnvelopeHeader {
    pub fn new() -> Self {
        EnvelopeHeader {
            event_id: None,
            sent_at: Utc::now(),
            dsn: None,
            trace: None,
        }
    }
}

impl Default for EnvelopeHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable, ordered bundle of items behind one header.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub header: EnvelopeHeader,
    pub items: Vec<EnvelopeItem>,
}

impl Envelope {
    pub fn new(header: EnvelopeHeader) -> Self {
        Envelope {
            header,
            items: Vec::new(),
        }
    }

    pub fn add_item(&mut self, item: EnvelopeItem) {
        self.items.push(item);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Categories present in this envelope, deduplicated, in item order.
    pub fn categories(&self) -> Vec<Category> {
        let mut categories = Vec::new();
        for item in &self.items {
            let category = item.category();
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
        categories
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut out = serde_json::to_vec(&self.header)?;
        out.push(b'\n');
        for item in &self.items {
            out.extend_from_slice(&serde_json::to_vec(&item.header)?);
            out.push(b'\n');
            out.extend_from_slice(&item.payload);
            out.push(b'\n');
        }
        Ok(out)
    }

    /// Exact inverse of [`Envelope::to_bytes`]. Fails without partial
    /// effects on malformed headers, truncation or length mismatches.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut pos = 0;
        let header_line = take_line(bytes, &mut pos);
        let header: EnvelopeHeader =
            serde_json::from_slice(header_line).map_err(ParseError::Header)?;

        let mut items = Vec::new();
        while pos < bytes.len() {
            let item_header_line = take_line(bytes, &mut pos);
            let item_header: ItemHeader =
                serde_json::from_slice(item_header_line).map_err(ParseError::ItemHeader)?;

            let payload = match item_header.length {
                Some(declared) => {
                    let available = (bytes.len() - pos) as u64;
                    if declared > available {
                        return Err(ParseError::LengthMismatch {
                            declared,
                            available,
                        });
                    }
                    let end = pos + declared as usize;
                    let payload = bytes[pos..end].to_vec();
                    pos = end;
                    if pos < bytes.len() {
                        if bytes[pos] != b'\n' {
                            return Err(ParseError::MissingPayloadTerminator);
                        }
                        pos += 1;
                    }
                    payload
                }
                None => take_line(bytes, &mut pos).to_vec(),
            };

            items.push(EnvelopeItem {
                header: item_header,
                payload,
            });
        }

        Ok(Envelope { header, items })
    }
}

/// Returns the slice up to the next newline and advances past it. The
/// final line may be unterminated.
fn take_line<'a>(bytes: &'a [u8], pos: &mut usize) -> &'a [u8] {
    let start = *pos;
    match bytes[start..].iter().position(|b| *b == b'\n') {
        Some(offset) => {
            *pos = start + offset + 1;
            &bytes[start..start + offset]
        }
        None => {
            *pos = bytes.len();
            &bytes[start..]
        }
    }
}
