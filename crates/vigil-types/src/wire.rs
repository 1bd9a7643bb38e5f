//! Line codec for the hub wire protocol.
//!
//! One message per newline-terminated UTF-8 line; the hub never replies.
//!
//! | Line | Parsed as |
//! |---|---|
//! | `PULSE:<client_id>` | [`InboundMessage::Pulse`] |
//! | `ORDER:<store_id>:<product>:<quantity>` | [`InboundMessage::Order`] |
//! | anything else | [`InboundMessage::Unknown`] |
//!
//! A `PULSE:` id ends at the next `:`, so `PULSE:Car-1:extra` pulses for
//! `Car-1`.  Fields are trimmed.  `quantity` is a base-10 `u32`.

use crate::{ClientId, InboundMessage, Order, VigilError};

pub const PULSE_PREFIX: &str = "PULSE:";
pub const ORDER_PREFIX: &str = "ORDER:";

/// Classify one line (with or without its trailing newline).
///
/// # Errors
///
/// Returns [`VigilError::MalformedMessage`] for a `PULSE:` line with an empty
/// id, or an `ORDER:` line with the wrong field count, an empty field, or a
/// quantity that is not a non-negative integer.  Lines with no known prefix
/// are not errors.
pub fn parse_line(line: &str) -> Result<InboundMessage, VigilError> {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(rest) = line.strip_prefix(PULSE_PREFIX) {
        let id = rest.split(':').next().unwrap_or_default().trim();
        if id.is_empty() {
            return Err(malformed(line, "pulse without a client id"));
        }
        return Ok(InboundMessage::Pulse { id: ClientId::from(id) });
    }

    if let Some(rest) = line.strip_prefix(ORDER_PREFIX) {
        let fields: Vec<&str> = rest.split(':').map(str::trim).collect();
        let [store_id, product, quantity] = fields.as_slice() else {
            return Err(malformed(
                line,
                &format!("expected ORDER:storeId:product:quantity, got {} field(s)", fields.len()),
            ));
        };
        if store_id.is_empty() || product.is_empty() {
            return Err(malformed(line, "empty store id or product"));
        }
        let quantity = quantity
            .parse::<u32>()
            .map_err(|e| malformed(line, &format!("quantity {quantity:?} is not a non-negative integer: {e}")))?;
        return Ok(InboundMessage::Order(Order {
            store_id: ClientId::from(*store_id),
            product: product.to_string(),
            quantity,
        }));
    }

    Ok(InboundMessage::Unknown { raw: line.to_string() })
}

/// `PULSE:<id>\n`
pub fn encode_pulse(id: &ClientId) -> String {
    format!("{PULSE_PREFIX}{id}\n")
}

/// `ORDER:<store_id>:<product>:<quantity>\n`
pub fn encode_order(order: &Order) -> String {
    format!(
        "{ORDER_PREFIX}{}:{}:{}\n",
        order.store_id, order.product, order.quantity
    )
}

fn malformed(line: &str, reason: &str) -> VigilError {
    VigilError::MalformedMessage {
        line: line.to_string(),
        reason: reason.to_string(),
    }
}
