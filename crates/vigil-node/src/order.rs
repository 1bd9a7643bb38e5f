//! [`OrderRelay`] – stamps locally placed orders with the store id.
//!
//! A store's order source hands over lines of the form
//! `ORDER:<product>:<quantity>`.  The relay turns each into an [`Order`] for
//! the hub, which travels as `ORDER:<store_id>:<product>:<quantity>`.
//! Where the lines come from (a file, a FIFO, stdin) is the caller's concern.

use vigil_types::{ClientId, Order, VigilError, wire};

/// Translator from local order lines to hub orders.
#[derive(Debug, Clone)]
pub struct OrderRelay {
    store_id: ClientId,
}

impl OrderRelay {
    pub fn new(store_id: ClientId) -> Self {
        Self { store_id }
    }

    pub fn store_id(&self) -> &ClientId {
        &self.store_id
    }

    /// Parse one local order line.
    ///
    /// Blank lines yield `Ok(None)`.  Every order returned encodes to a line
    /// the hub parses back to the same order.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::MalformedMessage`] when the line is not exactly
    /// `ORDER:<product>:<quantity>` (so the product cannot contain `:`) or
    /// the quantity is not a non-negative integer.
    pub fn translate(&self, line: &str) -> Result<Option<Order>, VigilError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let Some(rest) = line.strip_prefix(wire::ORDER_PREFIX) else {
            return Err(malformed(line, "must be ORDER:product:quantity"));
        };
        let fields: Vec<&str> = rest.split(':').collect();
        let [product, quantity] = fields.as_slice() else {
            return Err(malformed(line, "must be ORDER:product:quantity"));
        };
        let product = product.trim();
        if product.is_empty() {
            return Err(malformed(line, "empty product"));
        }
        let quantity = quantity.trim().parse::<u32>().map_err(|e| {
            malformed(line, &format!("quantity is not a non-negative integer: {e}"))
        })?;

        Ok(Some(Order {
            store_id: self.store_id.clone(),
            product: product.to_string(),
            quantity,
        }))
    }
}

fn malformed(line: &str, reason: &str) -> VigilError {
    VigilError::MalformedMessage {
        line: line.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::InboundMessage;

    fn relay() -> OrderRelay {
        OrderRelay::new(ClientId::from("Store-A"))
    }

    #[test]
    fn translates_local_order() {
        let order = relay().translate("ORDER:Widget:3\n").unwrap().unwrap();
        assert_eq!(order.store_id.as_str(), "Store-A");
        assert_eq!(order.product, "Widget");
        assert_eq!(order.quantity, 3);
        assert_eq!(wire::encode_order(&order), "ORDER:Store-A:Widget:3\n");
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(relay().translate("   \n").unwrap().is_none());
    }

    #[test]
    fn product_with_colon_is_rejected() {
        assert!(matches!(
            relay().translate("ORDER:Bolt:M4:10"),
            Err(VigilError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn translated_orders_parse_back_at_the_hub() {
        for line in ["ORDER:Widget:3", "ORDER: Gadget :0", "ORDER:Big Box:4294967295"] {
            let order = relay().translate(line).unwrap().unwrap();
            assert_eq!(
                wire::parse_line(&wire::encode_order(&order)).unwrap(),
                InboundMessage::Order(order),
                "{line}"
            );
        }
    }

    #[test]
    fn rejects_bad_lines() {
        for line in ["Widget:3", "ORDER:Widget", "ORDER::3", "ORDER:Widget:many", "ORDER:Widget:-2"] {
            assert!(
                matches!(relay().translate(line), Err(VigilError::MalformedMessage { .. })),
                "{line}"
            );
        }
    }
}
