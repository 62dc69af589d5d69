use uuid::Uuid;

/// Settlement facts published after a unit of work commits.
///
/// Statuses and reasons travel as their snake_case wire names so consumers do
/// not need the order crate to decode them.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SettlementEvent {
    OrderPlaced {
        order_id: Uuid,
        order_number: String,
        buyer_id: Uuid,
        total_amount: i64,
        currency: String,
        escrow_count: usize,
        timestamp: i64,
    },
    OrderStatusChanged {
        order_id: Uuid,
        from: String,
        to: String,
        timestamp: i64,
    },
    EscrowFunded {
        escrow_id: Uuid,
        order_id: Uuid,
        vendor_id: Uuid,
        amount: i64,
        timestamp: i64,
    },
    EscrowAwaitingConfirmation {
        escrow_id: Uuid,
        order_id: Uuid,
        buyer_id: Uuid,
        confirmation_deadline: i64,
        timestamp: i64,
    },
    EscrowReleased {
        escrow_id: Uuid,
        order_id: Uuid,
        vendor_id: Uuid,
        amount: i64,
        reason: String,
        timestamp: i64,
    },
    EscrowRefunded {
        escrow_id: Uuid,
        order_id: Uuid,
        buyer_id: Uuid,
        amount: i64,
        reason: String,
        timestamp: i64,
    },
    EscrowCancelled {
        escrow_id: Uuid,
        order_id: Uuid,
        timestamp: i64,
    },
    EscrowDisputed {
        escrow_id: Uuid,
        order_id: Uuid,
        reason: String,
        timestamp: i64,
    },
}

impl SettlementEvent {
    /// Every event is keyed by its order so consumers see one order's history in sequence.
    pub fn order_id(&self) -> Uuid {
        match self {
            SettlementEvent::OrderPlaced { order_id, .. }
            | SettlementEvent::OrderStatusChanged { order_id, .. }
            | SettlementEvent::EscrowFunded { order_id, .. }
            | SettlementEvent::EscrowAwaitingConfirmation { order_id, .. }
            | SettlementEvent::EscrowReleased { order_id, .. }
            | SettlementEvent::EscrowRefunded { order_id, .. }
            | SettlementEvent::EscrowCancelled { order_id, .. }
            | SettlementEvent::EscrowDisputed { order_id, .. } => *order_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettlementEvent::OrderPlaced { .. } => "order_placed",
            SettlementEvent::OrderStatusChanged { .. } => "order_status_changed",
            SettlementEvent::EscrowFunded { .. } => "escrow_funded",
            SettlementEvent::EscrowAwaitingConfirmation { .. } => "escrow_awaiting_confirmation",
            SettlementEvent::EscrowReleased { .. } => "escrow_released",
            SettlementEvent::EscrowRefunded { .. } => "escrow_refunded",
            SettlementEvent::EscrowCancelled { .. } => "escrow_cancelled",
            SettlementEvent::EscrowDisputed { .. } => "escrow_disputed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_tagged_on_the_wire() {
        let order_id = Uuid::new_v4();
        let event = SettlementEvent::EscrowCancelled {
            escrow_id: Uuid::new_v4(),
            order_id,
            timestamp: 0,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "escrow_cancelled");
        assert_eq!(event.order_id(), order_id);
        assert_eq!(event.name(), "escrow_cancelled");
    }
}
