//! Order statistics derived from cached orders.

use crate::{OrderRecord, OrderStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-status counts and delivered revenue over a set of orders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub total_orders: usize,
    /// Every status is present, with zero for statuses no order has
    pub by_status: BTreeMap<OrderStatus, usize>,
    /// Sum of `totalAmount` over delivered orders
    pub revenue: f64,
}

impl OrderStats {
    pub fn count(&self, status: OrderStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    /// Orders that still need admin attention.
    pub fn open_orders(&self) -> usize {
        OrderStatus::ALL
            .iter()
            .filter(|s| !s.is_terminal())
            .map(|s| self.count(*s))
            .sum()
    }
}

/// Aggregate statistics over orders.
pub fn aggregate<'a>(orders: impl IntoIterator<Item = &'a OrderRecord>) -> OrderStats {
    let mut stats = OrderStats {
        by_status: OrderStatus::ALL.iter().map(|s| (*s, 0)).collect(),
        ..OrderStats::default()
    };
    for order in orders {
        stats.total_orders += 1;
        *stats.by_status.entry(order.status).or_insert(0) += 1;
        if order.status.counts_as_revenue() && order.total_amount.is_finite() {
            stats.revenue += order.total_amount;
        }
    }
    stats
}
