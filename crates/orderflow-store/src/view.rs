//! Read-only order views for presentation.
//!
//! Filtering by status and date range, newest-first ordering, and money
//! formatting. Nothing here mutates the store.

use chrono::{Duration, NaiveDate, NaiveTime};
use orderflow_core::{Money, Order, OrderStatus, MINOR_UNIT_EXPONENT};
use std::cmp::Ordering;

/// Date formats seen in order payloads.
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%Y"];

/// Time formats seen in order payloads.
const TIME_FORMATS: [&str; 3] = ["%H:%M", "%H:%M:%S", "%I:%M %p"];

/// Status filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Only(OrderStatus),
}

impl StatusFilter {
    pub fn matches(&self, status: OrderStatus) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => *wanted == status,
        }
    }
}

/// Date range filter relative to "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateRange {
    #[default]
    All,
    Today,
    Yesterday,
    Last7Days,
    Last30Days,
}

impl DateRange {
    /// Inclusive `[from, to]` bounds, or `None` for `All`.
    pub fn bounds(&self, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            Self::All => None,
            Self::Today => Some((today, today)),
            Self::Yesterday => {
                let day = today - Duration::days(1);
                Some((day, day))
            }
            Self::Last7Days => Some((today - Duration::days(6), today)),
            Self::Last30Days => Some((today - Duration::days(29), today)),
        }
    }

    /// Orders with unparsable dates only match `All`.
    pub fn matches(&self, date: Option<NaiveDate>, today: NaiveDate) -> bool {
        match (self.bounds(today), date) {
            (None, _) => true,
            (Some((from, to)), Some(date)) => from <= date && date <= to,
            (Some(_), None) => false,
        }
    }
}

/// Combined view query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewQuery {
    pub status: StatusFilter,
    pub date_range: DateRange,
}

impl ViewQuery {
    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = StatusFilter::Only(status);
        self
    }

    pub fn with_date_range(mut self, date_range: DateRange) -> Self {
        self.date_range = date_range;
        self
    }

    pub fn matches(&self, order: &Order, today: NaiveDate) -> bool {
        self.status.matches(order.status)
            && self
                .date_range
                .matches(parse_order_date(&order.date), today)
    }
}

/// Filter and sort orders, newest first.
pub fn select<'a>(
    orders: impl IntoIterator<Item = &'a Order>,
    query: &ViewQuery,
    today: NaiveDate,
) -> Vec<Order> {
    let mut selected: Vec<Order> = orders
        .into_iter()
        .filter(|order| query.matches(order, today))
        .cloned()
        .collect();
    sort_newest_first(&mut selected);
    selected
}

/// Stable sort by date then time, both descending. Unparsable dates last.
pub fn sort_newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| {
        let key_a = (parse_order_date(&a.date), parse_order_time(&a.time));
        let key_b = (parse_order_date(&b.date), parse_order_time(&b.time));
        match (key_a.0, key_b.0) {
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            _ => key_b.cmp(&key_a),
        }
    });
}

/// Count orders per status, in lifecycle order.
pub fn count_by_status<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Vec<(OrderStatus, usize)> {
    let mut counts = OrderStatus::ALL.map(|status| (status, 0usize));
    for order in orders {
        if let Some(entry) = counts.iter_mut().find(|(status, _)| *status == order.status) {
            entry.1 += 1;
        }
    }
    counts.to_vec()
}

pub fn parse_order_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
}

pub fn parse_order_time(raw: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw.trim(), fmt).ok())
}

/// Format for display, e.g. `PKR 1,500.00`.
pub fn format_amount(money: &Money) -> String {
    let sign = if money.minor_units < 0 { "-" } else { "" };
    let abs = money.minor_units.unsigned_abs();
    let scale = 10_u64.pow(MINOR_UNIT_EXPONENT);
    let major = abs / scale;
    let minor = abs % scale;

    let digits = major.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!(
        "{} {sign}{grouped}.{minor:0width$}",
        money.currency,
        width = MINOR_UNIT_EXPONENT as usize
    )
}
