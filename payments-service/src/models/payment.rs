//! Payment ledger aggregate: money owed vs. collected for one work order.

use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::detail::PaymentDetail;

/// Tolerance used when comparing collected money against the total owed.
/// Matches the rounding slack the counter UI has always worked with.
pub const AMOUNT_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

/// How the client settles the work order: all at once or in installments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    Contado,
    Credito,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contado => "contado",
            Self::Credito => "credito",
        }
    }
}

impl std::fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger lifecycle. `FullyPaid` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    PartiallyPaid,
    FullyPaid,
    Overdue,
    Cancelled,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PartiallyPaid => "partially_paid",
            Self::FullyPaid => "fully_paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FullyPaid | Self::Cancelled)
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub code: String,
    pub work_order_id: Uuid,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub pending_amount: Decimal,
    pub kind: PaymentKind,
    pub installment_count: i32,
    pub installments_paid: i32,
    pub state: PaymentState,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Whether `paid` settles `total` within the ledger tolerance.
    pub fn is_settled_by(total: Decimal, paid: Decimal) -> bool {
        paid >= total - AMOUNT_EPSILON
    }

    /// State after the cumulative paid amount becomes `new_paid`.
    ///
    /// `Overdue` only clears by settling in full; partial collections on an
    /// overdue payment leave it overdue.
    pub fn state_after(&self, new_paid: Decimal) -> PaymentState {
        if Self::is_settled_by(self.total_amount, new_paid) {
            PaymentState::FullyPaid
        } else if self.state == PaymentState::Overdue {
            PaymentState::Overdue
        } else if new_paid > Decimal::ZERO {
            PaymentState::PartiallyPaid
        } else {
            self.state
        }
    }

    /// Share of the total already collected, 0..=100.
    pub fn percentage_paid(&self) -> Decimal {
        if self.total_amount.is_zero() {
            Decimal::ZERO
        } else {
            (self.paid_amount / self.total_amount * Decimal::ONE_HUNDRED).round_dp(2)
        }
    }

    /// Amount of one installment. The full total for contado payments.
    pub fn installment_amount(&self) -> Decimal {
        if self.kind == PaymentKind::Credito && self.installment_count > 0 {
            (self.total_amount / Decimal::from(self.installment_count)).round_dp(2)
        } else {
            self.total_amount
        }
    }

    /// Installment schedule for credito payments: one line per installment,
    /// due one month apart starting at `due_date`. Empty for contado payments
    /// or when no due date is set.
    pub fn installment_plan(&self, details: &[PaymentDetail]) -> Vec<InstallmentLine> {
        let due = match (self.kind, self.due_date) {
            (PaymentKind::Credito, Some(due)) => due,
            _ => return Vec::new(),
        };

        let amount = self.installment_amount();
        (1..=self.installment_count)
            .map(|number| {
                let due_date = due
                    .checked_add_months(Months::new((number - 1) as u32))
                    .unwrap_or(due);
                let paid = number <= self.installments_paid;
                let paid_date = details
                    .iter()
                    .find(|d| d.installment_number == number)
                    .map(|d| d.paid_date)
                    .filter(|_| paid);

                InstallmentLine {
                    installment_number: number,
                    amount,
                    due_date,
                    paid,
                    paid_date,
                }
            })
            .collect()
    }
}

/// One line of an installment schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentLine {
    pub installment_number: i32,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub paid: bool,
    pub paid_date: Option<NaiveDate>,
}

/// Input for creating a ledger.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub work_order_id: Uuid,
    pub kind: PaymentKind,
    pub installment_count: i32,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Administrative edit of the payment terms, only valid before any
/// installment is recorded.
#[derive(Debug, Clone)]
pub struct PaymentTerms {
    pub kind: PaymentKind,
    pub installment_count: i32,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::detail::PaymentMethod;
    use chrono::NaiveTime;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn payment(total: &str, paid: &str, state: PaymentState) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            code: "PAG-20250312-0001".to_string(),
            work_order_id: Uuid::new_v4(),
            total_amount: dec(total),
            paid_amount: dec(paid),
            pending_amount: dec(total) - dec(paid),
            kind: PaymentKind::Contado,
            installment_count: 1,
            installments_paid: 0,
            state,
            due_date: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn detail(number: i32, amount: &str, paid_date: NaiveDate) -> PaymentDetail {
        PaymentDetail {
            id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            installment_number: number,
            amount: dec(amount),
            method: PaymentMethod::Cash,
            receipt_number: None,
            bank: None,
            reference: None,
            paid_date,
            paid_time: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            recorded_by: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn first_partial_payment_moves_to_partially_paid() {
        let p = payment("1000.00", "0.00", PaymentState::Pending);
        assert_eq!(p.state_after(dec("400.00")), PaymentState::PartiallyPaid);
    }

    #[test]
    fn settling_moves_to_fully_paid() {
        let p = payment("1000.00", "400.00", PaymentState::PartiallyPaid);
        assert_eq!(p.state_after(dec("1000.00")), PaymentState::FullyPaid);
    }

    #[test]
    fn settlement_tolerates_rounding_slack() {
        let p = payment("1000.00", "0.00", PaymentState::Pending);
        assert_eq!(p.state_after(dec("999.95")), PaymentState::FullyPaid);
        assert_eq!(p.state_after(dec("999.80")), PaymentState::PartiallyPaid);
    }

    #[test]
    fn partial_payment_on_overdue_stays_overdue() {
        let p = payment("1000.00", "0.00", PaymentState::Overdue);
        assert_eq!(p.state_after(dec("300.00")), PaymentState::Overdue);
        assert_eq!(p.state_after(dec("1000.00")), PaymentState::FullyPaid);
    }

    #[test]
    fn percentage_paid_handles_zero_total() {
        let p = payment("0.00", "0.00", PaymentState::Pending);
        assert_eq!(p.percentage_paid(), Decimal::ZERO);

        let p = payment("200.00", "50.00", PaymentState::PartiallyPaid);
        assert_eq!(p.percentage_paid(), dec("25.00"));
    }

    #[test]
    fn installment_plan_splits_total_by_month() {
        let due = NaiveDate::from_ymd_opt(2025, 4, 15).unwrap();
        let mut p = payment("1500.00", "0.00", PaymentState::Pending);
        p.kind = PaymentKind::Credito;
        p.installment_count = 3;
        p.due_date = Some(due);

        let plan = p.installment_plan(&[]);
        assert_eq!(plan.len(), 3);
        for (i, line) in plan.iter().enumerate() {
            assert_eq!(line.installment_number, (i + 1) as i32);
            assert_eq!(line.amount, dec("500.00"));
            assert!(!line.paid);
            assert_eq!(line.paid_date, None);
        }
        assert_eq!(plan[0].due_date, due);
        assert_eq!(plan[1].due_date, NaiveDate::from_ymd_opt(2025, 5, 15).unwrap());
        assert_eq!(plan[2].due_date, NaiveDate::from_ymd_opt(2025, 6, 15).unwrap());
    }

    #[test]
    fn installment_plan_marks_paid_lines_with_dates() {
        let due = NaiveDate::from_ymd_opt(2025, 4, 30).unwrap();
        let mut p = payment("900.00", "300.00", PaymentState::PartiallyPaid);
        p.kind = PaymentKind::Credito;
        p.installment_count = 3;
        p.installments_paid = 1;
        p.due_date = Some(due);

        let paid_on = NaiveDate::from_ymd_opt(2025, 4, 20).unwrap();
        let plan = p.installment_plan(&[detail(1, "300.00", paid_on)]);
        assert!(plan[0].paid);
        assert_eq!(plan[0].paid_date, Some(paid_on));
        assert!(!plan[1].paid);
        // Month-end due dates clamp instead of overflowing.
        assert_eq!(plan[1].due_date, NaiveDate::from_ymd_opt(2025, 5, 30).unwrap());
    }

    #[test]
    fn installment_plan_is_empty_for_contado() {
        let p = payment("800.00", "0.00", PaymentState::Pending);
        assert!(p.installment_plan(&[]).is_empty());
    }
}
