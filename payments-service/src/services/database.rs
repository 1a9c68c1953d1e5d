//! Database service for payments-service.
//!
//! All ledger mutations happen here, inside transactions. `record_payment`
//! is the single path that appends a detail and moves the aggregate.

use crate::error::PaymentError;
use crate::models::detail::receipt_number;
use crate::models::payment::AMOUNT_EPSILON;
use crate::models::{
    ChargeStatus, NewDetail, NewPayment, NewQrCharge, NewStaffUser, NewWorkOrder, Payment,
    PaymentDetail, PaymentKind, PaymentState, PaymentTerms, QrCharge, StaffUser, WorkOrder,
    WorkOrderState,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Outcome of `record_payment`. `already_recorded` is set when the detail
/// for the given reference existed before the call (a reconciliation
/// conflict, reported as success).
#[derive(Debug, Clone)]
pub struct RecordedPayment {
    pub payment: Payment,
    pub detail: PaymentDetail,
    pub already_recorded: bool,
}

/// Payment row joined with the work order fields the listings display.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentListRow {
    #[sqlx(flatten)]
    pub payment: Payment,
    pub work_order_code: String,
    pub client_name: String,
    pub vehicle_plate: Option<String>,
}

/// Detail row with the recorder's display name resolved.
#[derive(Debug, Clone, FromRow)]
pub struct DetailRow {
    #[sqlx(flatten)]
    pub detail: PaymentDetail,
    pub recorded_by_name: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct PaymentFilter {
    pub state: Option<PaymentState>,
    pub kind: Option<PaymentKind>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct PaymentStats {
    pub total: i64,
    pub pending: i64,
    pub partially_paid: i64,
    pub fully_paid: i64,
    pub overdue: i64,
    pub cancelled: i64,
    pub collected_today: Decimal,
    pub collected_this_month: Decimal,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "payments-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, PaymentError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), PaymentError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), PaymentError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PaymentError::Database(sqlx::Error::Migrate(Box::new(e))))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Collaborator projections
    // -------------------------------------------------------------------------

    /// Register or refresh a work order projection, keyed by code.
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn upsert_work_order(&self, input: &NewWorkOrder) -> Result<WorkOrder, PaymentError> {
        let order = sqlx::query_as::<_, WorkOrder>(
            r#"
            INSERT INTO work_orders
                (id, code, state, total, labor_cost, parts_cost, client_name,
                 client_email, client_phone, vehicle_plate, vehicle_label)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (code) DO UPDATE SET
                state = EXCLUDED.state,
                total = EXCLUDED.total,
                labor_cost = EXCLUDED.labor_cost,
                parts_cost = EXCLUDED.parts_cost,
                client_name = EXCLUDED.client_name,
                client_email = EXCLUDED.client_email,
                client_phone = EXCLUDED.client_phone,
                vehicle_plate = EXCLUDED.vehicle_plate,
                vehicle_label = EXCLUDED.vehicle_label,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.code)
        .bind(input.state)
        .bind(input.total)
        .bind(input.labor_cost)
        .bind(input.parts_cost)
        .bind(&input.client_name)
        .bind(&input.client_email)
        .bind(&input.client_phone)
        .bind(&input.vehicle_plate)
        .bind(&input.vehicle_label)
        .fetch_one(&self.pool)
        .await?;

        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn get_work_order(&self, id: Uuid) -> Result<Option<WorkOrder>, PaymentError> {
        let order = sqlx::query_as::<_, WorkOrder>("SELECT * FROM work_orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    /// Flip a settled order from completed to delivered.
    #[instrument(skip(self))]
    pub async fn mark_work_order_delivered(&self, id: Uuid) -> Result<(), PaymentError> {
        let result = sqlx::query(
            "UPDATE work_orders SET state = 'delivered', updated_at = now()
             WHERE id = $1 AND state = 'completed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(work_order_id = %id, "Work order marked as delivered");
        }
        Ok(())
    }

    #[instrument(skip(self, input), fields(staff_id = %id))]
    pub async fn upsert_staff_user(
        &self,
        id: Uuid,
        input: &NewStaffUser,
    ) -> Result<StaffUser, PaymentError> {
        let user = sqlx::query_as::<_, StaffUser>(
            r#"
            INSERT INTO staff_users (id, name, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                role = EXCLUDED.role,
                updated_at = now()
            RETURNING id, name, role
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(input.role)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn get_staff_user(&self, id: Uuid) -> Result<Option<StaffUser>, PaymentError> {
        let user =
            sqlx::query_as::<_, StaffUser>("SELECT id, name, role FROM staff_users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user)
    }

    // -------------------------------------------------------------------------
    // Payment ledger
    // -------------------------------------------------------------------------

    /// Create the ledger for a completed work order.
    #[instrument(skip(self, input), fields(work_order_id = %input.work_order_id, kind = %input.kind))]
    pub async fn create_payment(&self, input: &NewPayment) -> Result<Payment, PaymentError> {
        let (installment_count, due_date) =
            normalized_terms(input.kind, input.installment_count, input.due_date)?;

        let mut tx = self.pool.begin().await?;

        let order =
            sqlx::query_as::<_, WorkOrder>("SELECT * FROM work_orders WHERE id = $1 FOR UPDATE")
                .bind(input.work_order_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(PaymentError::WorkOrderNotFound)?;

        if order.state != WorkOrderState::Completed {
            return Err(PaymentError::InvalidOrderState);
        }

        let has_active: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM payments WHERE work_order_id = $1 AND state <> 'cancelled')",
        )
        .bind(input.work_order_id)
        .fetch_one(&mut *tx)
        .await?;

        if has_active {
            return Err(PaymentError::DuplicatePayment);
        }

        let today = Utc::now().date_naive();
        let sequence: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) + 1 FROM payments WHERE (created_at AT TIME ZONE 'UTC')::date = $1",
        )
        .bind(today)
        .fetch_one(&mut *tx)
        .await?;
        let code = format!("PAG-{}-{:04}", today.format("%Y%m%d"), sequence);

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments
                (id, code, work_order_id, total_amount, kind, installment_count,
                 state, due_date, notes)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&code)
        .bind(input.work_order_id)
        .bind(order.total)
        .bind(input.kind)
        .bind(installment_count)
        .bind(due_date)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err)
                if db_err.is_unique_violation()
                    && db_err.constraint() == Some("payments_active_work_order_idx") =>
            {
                // Lost the race against a concurrent create for the same order.
                PaymentError::DuplicatePayment
            }
            _ => PaymentError::Database(e),
        })?;

        tx.commit().await?;

        info!(
            payment_id = %payment.id,
            code = %payment.code,
            total = %payment.total_amount,
            kind = %payment.kind,
            "Payment created"
        );

        Ok(payment)
    }

    #[instrument(skip(self))]
    pub async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, PaymentError> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    /// List payments with optional state/kind filters and a free-text search
    /// over the payment code, client name, and vehicle plate.
    #[instrument(skip(self, filter))]
    pub async fn list_payments(
        &self,
        filter: &PaymentFilter,
    ) -> Result<(Vec<PaymentListRow>, i64), PaymentError> {
        let limit = filter.limit.clamp(1, 100);

        let rows = sqlx::query_as::<_, PaymentListRow>(
            r#"
            SELECT p.*, w.code AS work_order_code, w.client_name, w.vehicle_plate
            FROM payments p
            JOIN work_orders w ON w.id = p.work_order_id
            WHERE ($1::varchar IS NULL OR p.state = $1)
              AND ($2::varchar IS NULL OR p.kind = $2)
              AND ($3::text IS NULL
                   OR p.code ILIKE '%' || $3 || '%'
                   OR w.client_name ILIKE '%' || $3 || '%'
                   OR w.vehicle_plate ILIKE '%' || $3 || '%')
            ORDER BY p.created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.state.map(|s| s.as_str()))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(&filter.search)
        .bind(limit)
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM payments p
            JOIN work_orders w ON w.id = p.work_order_id
            WHERE ($1::varchar IS NULL OR p.state = $1)
              AND ($2::varchar IS NULL OR p.kind = $2)
              AND ($3::text IS NULL
                   OR p.code ILIKE '%' || $3 || '%'
                   OR w.client_name ILIKE '%' || $3 || '%'
                   OR w.vehicle_plate ILIKE '%' || $3 || '%')
            "#,
        )
        .bind(filter.state.map(|s| s.as_str()))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(&filter.search)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows, total))
    }

    /// Record a collection event. The only sanctioned mutation path once any
    /// detail exists: locks the payment row, validates, appends the detail,
    /// and moves the aggregate, all in one transaction.
    #[instrument(skip(self, input), fields(payment_id = %payment_id, amount = %input.amount, method = %input.method))]
    pub async fn record_payment(
        &self,
        payment_id: Uuid,
        input: &NewDetail,
    ) -> Result<RecordedPayment, PaymentError> {
        if input.amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidTerms(
                "amount must be positive".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
            .bind(payment_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(PaymentError::PaymentNotFound)?;

        // A confirmed QR transaction must produce exactly one detail, no
        // matter how many times the confirmation is observed. This check runs
        // before the state guards so a re-confirmation of the settling
        // transaction still reports success.
        if let Some(reference) = input.reference.as_deref() {
            let existing = sqlx::query_as::<_, PaymentDetail>(
                "SELECT * FROM payment_details WHERE payment_id = $1 AND reference = $2",
            )
            .bind(payment_id)
            .bind(reference)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(detail) = existing {
                tx.rollback().await.ok();
                info!(
                    payment_id = %payment_id,
                    reference = %reference,
                    "Transaction already recorded, returning existing detail"
                );
                return Ok(RecordedPayment {
                    payment,
                    detail,
                    already_recorded: true,
                });
            }
        }

        match payment.state {
            PaymentState::Cancelled => return Err(PaymentError::PaymentClosed("cancelled")),
            PaymentState::FullyPaid => return Err(PaymentError::PaymentClosed("fully_paid")),
            _ => {}
        }

        let pending = payment.total_amount - payment.paid_amount;
        if input.amount > pending + AMOUNT_EPSILON {
            return Err(PaymentError::Overpayment {
                requested: input.amount,
                pending,
            });
        }

        let paid_date = input.paid_date.unwrap_or_else(|| Utc::now().date_naive());
        let paid_time = input.paid_time.unwrap_or_else(|| Utc::now().time());

        let receipt = match input.receipt_number.as_deref() {
            Some(number) if !number.is_empty() => number.to_string(),
            _ => {
                let sequence: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) + 1 FROM payment_details WHERE method = $1 AND paid_date = $2",
                )
                .bind(input.method.as_str())
                .bind(paid_date)
                .fetch_one(&mut *tx)
                .await?;
                receipt_number(input.method, paid_date, sequence)
            }
        };

        let detail_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payment_details WHERE payment_id = $1")
                .bind(payment_id)
                .fetch_one(&mut *tx)
                .await?;
        let installment_number = (detail_count + 1) as i32;

        let inserted = sqlx::query_as::<_, PaymentDetail>(
            r#"
            INSERT INTO payment_details
                (id, payment_id, installment_number, amount, method, receipt_number,
                 bank, reference, paid_date, paid_time, recorded_by, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payment_id)
        .bind(installment_number)
        .bind(input.amount)
        .bind(input.method)
        .bind(&receipt)
        .bind(&input.bank)
        .bind(&input.reference)
        .bind(paid_date)
        .bind(paid_time)
        .bind(input.recorded_by)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await;

        let detail = match inserted {
            Ok(detail) => detail,
            Err(e) => {
                let duplicate_reference =
                    matches!(&e, sqlx::Error::Database(db_err) if db_err.is_unique_violation());
                tx.rollback().await.ok();

                // Another request confirmed the same transaction first; hand
                // back its detail instead of failing.
                if duplicate_reference {
                    if let Some(reference) = input.reference.as_deref() {
                        if let Some(existing) =
                            self.find_detail_by_reference(payment_id, reference).await?
                        {
                            let payment = self
                                .get_payment(payment_id)
                                .await?
                                .ok_or(PaymentError::PaymentNotFound)?;
                            return Ok(RecordedPayment {
                                payment,
                                detail: existing,
                                already_recorded: true,
                            });
                        }
                    }
                }
                return Err(PaymentError::Database(e));
            }
        };

        let new_paid = payment.paid_amount + input.amount;
        let new_installments = installment_number.min(payment.installment_count);
        let new_state = payment.state_after(new_paid);

        let updated = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET paid_amount = $2, installments_paid = $3, state = $4, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(new_paid)
        .bind(new_installments)
        .bind(new_state)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            payment_id = %payment_id,
            detail_id = %detail.id,
            installment = detail.installment_number,
            amount = %detail.amount,
            state = %updated.state,
            "Payment recorded"
        );

        Ok(RecordedPayment {
            payment: updated,
            detail,
            already_recorded: false,
        })
    }

    /// Administrative edit of the payment terms; only valid while pending
    /// with no recorded details.
    #[instrument(skip(self, terms), fields(payment_id = %payment_id))]
    pub async fn update_payment_terms(
        &self,
        payment_id: Uuid,
        terms: &PaymentTerms,
    ) -> Result<Payment, PaymentError> {
        let (installment_count, due_date) =
            normalized_terms(terms.kind, terms.installment_count, terms.due_date)?;

        let mut tx = self.pool.begin().await?;

        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
            .bind(payment_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(PaymentError::PaymentNotFound)?;

        match payment.state {
            PaymentState::Cancelled => return Err(PaymentError::PaymentClosed("cancelled")),
            PaymentState::FullyPaid => return Err(PaymentError::PaymentClosed("fully_paid")),
            PaymentState::Pending => {}
            _ => return Err(PaymentError::PaymentAlreadyStarted),
        }

        let detail_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payment_details WHERE payment_id = $1")
                .bind(payment_id)
                .fetch_one(&mut *tx)
                .await?;
        if detail_count > 0 {
            return Err(PaymentError::PaymentAlreadyStarted);
        }

        let updated = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET kind = $2, installment_count = $3, due_date = $4, notes = $5, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(terms.kind)
        .bind(installment_count)
        .bind(due_date)
        .bind(&terms.notes)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(payment_id = %payment_id, kind = %updated.kind, "Payment terms updated");

        Ok(updated)
    }

    /// Cancel a payment. Cancelled payments stop blocking new ledgers for
    /// the same work order.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn cancel_payment(&self, payment_id: Uuid) -> Result<Payment, PaymentError> {
        let mut tx = self.pool.begin().await?;

        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
            .bind(payment_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(PaymentError::PaymentNotFound)?;

        match payment.state {
            PaymentState::Cancelled => return Err(PaymentError::PaymentClosed("cancelled")),
            PaymentState::FullyPaid => return Err(PaymentError::PaymentClosed("fully_paid")),
            _ => {}
        }

        let updated = sqlx::query_as::<_, Payment>(
            "UPDATE payments SET state = 'cancelled', updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(payment_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(payment_id = %payment_id, code = %updated.code, "Payment cancelled");

        Ok(updated)
    }

    /// Explicit reconciliation sweep: move past-due open payments to overdue.
    #[instrument(skip(self))]
    pub async fn sweep_overdue(&self) -> Result<u64, PaymentError> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET state = 'overdue', updated_at = now()
            WHERE due_date < CURRENT_DATE
              AND state IN ('pending', 'partially_paid')
            "#,
        )
        .execute(&self.pool)
        .await?;

        let swept = result.rows_affected();
        if swept > 0 {
            info!(swept = swept, "Payments marked overdue");
        }
        Ok(swept)
    }

    // -------------------------------------------------------------------------
    // Detail log
    // -------------------------------------------------------------------------

    /// Chronological detail log for one payment, oldest first.
    #[instrument(skip(self))]
    pub async fn list_details(&self, payment_id: Uuid) -> Result<Vec<DetailRow>, PaymentError> {
        let details = sqlx::query_as::<_, DetailRow>(
            r#"
            SELECT d.*, s.name AS recorded_by_name
            FROM payment_details d
            LEFT JOIN staff_users s ON s.id = d.recorded_by
            WHERE d.payment_id = $1
            ORDER BY d.installment_number
            "#,
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(details)
    }

    #[instrument(skip(self))]
    pub async fn find_detail_by_reference(
        &self,
        payment_id: Uuid,
        reference: &str,
    ) -> Result<Option<PaymentDetail>, PaymentError> {
        let detail = sqlx::query_as::<_, PaymentDetail>(
            "SELECT * FROM payment_details WHERE payment_id = $1 AND reference = $2",
        )
        .bind(payment_id)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        Ok(detail)
    }

    // -------------------------------------------------------------------------
    // QR charges
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(payment_id = %input.payment_id, transaction_id = %input.gateway_transaction_id))]
    pub async fn create_qr_charge(&self, input: &NewQrCharge) -> Result<QrCharge, PaymentError> {
        let charge = sqlx::query_as::<_, QrCharge>(
            r#"
            INSERT INTO qr_charges
                (id, payment_id, gateway_transaction_id, payment_reference, amount,
                 status, qr_expires_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.payment_id)
        .bind(&input.gateway_transaction_id)
        .bind(&input.payment_reference)
        .bind(input.amount)
        .bind(input.qr_expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(charge)
    }

    #[instrument(skip(self))]
    pub async fn get_qr_charge_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<QrCharge>, PaymentError> {
        let charge = sqlx::query_as::<_, QrCharge>(
            "SELECT * FROM qr_charges WHERE gateway_transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(charge)
    }

    #[instrument(skip(self))]
    pub async fn get_qr_charge_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<QrCharge>, PaymentError> {
        let charge = sqlx::query_as::<_, QrCharge>(
            "SELECT * FROM qr_charges WHERE payment_reference = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        Ok(charge)
    }

    #[instrument(skip(self))]
    pub async fn set_qr_charge_status(
        &self,
        transaction_id: &str,
        status: ChargeStatus,
    ) -> Result<(), PaymentError> {
        sqlx::query("UPDATE qr_charges SET status = $2 WHERE gateway_transaction_id = $1")
            .bind(transaction_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn payment_stats(&self) -> Result<PaymentStats, PaymentError> {
        let stats = sqlx::query_as::<_, PaymentStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE state = 'pending') AS pending,
                COUNT(*) FILTER (WHERE state = 'partially_paid') AS partially_paid,
                COUNT(*) FILTER (WHERE state = 'fully_paid') AS fully_paid,
                COUNT(*) FILTER (WHERE state = 'overdue') AS overdue,
                COUNT(*) FILTER (WHERE state = 'cancelled') AS cancelled,
                (SELECT COALESCE(SUM(amount), 0) FROM payment_details
                 WHERE paid_date = CURRENT_DATE) AS collected_today,
                (SELECT COALESCE(SUM(amount), 0) FROM payment_details
                 WHERE paid_date >= date_trunc('month', CURRENT_DATE)::date) AS collected_this_month
            FROM payments
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }
}

/// Normalize and validate payment terms. Contado forces a single
/// installment; credito requires 2..=24 installments and a future due date.
fn normalized_terms(
    kind: PaymentKind,
    installment_count: i32,
    due_date: Option<NaiveDate>,
) -> Result<(i32, Option<NaiveDate>), PaymentError> {
    match kind {
        PaymentKind::Contado => Ok((1, due_date)),
        PaymentKind::Credito => {
            if !(2..=24).contains(&installment_count) {
                return Err(PaymentError::InvalidTerms(
                    "credito payments need between 2 and 24 installments".to_string(),
                ));
            }
            let due = due_date.ok_or_else(|| {
                PaymentError::InvalidTerms("credito payments need a due date".to_string())
            })?;
            if due <= Utc::now().date_naive() {
                return Err(PaymentError::InvalidTerms(
                    "due date must be in the future".to_string(),
                ));
            }
            Ok((installment_count, Some(due)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contado_terms_force_single_installment() {
        let (count, _) = normalized_terms(PaymentKind::Contado, 5, None).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn credito_terms_need_installments_and_due_date() {
        let future = Utc::now().date_naive() + chrono::Days::new(30);

        assert!(matches!(
            normalized_terms(PaymentKind::Credito, 1, Some(future)),
            Err(PaymentError::InvalidTerms(_))
        ));
        assert!(matches!(
            normalized_terms(PaymentKind::Credito, 25, Some(future)),
            Err(PaymentError::InvalidTerms(_))
        ));
        assert!(matches!(
            normalized_terms(PaymentKind::Credito, 3, None),
            Err(PaymentError::InvalidTerms(_))
        ));
        assert!(matches!(
            normalized_terms(PaymentKind::Credito, 3, Some(Utc::now().date_naive())),
            Err(PaymentError::InvalidTerms(_))
        ));

        let (count, due) = normalized_terms(PaymentKind::Credito, 3, Some(future)).unwrap();
        assert_eq!(count, 3);
        assert_eq!(due, Some(future));
    }
}
