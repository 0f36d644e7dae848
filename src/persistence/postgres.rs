//! PostgreSQL implementation of the ledger store.
//!
//! Every transition is a conditional `UPDATE ... WHERE status = <from>` that
//! runs in one transaction with the campaign adjustment. A second caller
//! racing on the same donation matches zero rows and observes the status
//! the winner wrote.

use std::time::Duration;

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::models::{
    CAMPAIGN_COLUMNS, CampaignRow, DONATION_COLUMNS, DonationRow, to_amount, to_column,
};
use super::{
    DonationFilter, DonationStats, LedgerStore, MethodTotals, Page, StatusTotals,
    TransitionOutcome,
};
use crate::config::LedgerConfig;
use crate::domain::{
    Campaign, CampaignId, Donation, DonationId, DonationStatus, NewCampaign, NewDonation,
};
use crate::error::LedgerError;

/// PostgreSQL-backed [`LedgerStore`] using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the configured database and applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::Persistence`] if the database cannot be
    /// reached or a migration fails.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Resolves a transition that matched no row: either the donation is
    /// missing or its status did not permit the move.
    async fn unmatched(&self, code: &str) -> Result<TransitionOutcome, LedgerError> {
        Ok(match self.fetch_donation_by_code(code).await? {
            Some(donation) => TransitionOutcome::Unchanged(donation),
            None => TransitionOutcome::Missing,
        })
    }

    /// Runs `from -> to` on the donation and, when `delta` is set, adds it to
    /// the campaign total in the same transaction.
    async fn transition(
        &self,
        code: &str,
        from: DonationStatus,
        to: DonationStatus,
        gateway_transaction_id: Option<&str>,
        delta: Option<Delta>,
    ) -> Result<TransitionOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE donations \
             SET status = $3, \
                 gateway_transaction_id = COALESCE($4, gateway_transaction_id), \
                 updated_at = now() \
             WHERE transaction_code = $1 AND status = $2 \
             RETURNING {DONATION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, DonationRow>(&sql)
            .bind(code)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(gateway_transaction_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return self.unmatched(code).await;
        };
        let donation = Donation::try_from(row)?;

        let Some(delta) = delta else {
            tx.commit().await?;
            return Ok(TransitionOutcome::Applied {
                donation,
                campaign_total: None,
            });
        };

        let amount = to_column(donation.amount)?;
        let adjust_sql = match delta {
            Delta::Credit => {
                "UPDATE campaigns SET current_total = current_total + $2 \
                 WHERE id = $1 RETURNING current_total"
            }
            Delta::Debit => {
                "UPDATE campaigns SET current_total = current_total - $2 \
                 WHERE id = $1 AND current_total >= $2 RETURNING current_total"
            }
        };
        let adjusted = sqlx::query_scalar::<_, i64>(adjust_sql)
            .bind(Uuid::from(donation.campaign_id))
            .bind(amount)
            .fetch_optional(&mut *tx)
            .await;

        match adjusted {
            Ok(Some(total)) => {
                tx.commit().await?;
                Ok(TransitionOutcome::Applied {
                    donation,
                    campaign_total: Some(to_amount(total)?),
                })
            }
            Ok(None) => {
                tx.rollback().await?;
                Err(LedgerError::LedgerSplit(format!(
                    "campaign {} rejected {delta:?} of {} for donation {code}",
                    donation.campaign_id, donation.amount
                )))
            }
            Err(err) => {
                // Dropping `tx` rolls the status change back.
                Err(LedgerError::LedgerSplit(format!(
                    "campaign {} adjustment failed for donation {code}: {err}",
                    donation.campaign_id
                )))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Delta {
    Credit,
    Debit,
}

/// Appends the `WHERE` clause for `filter`.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &DonationFilter) {
    qb.push(" WHERE TRUE");
    if let Some(id) = filter.campaign_id {
        qb.push(" AND campaign_id = ").push_bind(Uuid::from(id));
    }
    if let Some(donor) = &filter.donor_id {
        qb.push(" AND donor_id = ").push_bind(donor.clone());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if !filter.include_anonymous {
        qb.push(" AND NOT is_anonymous");
    }
    if let Some(from) = filter.created_from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

impl LedgerStore for PostgresLedger {
    async fn insert_campaign(&self, campaign: NewCampaign) -> Result<Campaign, LedgerError> {
        let campaign = campaign.into_campaign(CampaignId::new(), Utc::now());
        let sql = format!(
            "INSERT INTO campaigns ({CAMPAIGN_COLUMNS}) \
             VALUES ($1, $2, $3, $4, 0, $5, $6, $7) RETURNING {CAMPAIGN_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CampaignRow>(&sql)
            .bind(Uuid::from(campaign.id))
            .bind(&campaign.name)
            .bind(&campaign.description)
            .bind(to_column(campaign.target_amount)?)
            .bind(campaign.end_date)
            .bind(campaign.status.as_str())
            .bind(campaign.created_at)
            .fetch_one(&self.pool)
            .await?;
        Campaign::try_from(row)
    }

    async fn fetch_campaign(&self, id: CampaignId) -> Result<Option<Campaign>, LedgerError> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1");
        sqlx::query_as::<_, CampaignRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .map(Campaign::try_from)
            .transpose()
    }

    async fn insert_donation(&self, donation: NewDonation) -> Result<Donation, LedgerError> {
        let donation = donation.into_donation(DonationId::new(), Utc::now());
        let sql = format!(
            "INSERT INTO donations ({DONATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL, 'PENDING', $9, $10, $10) \
             RETURNING {DONATION_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, DonationRow>(&sql)
            .bind(Uuid::from(donation.id))
            .bind(&donation.donor_id)
            .bind(Uuid::from(donation.campaign_id))
            .bind(to_column(donation.amount)?)
            .bind(&donation.currency)
            .bind(&donation.message)
            .bind(donation.payment_method.as_str())
            .bind(&donation.transaction_code)
            .bind(donation.is_anonymous)
            .bind(donation.created_at)
            .fetch_one(&self.pool)
            .await;

        match inserted {
            Ok(row) => Donation::try_from(row),
            Err(err) if is_unique_violation(&err) => Err(LedgerError::DuplicateTransactionCode(
                donation.transaction_code,
            )),
            Err(err) if is_foreign_key_violation(&err) => Err(LedgerError::NotFound(format!(
                "campaign {}",
                donation.campaign_id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch_donation(&self, id: DonationId) -> Result<Option<Donation>, LedgerError> {
        let sql = format!("SELECT {DONATION_COLUMNS} FROM donations WHERE id = $1");
        sqlx::query_as::<_, DonationRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .map(Donation::try_from)
            .transpose()
    }

    async fn fetch_donation_by_code(&self, code: &str) -> Result<Option<Donation>, LedgerError> {
        let sql = format!("SELECT {DONATION_COLUMNS} FROM donations WHERE transaction_code = $1");
        sqlx::query_as::<_, DonationRow>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .map(Donation::try_from)
            .transpose()
    }

    async fn fetch_donation_by_gateway_id(
        &self,
        gateway_transaction_id: &str,
    ) -> Result<Option<Donation>, LedgerError> {
        let sql = format!(
            "SELECT {DONATION_COLUMNS} FROM donations WHERE gateway_transaction_id = $1 \
             ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, DonationRow>(&sql)
            .bind(gateway_transaction_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Donation::try_from)
            .transpose()
    }

    async fn credit_donation(
        &self,
        code: &str,
        gateway_transaction_id: Option<&str>,
    ) -> Result<TransitionOutcome, LedgerError> {
        self.transition(
            code,
            DonationStatus::Pending,
            DonationStatus::Successful,
            gateway_transaction_id,
            Some(Delta::Credit),
        )
        .await
    }

    async fn fail_donation(&self, code: &str) -> Result<TransitionOutcome, LedgerError> {
        self.transition(
            code,
            DonationStatus::Pending,
            DonationStatus::Failed,
            None,
            None,
        )
        .await
    }

    async fn refund_donation(&self, code: &str) -> Result<TransitionOutcome, LedgerError> {
        self.transition(
            code,
            DonationStatus::Successful,
            DonationStatus::Refunded,
            None,
            Some(Delta::Debit),
        )
        .await
    }

    async fn delete_donation(&self, id: DonationId) -> Result<TransitionOutcome, LedgerError> {
        let sql = format!(
            "DELETE FROM donations WHERE id = $1 AND status IN ('PENDING', 'FAILED') \
             RETURNING {DONATION_COLUMNS}"
        );
        let deleted = sqlx::query_as::<_, DonationRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = deleted {
            return Ok(TransitionOutcome::Applied {
                donation: Donation::try_from(row)?,
                campaign_total: None,
            });
        }
        Ok(match self.fetch_donation(id).await? {
            Some(donation) => TransitionOutcome::Unchanged(donation),
            None => TransitionOutcome::Missing,
        })
    }

    async fn list_donations(
        &self,
        filter: &DonationFilter,
        page: Page,
    ) -> Result<(Vec<Donation>, u64), LedgerError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM donations");
        push_filter(&mut count, filter);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {DONATION_COLUMNS} FROM donations"));
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(i64::try_from(page.offset()).unwrap_or(i64::MAX));
        let rows = select
            .build_query_as::<DonationRow>()
            .fetch_all(&self.pool)
            .await?;

        let donations = rows
            .into_iter()
            .map(Donation::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((donations, to_amount(total)?))
    }

    async fn donation_stats(&self, filter: &DonationFilter) -> Result<DonationStats, LedgerError> {
        let mut by_status = QueryBuilder::<Postgres>::new(
            "SELECT status, COUNT(*), COALESCE(SUM(amount), 0)::BIGINT, \
             COALESCE(AVG(amount), 0)::FLOAT8 FROM donations",
        );
        push_filter(&mut by_status, filter);
        by_status.push(" GROUP BY status ORDER BY status");
        let status_rows = by_status
            .build_query_as::<(String, i64, i64, f64)>()
            .fetch_all(&self.pool)
            .await?;

        let mut by_method = QueryBuilder::<Postgres>::new(
            "SELECT payment_method, COUNT(*), COALESCE(SUM(amount), 0)::BIGINT FROM donations",
        );
        push_filter(&mut by_method, filter);
        by_method.push(" GROUP BY payment_method ORDER BY payment_method");
        let method_rows = by_method
            .build_query_as::<(String, i64, i64)>()
            .fetch_all(&self.pool)
            .await?;

        let corrupt = |e: crate::domain::donation::UnknownVariant| {
            LedgerError::Persistence(format!("corrupt row: {e}"))
        };
        let by_status = status_rows
            .into_iter()
            .map(|(status, count, total, average)| {
                Ok(StatusTotals {
                    status: status.parse().map_err(corrupt)?,
                    count: to_amount(count)?,
                    total_amount: to_amount(total)?,
                    average_amount: average,
                })
            })
            .collect::<Result<Vec<_>, LedgerError>>()?;
        let by_method = method_rows
            .into_iter()
            .map(|(method, count, total)| {
                Ok(MethodTotals {
                    payment_method: method.parse().map_err(corrupt)?,
                    count: to_amount(count)?,
                    total_amount: to_amount(total)?,
                })
            })
            .collect::<Result<Vec<_>, LedgerError>>()?;

        Ok(DonationStats {
            by_status,
            by_method,
        })
    }

    async fn successful_total(&self, campaign_id: CampaignId) -> Result<u64, LedgerError> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM donations \
             WHERE campaign_id = $1 AND status = 'SUCCESSFUL'",
        )
        .bind(Uuid::from(campaign_id))
        .fetch_one(&self.pool)
        .await?;
        to_amount(total)
    }
}
