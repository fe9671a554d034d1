//! Time decay toward the baseline anchor.
//!
//! The daily worker serializes each trend's read-modify-write with a row
//! lock, and the `decay_runs` primary key makes the pass at-most-once per
//! trend per day no matter how many schedulers race.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

/// Exponential regression toward baseline:
/// `baseline + (current - baseline) * 0.5^(days / half_life)`.
///
/// Satisfies the semigroup law: decaying `a` days then `b` days equals
/// decaying `a + b` days in one step.
pub fn decay_toward_baseline(
    current_log_odds: f64,
    baseline_log_odds: f64,
    elapsed_days: f64,
    half_life_days: f64,
) -> f64 {
    if half_life_days <= 0.0 || elapsed_days <= 0.0 {
        return current_log_odds;
    }
    baseline_log_odds
        + (current_log_odds - baseline_log_odds) * 0.5f64.powf(elapsed_days / half_life_days)
}

/// Run one decay pass for a trend. Returns the new log-odds, or `None`
/// when today's pass already ran (or the trend is gone).
pub async fn run_decay_for_trend(pool: &PgPool, trend_id: &str) -> Result<Option<f64>> {
    let claimed = sqlx::query(
        "INSERT INTO decay_runs (trend_id, run_date) VALUES ($1, CURRENT_DATE)
         ON CONFLICT (trend_id, run_date) DO NOTHING",
    )
    .bind(trend_id)
    .execute(pool)
    .await?;
    if claimed.rows_affected() == 0 {
        debug!(trend = trend_id, "decay already ran today");
        return Ok(None);
    }

    let mut tx = pool.begin().await?;

    // `updated_at` is the decay anchor: every write to current_log_odds
    // (evidence apply, invalidation, override, decay itself) bumps it,
    // so the elapsed window always starts at the most recent mutation.
    let row: Option<(f64, f64, f64, DateTime<Utc>)> = sqlx::query_as(
        "SELECT current_log_odds, baseline_log_odds, decay_half_life_days, updated_at
         FROM trends
         WHERE id = $1 AND is_active
         FOR UPDATE",
    )
    .bind(trend_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((current, baseline, half_life, updated_at)) = row else {
        tx.rollback().await?;
        return Ok(None);
    };

    let elapsed_days = (Utc::now() - updated_at).num_seconds() as f64 / 86_400.0;
    let new_lo = decay_toward_baseline(current, baseline, elapsed_days, half_life);

    sqlx::query(
        "UPDATE trends SET current_log_odds = $2, last_decayed_at = now(), updated_at = now()
         WHERE id = $1",
    )
    .bind(trend_id)
    .bind(new_lo)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    debug!(trend = trend_id, from = current, to = new_lo, elapsed_days, "decay applied");
    Ok(Some(new_lo))
}

#[cfg(test)]
mod tests {
    use super::decay_toward_baseline;

    #[test]
    fn decay_moves_toward_baseline_from_both_sides() {
        let above = decay_toward_baseline(-1.0, -2.4, 30.0, 30.0);
        assert!((above - (-2.4 + 1.4 * 0.5)).abs() < 1e-12);
        let below = decay_toward_baseline(-3.0, -2.4, 30.0, 30.0);
        assert!((below - (-2.4 - 0.6 * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn semigroup_law() {
        // n independent applications == one application over the summed age.
        let (current, baseline, hl) = (-1.2, -2.442, 30.0);
        let mut stepped = current;
        for _ in 0..10 {
            stepped = decay_toward_baseline(stepped, baseline, 3.0, hl);
        }
        let direct = decay_toward_baseline(current, baseline, 30.0, hl);
        assert!((stepped - direct).abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed_is_identity() {
        assert_eq!(decay_toward_baseline(-1.0, -2.0, 0.0, 30.0), -1.0);
        assert_eq!(decay_toward_baseline(-1.0, -2.0, -5.0, 30.0), -1.0);
    }

    #[test]
    fn long_horizon_converges_to_baseline() {
        let lo = decay_toward_baseline(3.0, -2.442, 3650.0, 30.0);
        assert!((lo - (-2.442)).abs() < 1e-9);
    }
}
