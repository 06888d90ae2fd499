//! Year-over-year population growth per region, computed from the merged
//! store. Growth against a zero previous-period value is defined as 0, so
//! downstream consumers never see inf/NaN from the division.

use serde::Serialize;
use sqlx::Row;

use crate::database_ops::db::Db;
use crate::database_ops::statline::EtlError;

// Aggregate category codes of the 03759ned dimensions; the per-sex/age/
// marital breakdown rows would otherwise be double counted.
const TOTAL_GESLACHT: &str = "T001038";
const TOTAL_LEEFTIJD: i64 = 10000;
const TOTAL_BURGST: &str = "T001019";

#[derive(Debug, Clone, Serialize)]
pub struct GrowthRow {
    pub jaar: i64,
    pub bevolking: i64,
    pub growth: f64,
}

pub fn growth_rate(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        0.0
    } else {
        (current - previous) / previous
    }
}

pub fn compute_growth(series: Vec<(i64, i64)>) -> Vec<GrowthRow> {
    let mut out = Vec::with_capacity(series.len());
    let mut prev: Option<i64> = None;
    for (jaar, bevolking) in series {
        let growth = match prev {
            None => 0.0,
            Some(p) => growth_rate(bevolking as f64, p as f64),
        };
        out.push(GrowthRow {
            jaar,
            bevolking,
            growth,
        });
        prev = Some(bevolking);
    }
    out
}

/// January-1 population per year for one region (aggregate categories
/// only), with relative growth against the preceding year.
pub async fn population_growth(db: &Db, regio_key: &str) -> Result<Vec<GrowthRow>, EtlError> {
    let rows = sqlx::query(
        "SELECT p.jaar, b.bevolking_1_januari
         FROM bevolking b
         JOIN perioden p ON p.datum_key = b.datum_key
         WHERE b.regio_key = $1
           AND b.geslacht_key = $2
           AND b.leeftijd_key = $3
           AND b.burgst_key = $4
           AND p.jaar IS NOT NULL
           AND b.bevolking_1_januari IS NOT NULL
         ORDER BY p.jaar",
    )
    .bind(regio_key)
    .bind(TOTAL_GESLACHT)
    .bind(TOTAL_LEEFTIJD)
    .bind(TOTAL_BURGST)
    .fetch_all(&db.pool)
    .await?;

    let mut series = Vec::with_capacity(rows.len());
    for row in rows {
        series.push((row.try_get::<i64, _>(0)?, row.try_get::<i64, _>(1)?));
    }
    Ok(compute_growth(series))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_rate_guard_on_zero_previous() {
        assert_eq!(growth_rate(1000.0, 0.0), 0.0);
        assert_eq!(growth_rate(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_growth_rate_regular_cases() {
        assert!((growth_rate(110.0, 100.0) - 0.10).abs() < 1e-12);
        assert!((growth_rate(90.0, 100.0) + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_compute_growth_series_never_non_finite() {
        let rows = compute_growth(vec![(2018, 0), (2019, 500), (2020, 550), (2021, 0)]);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].growth, 0.0); // no previous year
        assert_eq!(rows[1].growth, 0.0); // previous was zero, guarded
        assert!((rows[2].growth - 0.10).abs() < 1e-12);
        assert_eq!(rows[3].growth, -1.0);
        assert!(rows.iter().all(|r| r.growth.is_finite()));
    }
}
