//! Aggregate counters for the admin dashboard.

use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdminStats {
    pub total_therapists: i64,
    pub verified_therapists: i64,
    pub pending_therapists: i64,
    pub total_patients: i64,
    pub total_appointments: i64,
}

pub async fn load_admin_stats(db: &SqlitePool) -> Result<AdminStats, sqlx::Error> {
    let (total_therapists, verified_therapists): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_verified = 1 THEN 1 ELSE 0 END), 0)
        FROM profiles WHERE role = 'psychologue'
        "#,
    )
    .fetch_one(db)
    .await?;

    let total_patients: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM profiles WHERE role = 'patient'")
            .fetch_one(db)
            .await?;

    let total_appointments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM appointments")
        .fetch_one(db)
        .await?;

    Ok(AdminStats {
        total_therapists,
        verified_therapists,
        pending_therapists: total_therapists - verified_therapists,
        total_patients,
        total_appointments,
    })
}
