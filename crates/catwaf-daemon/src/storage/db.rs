//! Database connection and initialization.

pub use catwaf_core::db::DatabaseError;

catwaf_core::define_database!(Database, "Control-plane migrations complete");

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_applies_schema() {
        let db = Database::open_in_memory().await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('jobs', 'bans', 'sites', 'certificates') ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();

        let names: Vec<_> = tables.into_iter().map(|(n,)| n).collect();
        assert_eq!(names, ["bans", "certificates", "jobs", "sites"]);
    }
}
