use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

use crate::models::{validate_draw, Draw};

const SCHEMA_VERSION: &str = "1";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS draws (
    draw_id       TEXT PRIMARY KEY,
    date          TEXT NOT NULL UNIQUE,
    ball_1        INTEGER NOT NULL,
    ball_2        INTEGER NOT NULL,
    ball_3        INTEGER NOT NULL,
    ball_4        INTEGER NOT NULL,
    ball_5        INTEGER NOT NULL,
    star_1        INTEGER NOT NULL,
    star_2        INTEGER NOT NULL,
    jackpot       REAL,
    prize_table   TEXT,
    raw_source    TEXT
);
CREATE INDEX IF NOT EXISTS idx_draws_date ON draws(date);
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const DRAW_COLUMNS: &str =
    "draw_id, date, ball_1, ball_2, ball_3, ball_4, ball_5, star_1, star_2, jackpot, prize_table, raw_source";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: u32,
    pub updated: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub total_draws: u32,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
}

pub fn db_path() -> PathBuf {
    let mut path = std::env::current_dir().unwrap_or_default();
    path.push("data");
    path.push("euroml.db");
    path
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Impossible de créer le répertoire {:?}", parent))?;
        }
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Impossible d'ouvrir la base {:?}", path))?;
    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .context("Échec de la migration")?;
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('created_at', ?1)",
        [chrono::Utc::now().to_rfc3339()],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION],
    )?;
    Ok(())
}

/// Insère ou corrige un tirage, la clé étant l'identifiant.
pub fn upsert_draw(conn: &Connection, draw: &Draw) -> Result<UpsertOutcome> {
    let exists = conn
        .query_row("SELECT 1 FROM draws WHERE draw_id = ?1", [&draw.draw_id], |_| Ok(()))
        .optional()
        .context("Échec de la lecture")?
        .is_some();

    let prize_table = draw
        .prize_table
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("Table des gains non sérialisable")?;

    conn.execute(
        "INSERT INTO draws (draw_id, date, ball_1, ball_2, ball_3, ball_4, ball_5, star_1, star_2, jackpot, prize_table, raw_source)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(draw_id) DO UPDATE SET
            date = excluded.date,
            ball_1 = excluded.ball_1, ball_2 = excluded.ball_2, ball_3 = excluded.ball_3,
            ball_4 = excluded.ball_4, ball_5 = excluded.ball_5,
            star_1 = excluded.star_1, star_2 = excluded.star_2,
            jackpot = excluded.jackpot,
            prize_table = excluded.prize_table,
            raw_source = excluded.raw_source",
        rusqlite::params![
            draw.draw_id,
            draw.date,
            draw.balls[0],
            draw.balls[1],
            draw.balls[2],
            draw.balls[3],
            draw.balls[4],
            draw.stars[0],
            draw.stars[1],
            draw.jackpot,
            prize_table,
            draw.raw_source,
        ],
    ).with_context(|| format!("Échec de l'écriture du tirage {} ({})", draw.draw_id, draw.date))?;

    Ok(if exists { UpsertOutcome::Updated } else { UpsertOutcome::Inserted })
}

pub fn upsert_draws(conn: &Connection, draws: &[Draw]) -> Result<UpsertSummary> {
    let tx = conn.unchecked_transaction()
        .context("Impossible de démarrer la transaction")?;

    let mut summary = UpsertSummary::default();
    for draw in draws {
        match upsert_draw(&tx, draw) {
            Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
            Ok(UpsertOutcome::Updated) => summary.updated += 1,
            Err(e) => {
                log::warn!("Tirage {} ignoré : {:#}", draw.draw_id, e);
                summary.errors += 1;
            }
        }
    }

    tx.commit().context("Échec du commit")?;
    Ok(summary)
}

fn draw_from_row(row: &Row<'_>) -> rusqlite::Result<Draw> {
    let prize_table = match row.get::<_, Option<String>>(10)? {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?,
        ),
        None => None,
    };
    let date: NaiveDate = row.get(1)?;
    let balls = [
        row.get::<_, u8>(2)?,
        row.get::<_, u8>(3)?,
        row.get::<_, u8>(4)?,
        row.get::<_, u8>(5)?,
        row.get::<_, u8>(6)?,
    ];
    let stars = [row.get::<_, u8>(7)?, row.get::<_, u8>(8)?];
    // une ligne modifiée hors de l'application ne doit pas atteindre les modèles
    validate_draw(date, &balls, &stars)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Integer, e.into()))?;

    Ok(Draw {
        draw_id: row.get(0)?,
        date,
        balls,
        stars,
        jackpot: row.get(9)?,
        prize_table,
        raw_source: row.get(11)?,
    })
}

/// Historique complet, du plus ancien au plus récent.
pub fn fetch_all_chronological(conn: &Connection) -> Result<Vec<Draw>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DRAW_COLUMNS} FROM draws ORDER BY date ASC, draw_id ASC"
    ))?;
    let draws = stmt.query_map([], draw_from_row)?
        .collect::<Result<Vec<_>, _>>()
        .context("Lecture de l'historique impossible")?;
    Ok(draws)
}

pub fn fetch_last_draws(conn: &Connection, limit: u32) -> Result<Vec<Draw>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DRAW_COLUMNS} FROM draws ORDER BY date DESC, draw_id DESC LIMIT ?1"
    ))?;
    let draws = stmt.query_map([limit], draw_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(draws)
}

pub fn fetch_draw(conn: &Connection, draw_id: &str) -> Result<Option<Draw>> {
    let draw = conn
        .query_row(
            &format!("SELECT {DRAW_COLUMNS} FROM draws WHERE draw_id = ?1"),
            [draw_id],
            draw_from_row,
        )
        .optional()?;
    Ok(draw)
}

pub fn delete_draw(conn: &Connection, draw_id: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM draws WHERE draw_id = ?1", [draw_id])
        .with_context(|| format!("Échec de la suppression de {}", draw_id))?;
    Ok(changed > 0)
}

pub fn count_draws(conn: &Connection) -> Result<u32> {
    let count: u32 = conn.query_row("SELECT COUNT(*) FROM draws", [], |row| row.get(0))?;
    Ok(count)
}

pub fn store_stats(conn: &Connection) -> Result<StoreStats> {
    let (total_draws, earliest, latest) = conn.query_row(
        "SELECT COUNT(*), MIN(date), MAX(date) FROM draws",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    Ok(StoreStats { total_draws, earliest, latest })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_draw(id: &str, date: &str) -> Draw {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        Draw::new(id, date, [1, 2, 3, 4, 5], [1, 2]).unwrap()
    }

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_count() {
        let conn = memory_db();
        assert_eq!(count_draws(&conn).unwrap(), 0);

        upsert_draw(&conn, &test_draw("001", "2024-01-02")).unwrap();
        assert_eq!(count_draws(&conn).unwrap(), 1);
    }

    #[test]
    fn test_upsert_updates_by_identifier() {
        let conn = memory_db();

        let outcome = upsert_draw(&conn, &test_draw("001", "2024-01-02")).unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let mut corrected = test_draw("001", "2024-01-02");
        corrected.balls = [10, 20, 30, 40, 50];
        let outcome = upsert_draw(&conn, &corrected).unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        assert_eq!(count_draws(&conn).unwrap(), 1);
        let stored = fetch_draw(&conn, "001").unwrap().unwrap();
        assert_eq!(stored.balls, [10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_duplicate_date_rejected() {
        let conn = memory_db();
        upsert_draw(&conn, &test_draw("001", "2024-01-02")).unwrap();
        assert!(upsert_draw(&conn, &test_draw("002", "2024-01-02")).is_err());
    }

    #[test]
    fn test_upsert_draws_counts() {
        let conn = memory_db();
        let draws = vec![
            test_draw("001", "2024-01-02"),
            test_draw("002", "2024-01-05"),
            test_draw("003", "2024-01-05"),
        ];
        let summary = upsert_draws(&conn, &draws).unwrap();
        assert_eq!(summary, UpsertSummary { inserted: 2, updated: 0, errors: 1 });

        let summary = upsert_draws(&conn, &draws[..1]).unwrap();
        assert_eq!(summary.updated, 1);
    }

    #[test]
    fn test_fetch_order() {
        let conn = memory_db();

        upsert_draw(&conn, &test_draw("001", "2024-01-02")).unwrap();
        upsert_draw(&conn, &test_draw("002", "2024-01-09")).unwrap();
        upsert_draw(&conn, &test_draw("003", "2024-01-05")).unwrap();

        let last = fetch_last_draws(&conn, 10).unwrap();
        assert_eq!(last.len(), 3);
        assert_eq!(last[0].draw_id, "002");
        assert_eq!(last[2].draw_id, "001");

        let chrono = fetch_all_chronological(&conn).unwrap();
        let ids: Vec<&str> = chrono.iter().map(|d| d.draw_id.as_str()).collect();
        assert_eq!(ids, vec!["001", "003", "002"]);
    }

    #[test]
    fn test_optional_fields_roundtrip() {
        let conn = memory_db();
        let draw = test_draw("001", "2024-01-02")
            .with_jackpot(Some(17_000_000.0))
            .with_prize_table(Some(serde_json::json!({"rank_1": {"winners": 0}})))
            .with_raw_source(Some("<html/>".to_string()));
        upsert_draw(&conn, &draw).unwrap();

        let stored = fetch_draw(&conn, "001").unwrap().unwrap();
        assert_eq!(stored, draw);
    }

    #[test]
    fn test_delete_and_stats() {
        let conn = memory_db();
        upsert_draw(&conn, &test_draw("001", "2024-01-02")).unwrap();
        upsert_draw(&conn, &test_draw("002", "2024-01-05")).unwrap();

        let stats = store_stats(&conn).unwrap();
        assert_eq!(stats.total_draws, 2);
        assert_eq!(stats.earliest.unwrap().to_string(), "2024-01-02");
        assert_eq!(stats.latest.unwrap().to_string(), "2024-01-05");

        assert!(delete_draw(&conn, "002").unwrap());
        assert!(!delete_draw(&conn, "002").unwrap());
        assert_eq!(count_draws(&conn).unwrap(), 1);
    }

    #[test]
    fn test_corrupted_row_is_rejected_on_read() {
        let conn = memory_db();
        upsert_draw(&conn, &test_draw("001", "2024-01-02")).unwrap();
        upsert_draw(&conn, &test_draw("002", "2024-01-05")).unwrap();
        conn.execute("UPDATE draws SET ball_3 = 0 WHERE draw_id = '002'", []).unwrap();

        assert!(fetch_all_chronological(&conn).is_err());
        assert!(fetch_draw(&conn, "002").is_err());
        assert!(fetch_draw(&conn, "001").unwrap().is_some());

        conn.execute("UPDATE draws SET ball_3 = 3, star_2 = 13 WHERE draw_id = '002'", []).unwrap();
        assert!(fetch_last_draws(&conn, 5).is_err());

        conn.execute("UPDATE draws SET star_2 = 1 WHERE draw_id = '002'", []).unwrap();
        assert!(fetch_all_chronological(&conn).is_err());
    }

    #[test]
    fn test_empty_stats() {
        let conn = memory_db();
        let stats = store_stats(&conn).unwrap();
        assert_eq!(stats.total_draws, 0);
        assert!(stats.earliest.is_none());
    }
}
