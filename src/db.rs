use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::pipeline::{ResultRow, RowStatus, RunReport};

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("opening {path}"))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id           INTEGER PRIMARY KEY,
            started_at   TEXT NOT NULL,
            finished_at  TEXT NOT NULL,
            categories   INTEGER NOT NULL,
            classified   INTEGER NOT NULL,
            shortlisted  INTEGER NOT NULL,
            failed       BOOLEAN NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS results (
            id              INTEGER PRIMARY KEY,
            run_id          INTEGER NOT NULL REFERENCES runs(id),
            position        INTEGER NOT NULL,
            category        TEXT NOT NULL,
            category_url    TEXT NOT NULL,
            rank_position   INTEGER,
            catalog_id      TEXT,
            listing_title   TEXT,
            detail_url      TEXT,
            title           TEXT,
            author          TEXT,
            popularity_rank INTEGER,
            provenance      TEXT,
            topic           TEXT,
            meets_threshold BOOLEAN NOT NULL DEFAULT 0,
            status          TEXT NOT NULL CHECK(status IN ('classified','skipped')),
            notes           TEXT NOT NULL DEFAULT '[]',
            UNIQUE(run_id, position)
        );
        CREATE INDEX IF NOT EXISTS idx_results_run ON results(run_id);
        CREATE INDEX IF NOT EXISTS idx_results_shortlist ON results(run_id, meets_threshold);
        ",
    )?;
    Ok(())
}

/// Store a finished run and its rows. Returns the new run id.
pub fn save_run(conn: &Connection, report: &RunReport) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO runs (started_at, finished_at, categories, classified, shortlisted, failed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            report.started_at.to_rfc3339(),
            report.finished_at.to_rfc3339(),
            report.rows.len() as i64,
            report.classified() as i64,
            report.shortlist().count() as i64,
            report.failed(),
        ],
    )?;
    let run_id = tx.last_insert_rowid();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO results
             (run_id, position, category, category_url, rank_position, catalog_id, listing_title,
              detail_url, title, author, popularity_rank, provenance, topic, meets_threshold, status, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )?;
        for (i, r) in report.rows.iter().enumerate() {
            stmt.execute(params![
                run_id,
                i as i64,
                r.category,
                r.category_url,
                r.rank_position.map(|p| p as i64),
                r.catalog_id,
                r.listing_title,
                r.detail_url,
                r.title,
                r.author,
                r.popularity_rank.map(|p| p as i64),
                r.provenance,
                r.topic,
                r.meets_threshold,
                r.status.as_str(),
                serde_json::to_string(&r.notes)?,
            ])?;
        }
    }
    tx.commit()?;
    Ok(run_id)
}

pub fn latest_run_id(conn: &Connection) -> Result<Option<i64>> {
    let id = conn
        .query_row("SELECT MAX(id) FROM runs", [], |row| row.get::<_, Option<i64>>(0))
        .optional()?
        .flatten();
    Ok(id)
}

pub struct RunSummary {
    pub id: i64,
    pub started_at: String,
    pub finished_at: String,
    pub categories: i64,
    pub classified: i64,
    pub shortlisted: i64,
    pub failed: bool,
}

pub fn fetch_run(conn: &Connection, run_id: i64) -> Result<Option<RunSummary>> {
    let run = conn
        .query_row(
            "SELECT id, started_at, finished_at, categories, classified, shortlisted, failed
             FROM runs WHERE id = ?1",
            [run_id],
            |row| {
                Ok(RunSummary {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    categories: row.get(3)?,
                    classified: row.get(4)?,
                    shortlisted: row.get(5)?,
                    failed: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(run)
}

pub fn fetch_results(
    conn: &Connection,
    run_id: i64,
    shortlist_only: bool,
    limit: Option<usize>,
) -> Result<Vec<ResultRow>> {
    let mut sql = String::from(
        "SELECT category, category_url, rank_position, catalog_id, listing_title, detail_url,
                title, author, popularity_rank, provenance, topic, meets_threshold, status, notes
         FROM results WHERE run_id = ?1",
    );
    if shortlist_only {
        sql.push_str(" AND meets_threshold = 1");
    }
    sql.push_str(" ORDER BY position");
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {}", n));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([run_id], |row| {
            let status: String = row.get(12)?;
            let notes: String = row.get(13)?;
            Ok(ResultRow {
                category: row.get(0)?,
                category_url: row.get(1)?,
                rank_position: row.get::<_, Option<i64>>(2)?.map(|p| p as usize),
                catalog_id: row.get(3)?,
                listing_title: row.get(4)?,
                detail_url: row.get(5)?,
                title: row.get(6)?,
                author: row.get(7)?,
                popularity_rank: row.get::<_, Option<i64>>(8)?.map(|p| p as u64),
                provenance: row.get(9)?,
                topic: row.get(10)?,
                meets_threshold: row.get(11)?,
                status: RowStatus::parse(&status).unwrap_or(RowStatus::Skipped),
                notes: serde_json::from_str(&notes).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(13, rusqlite::types::Type::Text, Box::new(e))
                })?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn row(category: &str, rank: Option<u64>, meets: bool) -> ResultRow {
        ResultRow {
            category: category.into(),
            category_url: format!("https://shop.example/{category}"),
            rank_position: Some(5),
            catalog_id: Some("B0ANX00005".into()),
            listing_title: Some("Listing Title".into()),
            detail_url: Some("https://shop.example/dp/B0ANX00005".into()),
            title: Some("Quiet Harbor: Daily Practices".into()),
            author: None,
            popularity_rank: rank,
            provenance: rank.map(|r| format!("Best Sellers Rank: #{r}")),
            topic: Some("Daily Practices".into()),
            meets_threshold: meets,
            status: RowStatus::Classified,
            notes: vec!["no author found".into()],
        }
    }

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn saves_and_reads_back_a_run() {
        let conn = memory();
        assert_eq!(latest_run_id(&conn).unwrap(), None);

        let mut skipped = ResultRow {
            title: None,
            popularity_rank: None,
            provenance: None,
            topic: None,
            rank_position: None,
            catalog_id: None,
            listing_title: None,
            detail_url: None,
            status: RowStatus::Skipped,
            ..row("Compulsive Behavior", None, false)
        };
        skipped.notes = vec!["no title on detail page; kept listing title".into(), "no author found".into()];
        let report = RunReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            rows: vec![row("Anxiety", Some(18_500), true), skipped.clone(), row("Stress", Some(40_000), false)],
        };

        let id = save_run(&conn, &report).unwrap();
        assert_eq!(latest_run_id(&conn).unwrap(), Some(id));

        let all = fetch_results(&conn, id, false, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], report.rows[0]);
        assert_eq!(all[1], skipped);

        let short = fetch_results(&conn, id, true, None).unwrap();
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].category, "Anxiety");

        assert_eq!(fetch_results(&conn, id, false, Some(2)).unwrap().len(), 2);

        let summary = fetch_run(&conn, id).unwrap().unwrap();
        assert_eq!(summary.categories, 3);
        assert_eq!(summary.classified, 2);
        assert_eq!(summary.shortlisted, 1);
        assert!(!summary.failed);
    }

    #[test]
    fn unknown_run_is_none() {
        let conn = memory();
        assert!(fetch_run(&conn, 42).unwrap().is_none());
        assert!(fetch_results(&conn, 42, false, None).unwrap().is_empty());
    }
}
