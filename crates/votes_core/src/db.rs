use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Iso8601;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

// Canonical storage formats for the TEXT date/datetime columns.
pub const DATE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]");
pub const DATETIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

pub fn open(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    init(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    init(&conn)?;
    Ok(conn)
}

fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS representatives (
          id INTEGER PRIMARY KEY,
          remote_id TEXT UNIQUE,
          full_name TEXT NOT NULL,
          last_name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS mandates (
          id INTEGER PRIMARY KEY,
          representative_id INTEGER NOT NULL REFERENCES representatives(id) ON DELETE CASCADE,
          group_kind TEXT NOT NULL,
          group_label TEXT NOT NULL DEFAULT '',
          begin_date TEXT NOT NULL,
          end_date TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dossiers (
          id INTEGER PRIMARY KEY,
          reference TEXT NOT NULL UNIQUE,
          title TEXT NOT NULL DEFAULT '',
          link TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS proposals (
          id INTEGER PRIMARY KEY,
          dossier_id INTEGER NOT NULL REFERENCES dossiers(id) ON DELETE CASCADE,
          reference TEXT NOT NULL DEFAULT '',
          kind TEXT NOT NULL,
          title TEXT NOT NULL,
          datetime TEXT NOT NULL,
          total_for INTEGER NOT NULL DEFAULT 0,
          total_abstain INTEGER NOT NULL DEFAULT 0,
          total_against INTEGER NOT NULL DEFAULT 0,
          UNIQUE(dossier_id, reference, kind)
        );

        CREATE TABLE IF NOT EXISTS votes (
          id INTEGER PRIMARY KEY,
          proposal_id INTEGER NOT NULL REFERENCES proposals(id) ON DELETE CASCADE,
          representative_id INTEGER REFERENCES representatives(id),
          representative_name TEXT NOT NULL,
          position TEXT NOT NULL CHECK (position IN ('for', 'abstain', 'against'))
        );

        CREATE INDEX IF NOT EXISTS idx_mandates_representative ON mandates(representative_id);
        CREATE INDEX IF NOT EXISTS idx_proposals_dossier ON proposals(dossier_id);
        CREATE INDEX IF NOT EXISTS idx_votes_proposal ON votes(proposal_id);
        "#,
    )?;
    Ok(())
}

pub fn parse_timestamp(raw: &str) -> Result<PrimitiveDateTime> {
    PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT)
        .or_else(|_| PrimitiveDateTime::parse(raw, DATETIME_FORMAT))
        .with_context(|| format!("unparsable timestamp {raw:?}"))
}

pub fn parse_stored_date(raw: &str) -> Result<Date> {
    Date::parse(raw, DATE_FORMAT).with_context(|| format!("unparsable stored date {raw:?}"))
}

#[derive(Debug, Clone)]
pub struct DossierRow {
    pub id: i64,
    pub reference: String,
    pub title: String,
    pub link: String,
}

#[derive(Debug, Clone)]
pub struct ProposalRow {
    pub id: i64,
    pub dossier_id: i64,
    pub reference: String,
    pub kind: String,
    pub title: String,
    pub datetime: String,
    pub total_for: i64,
    pub total_abstain: i64,
    pub total_against: i64,
}

#[derive(Debug, Clone)]
pub struct VoteRow {
    pub id: i64,
    pub proposal_id: i64,
    pub representative_id: Option<i64>,
    pub representative_name: String,
    pub position: String,
}

// Representatives and their mandates are written by a separate directory
// import; these two helpers are the seam it (and the tests) write through.
pub fn insert_representative(
    conn: &Connection,
    remote_id: Option<&str>,
    full_name: &str,
    last_name: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO representatives (remote_id, full_name, last_name) VALUES (?1, ?2, ?3)",
        params![remote_id, full_name, last_name],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_mandate(
    conn: &Connection,
    representative_id: i64,
    group_kind: &str,
    group_label: &str,
    begin: Date,
    end: Date,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO mandates (representative_id, group_kind, group_label, begin_date, end_date)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            representative_id,
            group_kind,
            group_label,
            begin.format(DATE_FORMAT)?,
            end.format(DATE_FORMAT)?
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn dossier_by_reference(conn: &Connection, reference: &str) -> Result<Option<DossierRow>> {
    let row = conn
        .query_row(
            "SELECT id, reference, title, link FROM dossiers WHERE reference = ?1",
            params![reference],
            |row| {
                Ok(DossierRow {
                    id: row.get(0)?,
                    reference: row.get(1)?,
                    title: row.get(2)?,
                    link: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn insert_dossier(conn: &Connection, reference: &str, title: &str, link: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO dossiers (reference, title, link) VALUES (?1, ?2, ?3)",
        params![reference, title, link],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_dossier_title(conn: &Connection, dossier_id: i64, title: &str) -> Result<()> {
    conn.execute(
        "UPDATE dossiers SET title = ?2 WHERE id = ?1",
        params![dossier_id, title],
    )?;
    Ok(())
}

pub fn update_dossier_link(conn: &Connection, dossier_id: i64, link: &str) -> Result<()> {
    conn.execute(
        "UPDATE dossiers SET link = ?2 WHERE id = ?1",
        params![dossier_id, link],
    )?;
    Ok(())
}

pub fn purge_dossiers(conn: &Connection) -> Result<usize> {
    // Proposals and votes go with them through the cascade.
    let deleted = conn.execute("DELETE FROM dossiers", [])?;
    Ok(deleted)
}

pub fn proposal_by_key(
    conn: &Connection,
    dossier_id: i64,
    reference: &str,
    kind: &str,
) -> Result<Option<ProposalRow>> {
    let row = conn
        .query_row(
            r#"
            SELECT id, dossier_id, reference, kind, title, datetime,
                   total_for, total_abstain, total_against
            FROM proposals
            WHERE dossier_id = ?1 AND reference = ?2 AND kind = ?3
            "#,
            params![dossier_id, reference, kind],
            map_proposal_row,
        )
        .optional()?;
    Ok(row)
}

fn map_proposal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProposalRow> {
    Ok(ProposalRow {
        id: row.get(0)?,
        dossier_id: row.get(1)?,
        reference: row.get(2)?,
        kind: row.get(3)?,
        title: row.get(4)?,
        datetime: row.get(5)?,
        total_for: row.get(6)?,
        total_abstain: row.get(7)?,
        total_against: row.get(8)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn insert_proposal(
    conn: &Connection,
    dossier_id: i64,
    reference: &str,
    kind: &str,
    title: &str,
    datetime: &str,
    total_for: i64,
    total_abstain: i64,
    total_against: i64,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO proposals (
          dossier_id, reference, kind, title, datetime,
          total_for, total_abstain, total_against
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            dossier_id,
            reference,
            kind,
            title,
            datetime,
            total_for,
            total_abstain,
            total_against
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_proposal_fields(
    conn: &Connection,
    proposal_id: i64,
    title: &str,
    datetime: &str,
    total_for: i64,
    total_abstain: i64,
    total_against: i64,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE proposals
        SET title = ?2, datetime = ?3, total_for = ?4, total_abstain = ?5, total_against = ?6
        WHERE id = ?1
        "#,
        params![proposal_id, title, datetime, total_for, total_abstain, total_against],
    )?;
    Ok(())
}

pub fn vote_by_representative(
    conn: &Connection,
    proposal_id: i64,
    representative_id: i64,
) -> Result<Option<VoteRow>> {
    let row = conn
        .query_row(
            r#"
            SELECT id, proposal_id, representative_id, representative_name, position
            FROM votes
            WHERE proposal_id = ?1 AND representative_id = ?2
            "#,
            params![proposal_id, representative_id],
            map_vote_row,
        )
        .optional()?;
    Ok(row)
}

pub fn vote_by_display_name(
    conn: &Connection,
    proposal_id: i64,
    representative_name: &str,
) -> Result<Option<VoteRow>> {
    let row = conn
        .query_row(
            r#"
            SELECT id, proposal_id, representative_id, representative_name, position
            FROM votes
            WHERE proposal_id = ?1 AND representative_id IS NULL AND representative_name = ?2
            "#,
            params![proposal_id, representative_name],
            map_vote_row,
        )
        .optional()?;
    Ok(row)
}

fn map_vote_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VoteRow> {
    Ok(VoteRow {
        id: row.get(0)?,
        proposal_id: row.get(1)?,
        representative_id: row.get(2)?,
        representative_name: row.get(3)?,
        position: row.get(4)?,
    })
}

pub fn insert_vote(
    conn: &Connection,
    proposal_id: i64,
    representative_id: Option<i64>,
    representative_name: &str,
    position: &str,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO votes (proposal_id, representative_id, representative_name, position)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![proposal_id, representative_id, representative_name, position],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_vote_position(conn: &Connection, vote_id: i64, position: &str) -> Result<()> {
    conn.execute(
        "UPDATE votes SET position = ?2 WHERE id = ?1",
        params![vote_id, position],
    )?;
    Ok(())
}

pub fn set_vote_representative(
    conn: &Connection,
    vote_id: i64,
    representative_id: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE votes SET representative_id = ?2 WHERE id = ?1",
        params![vote_id, representative_id],
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct UnresolvedVote {
    pub vote_id: i64,
    pub proposal_datetime: String,
    pub representative_name: String,
}

pub fn unresolved_votes(conn: &Connection) -> Result<Vec<UnresolvedVote>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT v.id, p.datetime, v.representative_name
        FROM votes v
        JOIN proposals p ON p.id = v.proposal_id
        WHERE v.representative_id IS NULL
        ORDER BY v.id
        "#,
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(UnresolvedVote {
            vote_id: row.get(0)?,
            proposal_datetime: row.get(1)?,
            representative_name: row.get(2)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn votes_for_proposal(conn: &Connection, proposal_id: i64) -> Result<Vec<VoteRow>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, proposal_id, representative_id, representative_name, position
        FROM votes
        WHERE proposal_id = ?1
        ORDER BY id
        "#,
    )?;
    let rows = stmt.query_map(params![proposal_id], map_vote_row)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn dossier_roundtrip_and_purge_cascade() {
        let conn = open_in_memory().unwrap();
        let dossier_id = insert_dossier(&conn, "2011/0901(NLE)", "Some title", "http://x").unwrap();
        let proposal_id = insert_proposal(
            &conn,
            dossier_id,
            "A7-0001/2011",
            "resolution",
            "T1",
            "2011-02-03T12:00:00",
            1,
            0,
            0,
        )
        .unwrap();
        insert_vote(&conn, proposal_id, None, "Zzyzx (ALDE)", "for").unwrap();

        let fetched = dossier_by_reference(&conn, "2011/0901(NLE)").unwrap().unwrap();
        assert_eq!(fetched.id, dossier_id);
        assert_eq!(fetched.title, "Some title");

        assert_eq!(purge_dossiers(&conn).unwrap(), 1);
        let proposals: i64 = conn
            .query_row("SELECT COUNT(*) FROM proposals", [], |row| row.get(0))
            .unwrap();
        let votes: i64 = conn
            .query_row("SELECT COUNT(*) FROM votes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(proposals, 0);
        assert_eq!(votes, 0);
    }

    #[test]
    fn proposal_key_lookup_uses_reference_and_kind() {
        let conn = open_in_memory().unwrap();
        let dossier_id = insert_dossier(&conn, "ref", "", "").unwrap();
        insert_proposal(&conn, dossier_id, "", "resolution", "T", "2011-02-03T12:00:00", 0, 0, 0)
            .unwrap();

        assert!(proposal_by_key(&conn, dossier_id, "", "resolution").unwrap().is_some());
        assert!(proposal_by_key(&conn, dossier_id, "", "amendment").unwrap().is_none());
        assert!(proposal_by_key(&conn, dossier_id, "A7", "resolution").unwrap().is_none());
    }

    #[test]
    fn timestamp_parsing_accepts_dump_formats() {
        assert!(parse_timestamp("2009-07-14T17:05:00").is_ok());
        assert!(parse_timestamp("not a date").is_err());
    }

    #[test]
    fn mandate_dates_store_as_iso() {
        let conn = open_in_memory().unwrap();
        let rep = insert_representative(&conn, Some("1234"), "Jan VRIES", "VRIES").unwrap();
        insert_mandate(&conn, rep, "country", "NL", date!(2009 - 07 - 14), date!(2014 - 06 - 30))
            .unwrap();
        let begin: String = conn
            .query_row("SELECT begin_date FROM mandates", [], |row| row.get(0))
            .unwrap();
        assert_eq!(begin, "2009-07-14");
        assert_eq!(parse_stored_date(&begin).unwrap(), date!(2009 - 07 - 14));
    }
}
