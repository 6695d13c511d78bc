use crate::db;
use anyhow::Result;
use rusqlite::Connection;
use std::collections::HashMap;
use time::Date;

// Mandates of kind "country" are the only ones that participate in matching.
const MATCHING_KIND: &str = "country";

#[derive(Debug, Clone)]
pub struct MandateEntry {
    pub representative_id: i64,
    pub full_name: String,
    pub last_name: String,
    pub full_name_upper: String,
    pub last_name_upper: String,
    pub begin: Date,
    pub end: Date,
}

impl MandateEntry {
    // Closed interval on both ends.
    pub fn active_on(&self, date: Date) -> bool {
        self.begin <= date && date <= self.end
    }
}

#[derive(Debug, Default)]
pub struct MandateIndex {
    entries: Vec<MandateEntry>,
    by_remote: HashMap<String, i64>,
}

impl MandateIndex {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            r#"
            SELECT r.id, r.full_name, r.last_name, m.begin_date, m.end_date
            FROM mandates m
            JOIN representatives r ON r.id = m.representative_id
            WHERE m.group_kind = ?1
            ORDER BY r.id, m.begin_date
            "#,
        )?;
        let rows = stmt.query_map([MATCHING_KIND], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (representative_id, full_name, last_name, begin, end) = row?;
            entries.push(MandateEntry {
                representative_id,
                full_name_upper: full_name.to_uppercase(),
                last_name_upper: last_name.to_uppercase(),
                full_name,
                last_name,
                begin: db::parse_stored_date(&begin)?,
                end: db::parse_stored_date(&end)?,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT remote_id, id FROM representatives WHERE remote_id IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut by_remote = HashMap::new();
        for row in rows {
            let (remote_id, id) = row?;
            by_remote.insert(remote_id, id);
        }

        Ok(Self { entries, by_remote })
    }

    pub fn active_on(&self, date: Date) -> impl Iterator<Item = &MandateEntry> {
        self.entries.iter().filter(move |entry| entry.active_on(date))
    }

    pub fn representative_by_remote(&self, remote_id: &str) -> Option<i64> {
        self.by_remote.get(remote_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_mandate, insert_representative, open_in_memory};
    use time::macros::date;

    #[test]
    fn loads_only_country_mandates_in_id_order() {
        let conn = open_in_memory().unwrap();
        let second = insert_representative(&conn, Some("2"), "B Person", "PERSON").unwrap();
        let first = insert_representative(&conn, Some("1"), "A Body", "BODY").unwrap();
        insert_mandate(&conn, second, "country", "FR", date!(2009 - 07 - 14), date!(2014 - 06 - 30))
            .unwrap();
        insert_mandate(&conn, first, "country", "NL", date!(2009 - 07 - 14), date!(2014 - 06 - 30))
            .unwrap();
        insert_mandate(&conn, first, "group", "ALDE", date!(2009 - 07 - 14), date!(2014 - 06 - 30))
            .unwrap();

        let index = MandateIndex::load(&conn).unwrap();
        assert_eq!(index.len(), 2);
        let ids: Vec<_> = index
            .active_on(date!(2010 - 01 - 01))
            .map(|entry| entry.representative_id)
            .collect();
        assert!(ids.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn validity_window_is_inclusive() {
        let entry = MandateEntry {
            representative_id: 1,
            full_name: "A".into(),
            last_name: "A".into(),
            full_name_upper: "A".into(),
            last_name_upper: "A".into(),
            begin: date!(2009 - 07 - 14),
            end: date!(2014 - 06 - 30),
        };
        assert!(entry.active_on(date!(2009 - 07 - 14)));
        assert!(entry.active_on(date!(2014 - 06 - 30)));
        assert!(!entry.active_on(date!(2009 - 07 - 13)));
        assert!(!entry.active_on(date!(2014 - 07 - 01)));
    }

    #[test]
    fn remote_id_map() {
        let conn = open_in_memory().unwrap();
        let rep = insert_representative(&conn, Some("4242"), "Jan VRIES", "VRIES").unwrap();
        insert_representative(&conn, None, "No Remote", "REMOTE").unwrap();

        let index = MandateIndex::load(&conn).unwrap();
        assert_eq!(index.representative_by_remote("4242"), Some(rep));
        assert_eq!(index.representative_by_remote("9999"), None);
    }
}
