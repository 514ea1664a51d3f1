use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{ImportError, Result};
use crate::models::TransactionGroup;

#[allow(dead_code)]
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transaction_group (
    id INTEGER PRIMARY KEY,
    date_day INTEGER NOT NULL,
    date_month INTEGER NOT NULL,
    date_year INTEGER NOT NULL,
    expanded INTEGER NOT NULL DEFAULT 0
);
";

#[allow(dead_code)]
const COLUMNS: &str = "id, date_day, date_month, date_year, expanded";

#[allow(dead_code)]
pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

#[allow(dead_code)]
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[allow(dead_code)]
fn group_from_row(row: &Row) -> rusqlite::Result<TransactionGroup> {
    Ok(TransactionGroup {
        id: row.get(0)?,
        day: row.get(1)?,
        month: row.get(2)?,
        year: row.get(3)?,
        expanded: row.get(4)?,
    })
}

#[allow(dead_code)]
pub fn insert_transaction_group(conn: &Connection, group: &TransactionGroup) -> Result<()> {
    group.validate()?;
    conn.execute(
        "INSERT INTO transaction_group (id, date_day, date_month, date_year, expanded) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![group.id, group.day, group.month, group.year, group.expanded],
    )?;
    Ok(())
}

#[allow(dead_code)]
pub fn get_transaction_group(conn: &Connection, id: i64) -> Result<Option<TransactionGroup>> {
    let group = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM transaction_group WHERE id = ?1"),
            [id],
            group_from_row,
        )
        .optional()?;
    Ok(group)
}

#[allow(dead_code)]
pub fn list_transaction_groups(conn: &Connection) -> Result<Vec<TransactionGroup>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM transaction_group ORDER BY date_year, date_month, date_day, id"
    ))?;
    let groups = stmt
        .query_map([], group_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(groups)
}

#[allow(dead_code)]
pub fn update_transaction_group(conn: &Connection, group: &TransactionGroup) -> Result<()> {
    group.validate()?;
    let changed = conn.execute(
        "UPDATE transaction_group SET date_day = ?2, date_month = ?3, date_year = ?4, expanded = ?5 WHERE id = ?1",
        params![group.id, group.day, group.month, group.year, group.expanded],
    )?;
    if changed == 0 {
        return Err(ImportError::InvalidGroup(format!("no transaction group with id {}", group.id)));
    }
    Ok(())
}

#[allow(dead_code)]
pub fn set_expanded(conn: &Connection, id: i64, expanded: bool) -> Result<()> {
    let changed = conn.execute(
        "UPDATE transaction_group SET expanded = ?2 WHERE id = ?1",
        params![id, expanded],
    )?;
    if changed == 0 {
        return Err(ImportError::InvalidGroup(format!("no transaction group with id {id}")));
    }
    Ok(())
}

/// Returns whether a row was removed.
#[allow(dead_code)]
pub fn delete_transaction_group(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM transaction_group WHERE id = ?1", [id])?;
    Ok(changed > 0)
}

#[allow(dead_code)]
pub fn next_transaction_group_id(conn: &Connection) -> Result<i64> {
    let max: Option<i64> = conn.query_row("SELECT max(id) FROM transaction_group", [], |row| row.get(0))?;
    Ok(max.unwrap_or(0) + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn group(id: i64, y: i32, m: u32, d: u32) -> TransactionGroup {
        TransactionGroup::new(id, NaiveDate::from_ymd_opt(y, m, d).unwrap(), false)
    }

    #[test]
    fn test_init_db_creates_table_with_mapped_columns() {
        let (_dir, conn) = test_db();
        let columns: Vec<String> = conn
            .prepare("SELECT name FROM pragma_table_info('transaction_group')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(columns, ["id", "date_day", "date_month", "date_year", "expanded"]);
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_insert_and_get() {
        let (_dir, conn) = test_db();
        let g = group(1, 2017, 6, 30).with_expanded(true);
        insert_transaction_group(&conn, &g).unwrap();
        assert_eq!(get_transaction_group(&conn, 1).unwrap(), Some(g));
        assert_eq!(get_transaction_group(&conn, 2).unwrap(), None);
    }

    #[test]
    fn test_insert_rejects_invalid_date() {
        let (_dir, conn) = test_db();
        let bad = TransactionGroup {
            id: 1,
            day: 31,
            month: 4,
            year: 2020,
            expanded: false,
        };
        assert!(matches!(insert_transaction_group(&conn, &bad), Err(ImportError::InvalidGroup(_))));
        assert!(list_transaction_groups(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_id_is_db_error() {
        let (_dir, conn) = test_db();
        insert_transaction_group(&conn, &group(1, 2020, 1, 1)).unwrap();
        assert!(matches!(
            insert_transaction_group(&conn, &group(1, 2020, 1, 2)),
            Err(ImportError::Db(_))
        ));
    }

    #[test]
    fn test_list_orders_by_date_then_id() {
        let (_dir, conn) = test_db();
        insert_transaction_group(&conn, &group(1, 2021, 3, 1)).unwrap();
        insert_transaction_group(&conn, &group(2, 2020, 12, 31)).unwrap();
        insert_transaction_group(&conn, &group(4, 2021, 1, 15)).unwrap();
        insert_transaction_group(&conn, &group(3, 2021, 1, 15)).unwrap();
        let ids: Vec<i64> = list_transaction_groups(&conn).unwrap().iter().map(|g| g.id).collect();
        assert_eq!(ids, [2, 3, 4, 1]);
    }

    #[test]
    fn test_update_and_set_expanded() {
        let (_dir, conn) = test_db();
        insert_transaction_group(&conn, &group(1, 2019, 5, 5)).unwrap();
        update_transaction_group(&conn, &group(1, 2019, 5, 6)).unwrap();
        set_expanded(&conn, 1, true).unwrap();
        let stored = get_transaction_group(&conn, 1).unwrap().unwrap();
        assert_eq!((stored.day, stored.expanded), (6, true));

        assert!(update_transaction_group(&conn, &group(9, 2019, 5, 6)).is_err());
        assert!(set_expanded(&conn, 9, true).is_err());
    }

    #[test]
    fn test_delete_and_next_id() {
        let (_dir, conn) = test_db();
        assert_eq!(next_transaction_group_id(&conn).unwrap(), 1);
        insert_transaction_group(&conn, &group(5, 2018, 8, 8)).unwrap();
        assert_eq!(next_transaction_group_id(&conn).unwrap(), 6);
        assert!(delete_transaction_group(&conn, 5).unwrap());
        assert!(!delete_transaction_group(&conn, 5).unwrap());
        assert_eq!(next_transaction_group_id(&conn).unwrap(), 1);
    }
}
