use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "marksheets.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE_NAME))?;
    migrate(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    migrate(&conn)?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            section TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            roll_no TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    // subjects_json/conduct_json hold the caller-facing records; the overall
    // columns are derived copies kept for listing and class summaries.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS marksheets(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            term TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            subjects_json TEXT NOT NULL,
            conduct_json TEXT NOT NULL,
            class_teacher_remarks TEXT NOT NULL DEFAULT '',
            principal_remarks TEXT NOT NULL DEFAULT '',
            overall_percentage REAL NOT NULL,
            overall_grade TEXT NOT NULL,
            cgpa REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(student_id, academic_year, term, exam_type)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marksheets_class ON marksheets(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marksheets_student ON marksheets(student_id)",
        [],
    )?;

    ensure_marksheets_rank_columns(conn)?;
    ensure_marksheets_transition_columns(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marksheets_status ON marksheets(status)",
        [],
    )?;
    Ok(())
}

fn ensure_marksheets_rank_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "marksheets", "rank")? {
        conn.execute("ALTER TABLE marksheets ADD COLUMN rank INTEGER", [])?;
    }
    if !table_has_column(conn, "marksheets", "total_students")? {
        conn.execute(
            "ALTER TABLE marksheets ADD COLUMN total_students INTEGER",
            [],
        )?;
    }
    Ok(())
}

fn ensure_marksheets_transition_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "marksheets", "published_at")? {
        conn.execute("ALTER TABLE marksheets ADD COLUMN published_at TEXT", [])?;
    }
    if !table_has_column(conn, "marksheets", "finalized_at")? {
        conn.execute("ALTER TABLE marksheets ADD COLUMN finalized_at TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
