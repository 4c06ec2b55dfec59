use chrono::{DateTime, Utc};
use rusqlite::{
    ffi, named_params, params, Connection, OptionalExtension, Row, TransactionBehavior,
};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use super::models::{
    Node, NodeLink, ProcessStep, Project, ProjectStatus, Round, StepType, User, Weight,
};

/// Storage constraints a write can trip, named by what they protect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Username,
    RoundNumber,
    StepType,
    LinkPair,
    DistinctEndpoints,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Constraint::Username => "users(username)",
            Constraint::RoundNumber => "rounds(project_id, round_number)",
            Constraint::StepType => "process_steps(round_id, step_type)",
            Constraint::LinkPair => "node_links(from_node_id, to_node_id)",
            Constraint::DistinctEndpoints => "node_links(from_node_id <> to_node_id)",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated on {0}")]
    Unique(Constraint),
    #[error("check constraint violated on {0}")]
    Check(Constraint),
    #[error("referenced row does not exist")]
    MissingReference,
    #[error("database connection lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Classify a failed write by SQLite's extended result code. `unique` and
    /// `check` name the constraints the failing statement is able to violate.
    fn classify(err: rusqlite::Error, unique: Constraint, check: Constraint) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, _) = err {
            match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return StoreError::Unique(unique);
                }
                ffi::SQLITE_CONSTRAINT_CHECK => return StoreError::Check(check),
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return StoreError::MissingReference,
                _ => {}
            }
        }
        StoreError::Sqlite(err)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Row filter composed into every caller-scoped read. The clause is written
/// against a `projects` alias; for nodes that join is a LEFT JOIN so a null
/// project (a global node) can pass.
#[derive(Debug, Clone, Copy)]
pub enum Filter<'a> {
    OwnedBy(&'a str),
    OwnedByOrGlobal(&'a str),
}

impl<'a> Filter<'a> {
    fn clause(&self, project_alias: &str) -> String {
        match self {
            Filter::OwnedBy(_) => format!("{project_alias}.user_id = :viewer"),
            Filter::OwnedByOrGlobal(_) => {
                format!("({project_alias}.id IS NULL OR {project_alias}.user_id = :viewer)")
            }
        }
    }

    fn viewer(&self) -> &'a str {
        match self {
            Filter::OwnedBy(user) | Filter::OwnedByOrGlobal(user) => user,
        }
    }
}

pub struct Database {
    conn: Mutex<Connection>,
    path: String,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let conn = Connection::open(&path)?;
        let db = Database { conn: Mutex::new(conn), path: path_str };
        db.init()?;
        Ok(db)
    }

    pub fn get_path(&self) -> String {
        self.path.clone()
    }

    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn: Mutex::new(conn), path: ":memory:".to_string() };
        db.init()?;
        Ok(db)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL DEFAULT '',
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'pending', 'completed')),
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rounds (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                round_number INTEGER NOT NULL CHECK (round_number BETWEEN 1 AND 5),
                note TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE (project_id, round_number)
            );

            CREATE TABLE IF NOT EXISTS process_steps (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                round_id TEXT NOT NULL REFERENCES rounds(id) ON DELETE CASCADE,
                step_type TEXT NOT NULL
                    CHECK (step_type IN ('overview', 'extract', 'flow', 'mvp', 'expand')),
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (round_id, step_type)
            );

            -- project_id NULL = global node
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                project_id TEXT REFERENCES projects(id) ON DELETE CASCADE,
                round_id TEXT REFERENCES rounds(id) ON DELETE CASCADE,
                step_id TEXT REFERENCES process_steps(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                context TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS node_links (
                id TEXT PRIMARY KEY,
                from_node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
                to_node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
                weight_tenths INTEGER NOT NULL DEFAULT 5 CHECK (weight_tenths BETWEEN 1 AND 10),
                created_at INTEGER NOT NULL,
                UNIQUE (from_node_id, to_node_id),
                CHECK (from_node_id <> to_node_id)
            );

            -- Refresh tokens invalidated by logout, kept until they would have expired
            CREATE TABLE IF NOT EXISTS revoked_tokens (
                jti TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_projects_user ON projects(user_id);
            CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status);
            CREATE INDEX IF NOT EXISTS idx_projects_created_at ON projects(created_at);
            CREATE INDEX IF NOT EXISTS idx_rounds_project_id ON rounds(project_id);
            CREATE INDEX IF NOT EXISTS idx_process_steps_project_id ON process_steps(project_id);
            CREATE INDEX IF NOT EXISTS idx_process_steps_round_id ON process_steps(round_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_project_id ON nodes(project_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_round_id ON nodes(round_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_step_id ON nodes(step_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_title ON nodes(title);
            CREATE INDEX IF NOT EXISTS idx_node_links_from_node ON node_links(from_node_id);
            CREATE INDEX IF NOT EXISTS idx_node_links_to_node ON node_links(to_node_id);
            "
        )?;

        Ok(())
    }

    /// Run `f` inside one immediate transaction. Commits on `Ok`, rolls back
    /// when `f` fails or the transaction is dropped.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&Repo<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let value = f(&Repo { conn: &tx })?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    /// Liveness probe for the health endpoint.
    pub fn ping(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    }
}

/// Millisecond timestamps round-trip exactly through the INTEGER columns.
pub fn now() -> DateTime<Utc> {
    millis_to_datetime(Utc::now().timestamp_millis())
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_column<T>(idx: usize, raw: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(&raw).ok_or_else(|| conversion_failure(idx, rusqlite::types::Type::Text, raw))
}

fn conversion_failure(idx: usize, ty: rusqlite::types::Type, raw: impl fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, format!("unexpected value '{}'", raw).into())
}

const STEP_ORDER_SQL: &str = "CASE s.step_type \
    WHEN 'overview' THEN 1 WHEN 'extract' THEN 2 WHEN 'flow' THEN 3 \
    WHEN 'mvp' THEN 4 WHEN 'expand' THEN 5 END";

/// Queries over a connection or an open transaction.
pub struct Repo<'c> {
    conn: &'c Connection,
}

impl<'c> Repo<'c> {
    const USER_COLUMNS: &'static str = "id, username, email, password_hash, created_at";
    const PROJECT_COLUMNS: &'static str =
        "p.id, p.user_id, p.title, p.status, p.created_at, p.updated_at";
    const ROUND_COLUMNS: &'static str =
        "r.id, r.project_id, r.round_number, r.note, r.created_at";
    const STEP_COLUMNS: &'static str =
        "s.id, s.project_id, s.round_id, s.step_type, s.content, s.created_at";
    const NODE_COLUMNS: &'static str =
        "n.id, n.project_id, n.round_id, n.step_id, n.title, n.context, p.title, n.created_at, n.updated_at";
    const LINK_COLUMNS: &'static str =
        "l.id, l.from_node_id, l.to_node_id, f.title, t.title, l.weight_tenths, l.created_at";

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            created_at: millis_to_datetime(row.get(4)?),
        })
    }

    fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
        Ok(Project {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            status: parse_column(3, row.get(3)?, ProjectStatus::from_str)?,
            created_at: millis_to_datetime(row.get(4)?),
            updated_at: millis_to_datetime(row.get(5)?),
        })
    }

    fn row_to_round(row: &Row) -> rusqlite::Result<Round> {
        Ok(Round {
            id: row.get(0)?,
            project_id: row.get(1)?,
            round_number: row.get(2)?,
            note: row.get(3)?,
            created_at: millis_to_datetime(row.get(4)?),
        })
    }

    fn row_to_step(row: &Row) -> rusqlite::Result<ProcessStep> {
        let step_type = parse_column(3, row.get(3)?, StepType::from_str)?;
        Ok(ProcessStep {
            id: row.get(0)?,
            project_id: row.get(1)?,
            round_id: row.get(2)?,
            step_type,
            step_type_number: step_type.number(),
            content: row.get(4)?,
            created_at: millis_to_datetime(row.get(5)?),
        })
    }

    fn row_to_node(row: &Row) -> rusqlite::Result<Node> {
        let project_id: Option<String> = row.get(1)?;
        Ok(Node {
            id: row.get(0)?,
            is_global: project_id.is_none(),
            project_id,
            round_id: row.get(2)?,
            step_id: row.get(3)?,
            title: row.get(4)?,
            context: row.get(5)?,
            project_title: row.get(6)?,
            created_at: millis_to_datetime(row.get(7)?),
            updated_at: millis_to_datetime(row.get(8)?),
        })
    }

    fn row_to_link(row: &Row) -> rusqlite::Result<NodeLink> {
        let tenths: u8 = row.get(5)?;
        let weight = Weight::from_tenths(tenths)
            .ok_or_else(|| conversion_failure(5, rusqlite::types::Type::Integer, tenths))?;
        Ok(NodeLink {
            id: row.get(0)?,
            from_node_id: row.get(1)?,
            to_node_id: row.get(2)?,
            from_node_title: row.get(3)?,
            to_node_title: row.get(4)?,
            weight,
            created_at: millis_to_datetime(row.get(6)?),
        })
    }

    // Users

    pub fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO users (id, username, email, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id,
                    user.username,
                    user.email,
                    user.password_hash,
                    user.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| StoreError::classify(e, Constraint::Username, Constraint::Username))?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?1", Self::USER_COLUMNS);
        Ok(self.conn.query_row(&sql, params![id], Self::row_to_user).optional()?)
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE username = ?1", Self::USER_COLUMNS);
        Ok(self.conn.query_row(&sql, params![username], Self::row_to_user).optional()?)
    }

    pub fn list_users(&self) -> StoreResult<Vec<User>> {
        let sql = format!("SELECT {} FROM users ORDER BY created_at, rowid", Self::USER_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let users = stmt.query_map([], Self::row_to_user)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn revoke_token(&self, jti: &str, expires_at: i64) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO revoked_tokens (jti, expires_at) VALUES (?1, ?2)",
            params![jti, expires_at],
        )?;
        Ok(())
    }

    pub fn is_token_revoked(&self, jti: &str) -> StoreResult<bool> {
        let revoked: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM revoked_tokens WHERE jti = ?1",
            params![jti],
            |r| r.get(0),
        )?;
        Ok(revoked)
    }

    /// Drop revocations whose token has expired anyway. Returns rows removed.
    pub fn purge_expired_revocations(&self, now_secs: i64) -> StoreResult<usize> {
        Ok(self.conn.execute("DELETE FROM revoked_tokens WHERE expires_at < ?1", params![now_secs])?)
    }

    // Projects

    pub fn insert_project(&self, project: &Project) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO projects (id, user_id, title, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project.id,
                project.owner_id,
                project.title,
                project.status.as_str(),
                project.created_at.timestamp_millis(),
                project.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn get_project(&self, id: &str, filter: Filter) -> StoreResult<Option<Project>> {
        let sql = format!(
            "SELECT {} FROM projects p WHERE p.id = :id AND {}",
            Self::PROJECT_COLUMNS,
            filter.clause("p"),
        );
        Ok(self
            .conn
            .query_row(&sql, named_params! {":id": id, ":viewer": filter.viewer()}, Self::row_to_project)
            .optional()?)
    }

    /// Newest first.
    pub fn list_projects(&self, filter: Filter) -> StoreResult<Vec<Project>> {
        let sql = format!(
            "SELECT {} FROM projects p WHERE {} ORDER BY p.created_at DESC, p.rowid DESC",
            Self::PROJECT_COLUMNS,
            filter.clause("p"),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let projects = stmt
            .query_map(named_params! {":viewer": filter.viewer()}, Self::row_to_project)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    pub fn update_project(&self, project: &Project) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE projects SET title = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                project.id,
                project.title,
                project.status.as_str(),
                project.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn delete_project(&self, id: &str) -> StoreResult<()> {
        self.conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(())
    }

    // Rounds

    pub fn insert_round(&self, round: &Round) -> StoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO rounds (id, project_id, round_number, note, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    round.id,
                    round.project_id,
                    round.round_number,
                    round.note,
                    round.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| StoreError::classify(e, Constraint::RoundNumber, Constraint::RoundNumber))?;
        Ok(())
    }

    pub fn get_round(&self, id: &str, filter: Filter) -> StoreResult<Option<Round>> {
        let sql = format!(
            "SELECT {} FROM rounds r JOIN projects p ON p.id = r.project_id
             WHERE r.id = :id AND {}",
            Self::ROUND_COLUMNS,
            filter.clause("p"),
        );
        Ok(self
            .conn
            .query_row(&sql, named_params! {":id": id, ":viewer": filter.viewer()}, Self::row_to_round)
            .optional()?)
    }

    pub fn round_number_taken(&self, project_id: &str, round_number: u8) -> StoreResult<bool> {
        let taken: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM rounds WHERE project_id = ?1 AND round_number = ?2",
            params![project_id, round_number],
            |r| r.get(0),
        )?;
        Ok(taken)
    }

    /// Grouped by project, ascending round number within each.
    pub fn list_rounds(&self, filter: Filter) -> StoreResult<Vec<Round>> {
        let sql = format!(
            "SELECT {} FROM rounds r JOIN projects p ON p.id = r.project_id
             WHERE {} ORDER BY r.project_id, r.round_number",
            Self::ROUND_COLUMNS,
            filter.clause("p"),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rounds = stmt
            .query_map(named_params! {":viewer": filter.viewer()}, Self::row_to_round)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rounds)
    }

    pub fn list_rounds_in_project(&self, project_id: &str) -> StoreResult<Vec<Round>> {
        let sql = format!(
            "SELECT {} FROM rounds r WHERE r.project_id = ?1 ORDER BY r.round_number",
            Self::ROUND_COLUMNS,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rounds = stmt
            .query_map(params![project_id], Self::row_to_round)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rounds)
    }

    pub fn update_round(&self, round: &Round) -> StoreResult<()> {
        self.conn
            .execute(
                "UPDATE rounds SET round_number = ?2, note = ?3 WHERE id = ?1",
                params![round.id, round.round_number, round.note],
            )
            .map_err(|e| StoreError::classify(e, Constraint::RoundNumber, Constraint::RoundNumber))?;
        Ok(())
    }

    pub fn delete_round(&self, id: &str) -> StoreResult<()> {
        self.conn.execute("DELETE FROM rounds WHERE id = ?1", params![id])?;
        Ok(())
    }

    // Process steps

    pub fn insert_step(&self, step: &ProcessStep) -> StoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO process_steps (id, project_id, round_id, step_type, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    step.id,
                    step.project_id,
                    step.round_id,
                    step.step_type.as_str(),
                    step.content,
                    step.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| StoreError::classify(e, Constraint::StepType, Constraint::StepType))?;
        Ok(())
    }

    pub fn get_step(&self, id: &str, filter: Filter) -> StoreResult<Option<ProcessStep>> {
        let sql = format!(
            "SELECT {} FROM process_steps s JOIN projects p ON p.id = s.project_id
             WHERE s.id = :id AND {}",
            Self::STEP_COLUMNS,
            filter.clause("p"),
        );
        Ok(self
            .conn
            .query_row(&sql, named_params! {":id": id, ":viewer": filter.viewer()}, Self::row_to_step)
            .optional()?)
    }

    pub fn step_type_taken(&self, round_id: &str, step_type: StepType) -> StoreResult<bool> {
        let taken: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM process_steps WHERE round_id = ?1 AND step_type = ?2",
            params![round_id, step_type.as_str()],
            |r| r.get(0),
        )?;
        Ok(taken)
    }

    /// Grouped by project and round number, fixed step order within a round.
    pub fn list_steps(&self, filter: Filter) -> StoreResult<Vec<ProcessStep>> {
        let sql = format!(
            "SELECT {} FROM process_steps s
             JOIN rounds r ON r.id = s.round_id
             JOIN projects p ON p.id = s.project_id
             WHERE {} ORDER BY s.project_id, r.round_number, {}",
            Self::STEP_COLUMNS,
            filter.clause("p"),
            STEP_ORDER_SQL,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let steps = stmt
            .query_map(named_params! {":viewer": filter.viewer()}, Self::row_to_step)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(steps)
    }

    /// Fixed step order (overview .. expand), independent of creation time.
    pub fn list_steps_in_round(&self, round_id: &str) -> StoreResult<Vec<ProcessStep>> {
        let sql = format!(
            "SELECT {} FROM process_steps s WHERE s.round_id = ?1 ORDER BY {}",
            Self::STEP_COLUMNS,
            STEP_ORDER_SQL,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let steps = stmt
            .query_map(params![round_id], Self::row_to_step)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(steps)
    }

    // Nodes

    pub fn insert_node(&self, node: &Node) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO nodes (id, project_id, round_id, step_id, title, context, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                node.id,
                node.project_id,
                node.round_id,
                node.step_id,
                node.title,
                node.context,
                node.created_at.timestamp_millis(),
                node.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn get_node(&self, id: &str, filter: Filter) -> StoreResult<Option<Node>> {
        let sql = format!(
            "SELECT {} FROM nodes n LEFT JOIN projects p ON p.id = n.project_id
             WHERE n.id = :id AND {}",
            Self::NODE_COLUMNS,
            filter.clause("p"),
        );
        Ok(self
            .conn
            .query_row(&sql, named_params! {":id": id, ":viewer": filter.viewer()}, Self::row_to_node)
            .optional()?)
    }

    /// Newest first.
    pub fn list_nodes(&self, filter: Filter) -> StoreResult<Vec<Node>> {
        let sql = format!(
            "SELECT {} FROM nodes n LEFT JOIN projects p ON p.id = n.project_id
             WHERE {} ORDER BY n.created_at DESC, n.rowid DESC",
            Self::NODE_COLUMNS,
            filter.clause("p"),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(named_params! {":viewer": filter.viewer()}, Self::row_to_node)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Newest first.
    pub fn list_nodes_in_project(&self, project_id: &str) -> StoreResult<Vec<Node>> {
        let sql = format!(
            "SELECT {} FROM nodes n LEFT JOIN projects p ON p.id = n.project_id
             WHERE n.project_id = ?1 ORDER BY n.created_at DESC, n.rowid DESC",
            Self::NODE_COLUMNS,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(params![project_id], Self::row_to_node)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Nodes with no project, newest first.
    pub fn list_global_nodes(&self) -> StoreResult<Vec<Node>> {
        let sql = format!(
            "SELECT {} FROM nodes n LEFT JOIN projects p ON p.id = n.project_id
             WHERE n.project_id IS NULL ORDER BY n.created_at DESC, n.rowid DESC",
            Self::NODE_COLUMNS,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let nodes = stmt
            .query_map([], Self::row_to_node)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    pub fn update_node(&self, node: &Node) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE nodes SET title = ?2, context = ?3, updated_at = ?4 WHERE id = ?1",
            params![node.id, node.title, node.context, node.updated_at.timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn delete_node(&self, id: &str) -> StoreResult<()> {
        self.conn.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
        Ok(())
    }

    // Links

    pub fn insert_link(&self, link: &NodeLink) -> StoreResult<()> {
        // Weight is range-checked by its type, so a CHECK failure here is the self-loop guard.
        self.conn
            .execute(
                "INSERT INTO node_links (id, from_node_id, to_node_id, weight_tenths, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    link.id,
                    link.from_node_id,
                    link.to_node_id,
                    link.weight.tenths(),
                    link.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| StoreError::classify(e, Constraint::LinkPair, Constraint::DistinctEndpoints))?;
        Ok(())
    }

    /// Unscoped: callers check endpoint ownership themselves.
    pub fn get_link(&self, id: &str) -> StoreResult<Option<NodeLink>> {
        let sql = format!(
            "SELECT {} FROM node_links l
             JOIN nodes f ON f.id = l.from_node_id
             JOIN nodes t ON t.id = l.to_node_id
             WHERE l.id = ?1",
            Self::LINK_COLUMNS,
        );
        Ok(self.conn.query_row(&sql, params![id], Self::row_to_link).optional()?)
    }

    pub fn link_exists(&self, from_node_id: &str, to_node_id: &str) -> StoreResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM node_links WHERE from_node_id = ?1 AND to_node_id = ?2",
            params![from_node_id, to_node_id],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    /// Links leaving `node_id` whose target passes `filter`, oldest first.
    pub fn list_outgoing_links(&self, node_id: &str, filter: Filter) -> StoreResult<Vec<NodeLink>> {
        let sql = format!(
            "SELECT {} FROM node_links l
             JOIN nodes f ON f.id = l.from_node_id
             JOIN nodes t ON t.id = l.to_node_id
             LEFT JOIN projects p ON p.id = t.project_id
             WHERE l.from_node_id = :id AND {}
             ORDER BY l.created_at, l.rowid",
            Self::LINK_COLUMNS,
            filter.clause("p"),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let links = stmt
            .query_map(named_params! {":id": node_id, ":viewer": filter.viewer()}, Self::row_to_link)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    /// Links arriving at `node_id` whose source passes `filter`, oldest first.
    pub fn list_incoming_links(&self, node_id: &str, filter: Filter) -> StoreResult<Vec<NodeLink>> {
        let sql = format!(
            "SELECT {} FROM node_links l
             JOIN nodes f ON f.id = l.from_node_id
             JOIN nodes t ON t.id = l.to_node_id
             LEFT JOIN projects p ON p.id = f.project_id
             WHERE l.to_node_id = :id AND {}
             ORDER BY l.created_at, l.rowid",
            Self::LINK_COLUMNS,
            filter.clause("p"),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let links = stmt
            .query_map(named_params! {":id": node_id, ":viewer": filter.viewer()}, Self::row_to_link)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    pub fn delete_link(&self, id: &str) -> StoreResult<()> {
        self.conn.execute("DELETE FROM node_links WHERE id = ?1", params![id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        User {
            id: uuid::Uuid::new_v4().to_string(),
            username: name.to_string(),
            email: format!("{}@example.com", name),
            password_hash: "x".to_string(),
            created_at: now(),
        }
    }

    fn project(owner: &User, title: &str) -> Project {
        let ts = now();
        Project {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner.id.clone(),
            title: title.to_string(),
            status: ProjectStatus::Active,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn round(project: &Project, number: u8) -> Round {
        Round {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project.id.clone(),
            round_number: number,
            note: None,
            created_at: now(),
        }
    }

    fn node(project: Option<&Project>, title: &str) -> Node {
        let ts = now();
        Node {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project.map(|p| p.id.clone()),
            round_id: None,
            step_id: None,
            title: title.to_string(),
            context: None,
            is_global: project.is_none(),
            project_title: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn link(from: &Node, to: &Node) -> NodeLink {
        NodeLink {
            id: uuid::Uuid::new_v4().to_string(),
            from_node_id: from.id.clone(),
            to_node_id: to.id.clone(),
            from_node_title: from.title.clone(),
            to_node_title: to.title.clone(),
            weight: Weight::default(),
            created_at: now(),
        }
    }

    #[test]
    fn test_duplicate_round_is_typed_unique_violation() {
        let db = Database::in_memory().unwrap();
        let err = db.transaction(|repo| {
            let alice = user("alice");
            repo.insert_user(&alice)?;
            let p = project(&alice, "Idea A");
            repo.insert_project(&p)?;
            repo.insert_round(&round(&p, 1))?;
            repo.insert_round(&round(&p, 1))
        }).unwrap_err();
        assert!(matches!(err, StoreError::Unique(Constraint::RoundNumber)));
    }

    #[test]
    fn test_round_number_out_of_range_is_check_violation() {
        let db = Database::in_memory().unwrap();
        let err = db.transaction(|repo| {
            let alice = user("alice");
            repo.insert_user(&alice)?;
            let p = project(&alice, "Idea A");
            repo.insert_project(&p)?;
            repo.insert_round(&round(&p, 6))
        }).unwrap_err();
        assert!(matches!(err, StoreError::Check(Constraint::RoundNumber)));
    }

    #[test]
    fn test_self_link_and_duplicate_link_rejected_by_storage() {
        let db = Database::in_memory().unwrap();
        let (a, b) = db.transaction(|repo| {
            let a = node(None, "A");
            let b = node(None, "B");
            repo.insert_node(&a)?;
            repo.insert_node(&b)?;
            repo.insert_link(&link(&a, &b))?;
            Ok::<_, StoreError>((a, b))
        }).unwrap();

        let err = db.transaction(|repo| repo.insert_link(&link(&a, &a))).unwrap_err();
        assert!(matches!(err, StoreError::Check(Constraint::DistinctEndpoints)));

        let err = db.transaction(|repo| repo.insert_link(&link(&a, &b))).unwrap_err();
        assert!(matches!(err, StoreError::Unique(Constraint::LinkPair)));

        // Reverse direction is a separate edge
        db.transaction(|repo| repo.insert_link(&link(&b, &a))).unwrap();
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let db = Database::in_memory().unwrap();
        let alice = user("alice");
        let p = project(&alice, "Idea A");
        db.transaction(|repo| {
            repo.insert_user(&alice)?;
            repo.insert_project(&p)
        }).unwrap();

        let result = db.transaction(|repo| {
            repo.insert_round(&round(&p, 2))?;
            repo.insert_round(&round(&p, 2))
        });
        assert!(result.is_err());

        let rounds = db.transaction(|repo| repo.list_rounds_in_project(&p.id)).unwrap();
        assert!(rounds.is_empty());
    }

    #[test]
    fn test_project_delete_cascades_to_scoped_nodes_and_links() {
        let db = Database::in_memory().unwrap();
        let alice = user("alice");
        let p = project(&alice, "Idea A");
        let scoped = node(Some(&p), "Card");
        let global = node(None, "Shared");
        db.transaction(|repo| {
            repo.insert_user(&alice)?;
            repo.insert_project(&p)?;
            repo.insert_round(&round(&p, 1))?;
            repo.insert_node(&scoped)?;
            repo.insert_node(&global)?;
            repo.insert_link(&link(&scoped, &global))
        }).unwrap();

        db.transaction(|repo| repo.delete_project(&p.id)).unwrap();

        let (rounds, globals, incoming) = db.transaction(|repo| {
            Ok::<_, StoreError>((
                repo.list_rounds_in_project(&p.id)?,
                repo.list_global_nodes()?,
                repo.list_incoming_links(&global.id, Filter::OwnedByOrGlobal(&alice.id))?,
            ))
        }).unwrap();
        assert!(rounds.is_empty());
        assert_eq!(globals.len(), 1);
        assert!(incoming.is_empty());
        db.ping().unwrap();
    }

    #[test]
    fn test_filters_scope_projects_and_nodes() {
        let db = Database::in_memory().unwrap();
        let alice = user("alice");
        let bob = user("bob");
        let pa = project(&alice, "Alice's");
        let card = node(Some(&pa), "Private card");
        let shared = node(None, "Shared");
        db.transaction(|repo| {
            repo.insert_user(&alice)?;
            repo.insert_user(&bob)?;
            repo.insert_project(&pa)?;
            repo.insert_node(&card)?;
            repo.insert_node(&shared)
        }).unwrap();

        db.transaction(|repo| {
            assert!(repo.get_project(&pa.id, Filter::OwnedBy(&alice.id))?.is_some());
            assert!(repo.get_project(&pa.id, Filter::OwnedBy(&bob.id))?.is_none());
            assert!(repo.list_projects(Filter::OwnedBy(&bob.id))?.is_empty());

            let bob_nodes = repo.list_nodes(Filter::OwnedByOrGlobal(&bob.id))?;
            assert_eq!(bob_nodes.len(), 1);
            assert!(bob_nodes[0].is_global);
            assert!(repo.get_node(&card.id, Filter::OwnedByOrGlobal(&bob.id))?.is_none());

            let alice_card = repo.get_node(&card.id, Filter::OwnedByOrGlobal(&alice.id))?.unwrap();
            assert_eq!(alice_card.project_title.as_deref(), Some("Alice's"));
            assert!(!alice_card.is_global);
            Ok::<_, StoreError>(())
        }).unwrap();
    }

    #[test]
    fn test_timestamps_round_trip_through_storage() {
        let db = Database::in_memory().unwrap();
        let alice = user("alice");
        db.transaction(|repo| repo.insert_user(&alice)).unwrap();
        let stored = db.transaction(|repo| repo.get_user_by_username("alice")).unwrap().unwrap();
        assert_eq!(stored.created_at, alice.created_at);
        assert_eq!(stored.id, alice.id);
    }

    #[test]
    fn test_on_disk_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thinkring.db");
        {
            let db = Database::new(&path).unwrap();
            db.transaction(|repo| repo.insert_user(&user("alice"))).unwrap();
        }
        let db = Database::new(&path).unwrap();
        assert_eq!(db.get_path(), path.to_string_lossy());
        let users = db.transaction(|repo| repo.list_users()).unwrap();
        assert_eq!(users.len(), 1);
    }
}
