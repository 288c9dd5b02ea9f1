use orch_core::{
    apply_ticket_status, record_subtask_reset, record_subtask_status, record_worker_assignment,
    NewTask, StatusChange, SubtaskId, SubtaskStatus, SubtaskTransition, Task, TaskId, Ticket,
    TicketError, TicketId, TicketRepository, TicketStatus, WorkerId,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("sqlite error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("json serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Ticket(#[from] TicketError),
}

impl From<PersistenceError> for TicketError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Ticket(inner) => inner,
            other => TicketError::Storage {
                message: other.to_string(),
            },
        }
    }
}

/// Ticket repository backed by SQLite. Each ticket is one row holding the
/// full JSON payload; every mutation is a read-modify-write transaction.
#[derive(Debug)]
pub struct SqliteTicketStore {
    // One connection for every ticket. SQLite serialises writers anyway, so
    // this store does not partition locks per ticket.
    conn: Mutex<Connection>,
}

impl SqliteTicketStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn migrate(&self) -> Result<(), PersistenceError> {
        self.conn.lock().execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS ticket_sequence (
    seq INTEGER PRIMARY KEY AUTOINCREMENT
);

CREATE TABLE IF NOT EXISTS tickets (
    ticket_id TEXT PRIMARY KEY,
    status_tag TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status_tag);
"#,
        )?;
        Ok(())
    }

    fn mutate<R>(
        &self,
        ticket_id: &TicketId,
        f: impl FnOnce(&mut Ticket) -> Result<R, TicketError>,
    ) -> Result<R, PersistenceError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut ticket =
            load_ticket(&tx, ticket_id)?.ok_or_else(|| TicketError::ticket_not_found(ticket_id))?;
        let result = f(&mut ticket)?;
        upsert_ticket(&tx, &ticket)?;
        tx.commit()?;
        Ok(result)
    }

    fn insert_new(&self, title: &str, description: &str) -> Result<Ticket, PersistenceError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("INSERT INTO ticket_sequence DEFAULT VALUES", [])?;
        let seq = tx.last_insert_rowid();
        let mut ticket = Ticket::new(TicketId::new(format!("TKT-{seq}")), title, description);
        ticket.push_activity("Ticket created");
        upsert_ticket(&tx, &ticket)?;
        tx.commit()?;
        Ok(ticket)
    }

    fn load(&self, ticket_id: &TicketId) -> Result<Ticket, PersistenceError> {
        let conn = self.conn.lock();
        let ticket = load_ticket(&conn, ticket_id)?
            .ok_or_else(|| TicketError::ticket_not_found(ticket_id))?;
        Ok(ticket)
    }

    fn load_all(&self) -> Result<Vec<Ticket>, PersistenceError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT payload_json FROM tickets ORDER BY created_at ASC, ticket_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tickets = Vec::new();
        for row in rows {
            let payload = row?;
            tickets.push(serde_json::from_str::<Ticket>(&payload)?);
        }
        Ok(tickets)
    }

    fn remove(&self, ticket_id: &TicketId) -> Result<bool, PersistenceError> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM tickets WHERE ticket_id = ?1", params![ticket_id.0])?;
        Ok(removed > 0)
    }

    pub fn list_by_status(&self, status: TicketStatus) -> Result<Vec<Ticket>, PersistenceError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM tickets WHERE status_tag = ?1 ORDER BY created_at ASC, ticket_id ASC",
        )?;
        let rows = stmt.query_map(params![status.as_str()], |row| row.get::<_, String>(0))?;
        let mut tickets = Vec::new();
        for row in rows {
            let payload = row?;
            tickets.push(serde_json::from_str::<Ticket>(&payload)?);
        }
        Ok(tickets)
    }
}

fn load_ticket(conn: &Connection, ticket_id: &TicketId) -> Result<Option<Ticket>, PersistenceError> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload_json FROM tickets WHERE ticket_id = ?1",
            params![ticket_id.0],
            |row| row.get(0),
        )
        .optional()?;
    payload
        .map(|value| serde_json::from_str::<Ticket>(&value))
        .transpose()
        .map_err(PersistenceError::from)
}

fn upsert_ticket(tx: &Transaction<'_>, ticket: &Ticket) -> Result<(), PersistenceError> {
    let payload = serde_json::to_string(ticket)?;
    tx.execute(
        r#"
INSERT INTO tickets (ticket_id, status_tag, payload_json, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(ticket_id) DO UPDATE SET
  status_tag = excluded.status_tag,
  payload_json = excluded.payload_json,
  updated_at = excluded.updated_at
"#,
        params![
            ticket.id.0,
            ticket.status.as_str(),
            payload,
            ticket.created_at.to_rfc3339(),
            ticket.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl TicketRepository for SqliteTicketStore {
    fn create_ticket(&self, title: &str, description: &str) -> Result<Ticket, TicketError> {
        Ok(self.insert_new(title, description)?)
    }

    fn get_ticket(&self, ticket_id: &TicketId) -> Result<Ticket, TicketError> {
        Ok(self.load(ticket_id)?)
    }

    fn list_tickets(&self) -> Result<Vec<Ticket>, TicketError> {
        Ok(self.load_all()?)
    }

    fn delete_ticket(&self, ticket_id: &TicketId) -> Result<bool, TicketError> {
        Ok(self.remove(ticket_id)?)
    }

    fn update_status(
        &self,
        ticket_id: &TicketId,
        status: TicketStatus,
    ) -> Result<StatusChange, TicketError> {
        Ok(self.mutate(ticket_id, |ticket| {
            Ok(apply_ticket_status(ticket, status))
        })?)
    }

    fn update_subtask_status(
        &self,
        ticket_id: &TicketId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
        status: SubtaskStatus,
        notes: Option<&str>,
    ) -> Result<SubtaskTransition, TicketError> {
        Ok(self.mutate(ticket_id, |ticket| {
            record_subtask_status(ticket, task_id, subtask_id, status, notes)
        })?)
    }

    fn add_activity_log(&self, ticket_id: &TicketId, entry: &str) -> Result<(), TicketError> {
        Ok(self.mutate(ticket_id, |ticket| {
            ticket.push_activity(entry);
            Ok(())
        })?)
    }

    fn add_task(&self, ticket_id: &TicketId, task: NewTask) -> Result<Task, TicketError> {
        Ok(self.mutate(ticket_id, |ticket| Ok(ticket.add_task(task)))?)
    }

    fn assign_worker(
        &self,
        ticket_id: &TicketId,
        worker_id: Option<WorkerId>,
    ) -> Result<(), TicketError> {
        Ok(self.mutate(ticket_id, |ticket| {
            record_worker_assignment(ticket, worker_id);
            Ok(())
        })?)
    }

    fn set_branch(&self, ticket_id: &TicketId, branch: &str) -> Result<(), TicketError> {
        Ok(self.mutate(ticket_id, |ticket| {
            ticket.branch_name = Some(branch.to_string());
            ticket.push_activity(format!("Branch set: {branch}"));
            Ok(())
        })?)
    }

    fn reset_subtask(
        &self,
        ticket_id: &TicketId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> Result<(), TicketError> {
        Ok(self.mutate(ticket_id, |ticket| {
            record_subtask_reset(ticket, task_id, subtask_id)
        })?)
    }
}
