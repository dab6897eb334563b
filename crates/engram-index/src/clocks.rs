use rusqlite::OptionalExtension;

use engram_types::VectorClock;

use crate::db::Database;
use crate::Result;

/// Clock-table key for a project reference clock.
pub fn project_clock_id(project: &str) -> String {
    format!("project:{}", project)
}

/// Clock-table key for a per-agent resume clock.
pub fn agent_clock_id(agent: &str) -> String {
    format!("agent:{}", agent)
}

impl Database {
    pub fn get_clock(&self, id: &str) -> Result<Option<VectorClock>> {
        let json: Option<String> = self
            .conn
            .query_row("SELECT clock FROM clocks WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        match json {
            None => Ok(None),
            Some(json) => VectorClock::from_json(&json)
                .map(Some)
                .ok_or_else(|| Database::corruption(format!("unreadable clock record: {}", id))),
        }
    }

    pub fn put_clock(&self, id: &str, clock: &VectorClock) -> Result<()> {
        self.conn.execute(
            "INSERT INTO clocks (id, clock) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET clock = ?2",
            rusqlite::params![id, clock.to_json()],
        )?;
        Ok(())
    }

    /// The project reference clock: component-wise supremum of every clock
    /// observed under the project tag. Missing means nothing ingested yet.
    pub fn project_reference_clock(&self, project: &str) -> Result<VectorClock> {
        Ok(self
            .get_clock(&project_clock_id(project))?
            .unwrap_or_default())
    }

    /// Fold an observed clock into the project reference clock. Monotonic:
    /// the stored clock only ever moves forward. Runs in one transaction so
    /// concurrent readers never see a partial update.
    pub fn merge_reference_clock(
        &self,
        project: &str,
        observed: &VectorClock,
    ) -> Result<VectorClock> {
        let id = project_clock_id(project);
        self.with_tx(|_| {
            let mut reference = self.get_clock(&id)?.unwrap_or_default();
            reference.merge(observed);
            self.put_clock(&id, &reference)?;
            Ok(reference)
        })
    }
}
