use rusqlite::{OptionalExtension, params};

use engram_types::{Cluster, ClusterMember};

use crate::db::Database;
use crate::Result;

impl Database {
    /// Atomically replace the whole clustering: every cluster record, its
    /// exemplars and all memberships. Run by the reclustering pass; readers
    /// never observe a half-replaced clustering.
    pub fn replace_clusters(
        &self,
        clusters: &[Cluster],
        members: &[ClusterMember],
    ) -> Result<()> {
        self.with_tx(|conn| {
            conn.execute("DELETE FROM clusters", [])?;

            let mut insert_cluster = conn.prepare(
                "INSERT INTO clusters (id, name, description, created_at, refreshed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut insert_exemplar = conn.prepare(
                "INSERT INTO cluster_exemplars (cluster_id, chunk_id, rank) VALUES (?1, ?2, ?3)",
            )?;
            for cluster in clusters {
                insert_cluster.execute(params![
                    &cluster.id,
                    &cluster.name,
                    &cluster.description,
                    &cluster.created_at,
                    &cluster.refreshed_at,
                ])?;
                for (rank, chunk_id) in cluster.exemplars.iter().enumerate() {
                    insert_exemplar.execute(params![&cluster.id, chunk_id, rank as i64])?;
                }
            }

            let mut insert_member = conn.prepare(
                "INSERT INTO cluster_members (chunk_id, cluster_id, distance) VALUES (?1, ?2, ?3)",
            )?;
            for member in members {
                insert_member.execute(params![
                    &member.chunk_id,
                    &member.cluster_id,
                    member.distance
                ])?;
            }
            Ok(())
        })
    }

    pub fn get_cluster(&self, id: &str) -> Result<Option<Cluster>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, description, created_at, refreshed_at FROM clusters WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, name, description, created_at, refreshed_at)) = row else {
            return Ok(None);
        };

        let member_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM cluster_members WHERE cluster_id = ?1",
            [&id],
            |row| row.get(0),
        )?;
        let mut stmt = self.conn.prepare(
            "SELECT chunk_id FROM cluster_exemplars WHERE cluster_id = ?1 ORDER BY rank",
        )?;
        let exemplars = stmt
            .query_map([&id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(Some(Cluster {
            id,
            name,
            description,
            created_at,
            refreshed_at,
            member_count: member_count as usize,
            exemplars,
        }))
    }

    pub fn list_cluster_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM clusters ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// The (single) cluster a chunk belongs to, if any.
    pub fn cluster_of_chunk(&self, chunk_id: &str) -> Result<Option<ClusterMember>> {
        let member = self
            .conn
            .query_row(
                "SELECT chunk_id, cluster_id, distance FROM cluster_members WHERE chunk_id = ?1",
                [chunk_id],
                |row| {
                    Ok(ClusterMember {
                        chunk_id: row.get(0)?,
                        cluster_id: row.get(1)?,
                        distance: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(member)
    }

    /// Members of a cluster ordered by distance to the medoid, closest first.
    pub fn cluster_members(&self, cluster_id: &str) -> Result<Vec<ClusterMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT chunk_id, cluster_id, distance FROM cluster_members
             WHERE cluster_id = ?1 ORDER BY distance, chunk_id",
        )?;
        let members = stmt
            .query_map([cluster_id], |row| {
                Ok(ClusterMember {
                    chunk_id: row.get(0)?,
                    cluster_id: row.get(1)?,
                    distance: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }

    pub fn cluster_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM clusters", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn clustered_chunk_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cluster_members", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Refresh the human-readable labels of a cluster (off the hot path; an
    /// external summarizer calls this).
    pub fn update_cluster_labels(
        &self,
        cluster_id: &str,
        name: Option<&str>,
        description: Option<&str>,
        refreshed_at: &str,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE clusters SET name = ?2, description = ?3, refreshed_at = ?4 WHERE id = ?1",
            params![cluster_id, name, description, refreshed_at],
        )?;
        Ok(())
    }
}
