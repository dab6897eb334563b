use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::Result;
use crate::io::{extract_header, is_dead_end_file};

/// Files belonging to one session: the main transcript plus any sub-agent
/// (sidechain) transcripts found beside it.
#[derive(Debug, Clone)]
pub struct SessionFiles {
    pub session_id: String,
    pub main_file: PathBuf,
    pub sidechain_files: Vec<PathBuf>,
    pub project_root: Option<String>,
    pub start_ts: Option<String>,
    /// Most recent modification time across all files, RFC-3339.
    pub mod_time: Option<String>,
}

fn mod_time_rfc3339(path: &Path) -> Option<String> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let dt: DateTime<Utc> = modified.into();
    Some(dt.to_rfc3339())
}

/// Scan a log root for session transcripts, grouped by session id and
/// ordered by modification time (oldest first) so batch ingestion replays
/// history in the order it happened.
///
/// Dead-end sub-agent files (spawn artifacts with no assistant content) are
/// excluded here so downstream passes never see them.
pub fn discover_sessions(log_root: &Path) -> Result<Vec<SessionFiles>> {
    let mut sessions: HashMap<String, SessionFiles> = HashMap::new();

    for entry in WalkDir::new(log_root)
        .max_depth(3)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || path.extension().is_none_or(|e| e != "jsonl") {
            continue;
        }
        if std::fs::metadata(path).map(|m| m.len()).unwrap_or(0) == 0 {
            continue;
        }

        let header = match extract_header(path) {
            Ok(h) => h,
            Err(_) => continue,
        };
        let Some(session_id) = header.session_id else {
            continue;
        };

        if header.is_sidechain && is_dead_end_file(path) {
            tracing::debug!(path = %path.display(), "skipping dead-end sub-agent file");
            continue;
        }

        let session = sessions
            .entry(session_id.clone())
            .or_insert_with(|| SessionFiles {
                session_id,
                main_file: path.to_path_buf(),
                sidechain_files: Vec::new(),
                project_root: header.cwd.clone(),
                start_ts: header.timestamp.clone(),
                mod_time: None,
            });

        if header.is_sidechain {
            if !session.sidechain_files.contains(&path.to_path_buf()) {
                session.sidechain_files.push(path.to_path_buf());
            }
        } else {
            session.main_file = path.to_path_buf();
            if session.project_root.is_none() {
                session.project_root = header.cwd;
            }
            if session.start_ts.is_none() {
                session.start_ts = header.timestamp;
            }
        }
    }

    let mut result: Vec<SessionFiles> = sessions.into_values().collect();
    for session in &mut result {
        let mut newest = mod_time_rfc3339(&session.main_file);
        for file in &session.sidechain_files {
            let t = mod_time_rfc3339(file);
            if t > newest {
                newest = t;
            }
        }
        session.mod_time = newest;
        session.sidechain_files.sort();
    }
    result.sort_by(|a, b| a.mod_time.cmp(&b.mod_time));
    Ok(result)
}
