use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use crate::Result;
use crate::schema::{TranscriptRecord, UserContent};

/// Pull-based record iterator over a transcript file.
///
/// Lines stream through a buffered reader so large transcripts are never
/// slurped. Malformed lines are skipped individually; only failure to open
/// the file is reported up the stack.
pub struct RecordIter {
    lines: Lines<BufReader<File>>,
}

impl RecordIter {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
        })
    }
}

impl Iterator for RecordIter {
    type Item = TranscriptRecord;

    fn next(&mut self) -> Option<Self::Item> {
        for line in self.lines.by_ref() {
            let line = match line {
                Ok(l) => l,
                Err(_) => continue,
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<TranscriptRecord>(trimmed) {
                Ok(record) => return Some(record),
                Err(_) => continue, // skip malformed lines, never fatal
            }
        }
        None
    }
}

/// Read all records of a transcript into memory (test and topology helper).
pub fn read_records(path: &Path) -> Result<Vec<TranscriptRecord>> {
    Ok(RecordIter::open(path)?.collect())
}

#[derive(Debug, Clone)]
pub struct TranscriptHeader {
    pub session_id: Option<String>,
    pub cwd: Option<String>,
    pub timestamp: Option<String>,
    pub snippet: Option<String>,
    pub is_sidechain: bool,
    pub agent_id: Option<String>,
}

/// Extract header information from the first records of a transcript
/// (for scanning). Reads a bounded prefix only.
pub fn extract_header(path: &Path) -> Result<TranscriptHeader> {
    let mut session_id = None;
    let mut cwd = None;
    let mut timestamp = None;
    let mut snippet = None;
    let mut is_sidechain = false;
    let mut agent_id = None;

    for record in RecordIter::open(path)?.take(200) {
        match &record {
            TranscriptRecord::User(user) => {
                if session_id.is_none() {
                    session_id = Some(user.session_id.clone());
                }
                if cwd.is_none() {
                    cwd = user.cwd.clone();
                }
                if timestamp.is_none() {
                    timestamp = Some(user.timestamp.clone());
                }
                if agent_id.is_none() {
                    agent_id = user.agent_id.clone();
                }
                if snippet.is_none() && !user.is_meta {
                    snippet = user.message.content.iter().find_map(|c| match c {
                        UserContent::Text { text } => Some(text.clone()),
                        _ => None,
                    });
                }
                is_sidechain = user.is_sidechain;
            }
            TranscriptRecord::Assistant(asst) => {
                if session_id.is_none() {
                    session_id = Some(asst.session_id.clone());
                }
                if cwd.is_none() {
                    cwd = asst.cwd.clone();
                }
                if timestamp.is_none() {
                    timestamp = Some(asst.timestamp.clone());
                }
                if agent_id.is_none() {
                    agent_id = asst.agent_id.clone();
                }
                is_sidechain = is_sidechain || asst.is_sidechain;
            }
            _ => {}
        }

        if session_id.is_some() && cwd.is_some() && timestamp.is_some() && snippet.is_some() {
            break;
        }
    }

    Ok(TranscriptHeader {
        session_id,
        cwd,
        timestamp,
        snippet,
        is_sidechain,
        agent_id,
    })
}

/// A dead-end sub-agent file: very short, with no assistant content in its
/// first records. These are spawn artifacts and are excluded from ingestion.
pub fn is_dead_end_file(path: &Path) -> bool {
    let Ok(iter) = RecordIter::open(path) else {
        return true;
    };
    let mut record_count = 0;
    for record in iter.take(10) {
        record_count += 1;
        if matches!(record, TranscriptRecord::Assistant(_)) {
            return false;
        }
    }
    record_count < 3
}
