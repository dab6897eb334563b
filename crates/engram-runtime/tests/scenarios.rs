//! End-to-end scenarios: ingest real transcript files through the full
//! pipeline and exercise the retrieval surface.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use engram_engine::EpisodeResult;
use engram_runtime::{
    Config, ForgetRequest, HashEmbedder, IngestOptions, MemoryStore, QueryOptions,
};

fn store() -> MemoryStore {
    MemoryStore::open_in_memory(Arc::new(HashEmbedder::new(128)), Config::default()).unwrap()
}

fn write_file(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    path
}

fn user_line(uuid: &str, session: &str, ts: &str, text: &str) -> String {
    format!(
        r#"{{"type":"user","uuid":"{uuid}","sessionId":"{session}","timestamp":"{ts}","cwd":"/proj","message":{{"role":"user","content":{}}}}}"#,
        serde_json::to_string(text).unwrap()
    )
}

fn assistant_line(uuid: &str, session: &str, ts: &str, text: &str) -> String {
    format!(
        r#"{{"type":"assistant","uuid":"{uuid}","sessionId":"{session}","timestamp":"{ts}","message":{{"content":[{{"type":"text","text":{}}}]}}}}"#,
        serde_json::to_string(text).unwrap()
    )
}

/// Five turns, each heavy enough to become its own chunk, with distinct
/// topic words so retrieval can tell them apart.
fn linear_session(dir: &Path, session: &str, day: u32) {
    let topics = [
        "parsing the configuration loader",
        "refactoring the storage engine",
        "debugging the scheduler deadlock",
        "profiling the query planner",
        "documenting the public interface",
    ];
    let mut lines = Vec::new();
    for (i, topic) in topics.iter().enumerate() {
        let pad: String = format!("{} ", topic).repeat(35);
        lines.push(user_line(
            &format!("u{}", i),
            session,
            &format!("2025-02-{:02}T10:{:02}:00Z", day, i),
            &format!("work on {} {}", topic, pad),
        ));
        lines.push(assistant_line(
            &format!("a{}", i),
            session,
            &format!("2025-02-{:02}T10:{:02}:30Z", day, i),
            &format!("done with {}", topic),
        ));
    }
    write_file(dir, &format!("{}.jsonl", session), &lines);
}

fn set_mtimes(dir: &Path, names: &[&str]) {
    for (i, name) in names.iter().enumerate() {
        let t = filetime::FileTime::from_unix_time(1_700_000_000 + i as i64 * 100, 0);
        filetime::set_file_mtime(dir.join(name), t).unwrap();
    }
}

#[test]
fn scenario_linear_session_recall_and_predict() {
    let dir = tempfile::tempdir().unwrap();
    linear_session(dir.path(), "lin", 1);

    let store = store();
    let report = store
        .ingest_root(dir.path(), &IngestOptions::default())
        .unwrap();
    assert!(report.errors.is_empty());
    assert_eq!(report.chunks, 5);
    assert_eq!(report.edges, 4);

    let chunks = store.db().session_chunks("lin").unwrap();
    assert_eq!(chunks.len(), 5);

    // recall with the text of the last chunk walks back to the beginning.
    let last_text = chunks[4].text.clone();
    let recall = store.recall(&last_text, &QueryOptions::default()).unwrap();
    match &recall {
        EpisodeResult::Chain {
            chunks: chain,
            chain_length,
            ..
        } => {
            assert_eq!(*chain_length, 5);
            let ids: Vec<&str> = chain.iter().map(|h| h.chunk_id.as_str()).collect();
            assert_eq!(
                ids,
                vec!["lin#0000", "lin#0001", "lin#0002", "lin#0003", "lin#0004"]
            );
        }
        other => panic!("expected chain, got fallback: {:?}", other.fallback_reason()),
    }

    // predict with the text of the first chunk walks the same chain forward.
    let first_text = chunks[0].text.clone();
    let predict = store.predict(&first_text, &QueryOptions::default()).unwrap();
    match &predict {
        EpisodeResult::Chain { chunks: chain, .. } => {
            let ids: Vec<&str> = chain.iter().map(|h| h.chunk_id.as_str()).collect();
            assert_eq!(
                ids,
                vec!["lin#0000", "lin#0001", "lin#0002", "lin#0003", "lin#0004"]
            );
        }
        other => panic!("expected chain, got fallback: {:?}", other.fallback_reason()),
    }
}

#[test]
fn scenario_cross_session_continuation() {
    let dir = tempfile::tempdir().unwrap();

    let topics = ["alpha stage setup", "bravo stage checks", "charlie stage wrapup"];
    let mut a_lines = Vec::new();
    for (i, topic) in topics.iter().enumerate() {
        let pad = format!("{} ", topic).repeat(35);
        a_lines.push(user_line(
            &format!("u{}", i),
            "sess-a",
            &format!("2025-02-01T09:{:02}:00Z", i),
            &format!("handle {} {}", topic, pad),
        ));
        a_lines.push(assistant_line(
            &format!("a{}", i),
            "sess-a",
            &format!("2025-02-01T09:{:02}:30Z", i),
            &format!("handled {}", topic),
        ));
    }
    write_file(dir.path(), "a.jsonl", &a_lines);

    let pad0 = "continuing the staged work ".repeat(35);
    let pad1 = "delta deliverable wrapline ".repeat(35);
    let b_lines = vec![
        user_line(
            "u0",
            "sess-b",
            "2025-02-02T09:00:00Z",
            &format!(
                "This session is being continued from a previous conversation. {}",
                pad0
            ),
        ),
        assistant_line("a0", "sess-b", "2025-02-02T09:00:30Z", "picking up"),
        user_line(
            "u1",
            "sess-b",
            "2025-02-02T09:01:00Z",
            &format!("finish the delta stage deliverable {}", pad1),
        ),
        assistant_line("a1", "sess-b", "2025-02-02T09:01:30Z", "delta stage finished"),
    ];
    write_file(dir.path(), "b.jsonl", &b_lines);
    set_mtimes(dir.path(), &["a.jsonl", "b.jsonl"]);

    let store = store();
    let report = store
        .ingest_root(dir.path(), &IngestOptions::default())
        .unwrap();
    assert_eq!(report.cross_session_edges, 1);

    let b_chunks = store.db().session_chunks("sess-b").unwrap();
    let last_b = b_chunks.last().unwrap().text.clone();
    let recall = store.recall(&last_b, &QueryOptions::default()).unwrap();

    match &recall {
        EpisodeResult::Chain { chunks: chain, .. } => {
            let ids: Vec<&str> = chain.iter().map(|h| h.chunk_id.as_str()).collect();
            // The chain crosses the session boundary: ... a#last, b#0000, b#0001.
            assert!(ids.contains(&"sess-a#0002"));
            assert!(ids.contains(&"sess-b#0000"));
            assert!(ids.contains(&"sess-b#0001"));
            let pos_a = ids.iter().position(|&id| id == "sess-a#0002").unwrap();
            let pos_b0 = ids.iter().position(|&id| id == "sess-b#0000").unwrap();
            assert!(pos_a < pos_b0);
        }
        other => panic!("expected chain, got fallback: {:?}", other.fallback_reason()),
    }
}

#[test]
fn scenario_spawn_and_return() {
    let dir = tempfile::tempdir().unwrap();
    let pad = "looking into the allocator regression ".repeat(30);

    let main_lines = vec![
        user_line("u0", "sp", "2025-02-03T10:00:00Z", &format!("first task {}", pad)),
        assistant_line("a0", "sp", "2025-02-03T10:00:30Z", "first done"),
        user_line("u1", "sp", "2025-02-03T10:01:00Z", &format!("second task {}", pad)),
        assistant_line("a1", "sp", "2025-02-03T10:01:30Z", "second done"),
        user_line(
            "u2",
            "sp",
            "2025-02-03T10:02:00Z",
            &format!("send a researcher after the regression {}", pad),
        ),
        format!(
            r#"{{"type":"assistant","uuid":"a2","sessionId":"sp","timestamp":"2025-02-03T10:02:05Z","message":{{"content":[{{"type":"tool_use","id":"t1","name":"Task","input":{{"prompt":"find the allocator regression"}}}}]}}}}"#
        ),
        format!(
            r#"{{"type":"progress","sessionId":"sp","timestamp":"2025-02-03T10:02:06Z","toolUseId":"t1","agentId":"ab12cd34"}}"#
        ),
        format!(
            r#"{{"type":"user","uuid":"u3","sessionId":"sp","timestamp":"2025-02-03T10:05:00Z","message":{{"role":"user","content":[{{"type":"tool_result","tool_use_id":"t1","content":"regression found in pool reuse","agentId":"ab12cd34"}}]}}}}"#
        ),
        user_line(
            "u4",
            "sp",
            "2025-02-03T10:06:00Z",
            &format!("apply what the researcher found {}", pad),
        ),
        assistant_line("a3", "sp", "2025-02-03T10:06:30Z", "applied the fix"),
    ];
    write_file(dir.path(), "main.jsonl", &main_lines);

    let sub_pad = "allocator pool reuse analysis ".repeat(15);
    let sub_lines = vec![
        format!(
            r#"{{"type":"user","uuid":"x0","sessionId":"sp","timestamp":"2025-02-03T10:02:10Z","isSidechain":true,"agentId":"ab12cd34","message":{{"role":"user","content":{}}}}}"#,
            serde_json::to_string(&format!("find the allocator regression {}", sub_pad)).unwrap()
        ),
        format!(
            r#"{{"type":"assistant","uuid":"x1","sessionId":"sp","timestamp":"2025-02-03T10:03:00Z","isSidechain":true,"agentId":"ab12cd34","message":{{"content":[{{"type":"text","text":{}}}]}}}}"#,
            serde_json::to_string(&format!("suspicious pool reuse {}", sub_pad)).unwrap()
        ),
        format!(
            r#"{{"type":"user","uuid":"x2","sessionId":"sp","timestamp":"2025-02-03T10:03:30Z","isSidechain":true,"agentId":"ab12cd34","message":{{"role":"user","content":{}}}}}"#,
            serde_json::to_string(&format!("confirm the root cause {}", sub_pad)).unwrap()
        ),
        format!(
            r#"{{"type":"assistant","uuid":"x3","sessionId":"sp","timestamp":"2025-02-03T10:04:00Z","isSidechain":true,"agentId":"ab12cd34","message":{{"content":[{{"type":"text","text":{}}}]}}}}"#,
            serde_json::to_string(&format!("confirmed: pool reuse after free {}", sub_pad)).unwrap()
        ),
    ];
    write_file(dir.path(), "side.jsonl", &sub_lines);

    let store = store();
    let report = store
        .ingest_root(dir.path(), &IngestOptions::default())
        .unwrap();
    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);

    let main_chunks = store.db().session_chunks("sp").unwrap();
    let sub_chunks = store.db().session_chunks("sp:ab12cd34").unwrap();
    assert_eq!(main_chunks.len(), 4);
    assert_eq!(sub_chunks.len(), 2);

    // Brief: spawn chunk (turn 2) -> first sub chunk. Debrief: last sub
    // chunk -> return chunk (turn 3).
    assert!(
        store
            .db()
            .get_edge("sp#0002", "sp:ab12cd34#0000", engram_types::EdgeKind::Brief)
            .unwrap()
            .is_some()
    );
    assert!(
        store
            .db()
            .get_edge("sp:ab12cd34#0001", "sp#0003", engram_types::EdgeKind::Debrief)
            .unwrap()
            .is_some()
    );

    // recall from the return chunk reaches back through the fork.
    let return_text = main_chunks[3].text.clone();
    let recall = store.recall(&return_text, &QueryOptions::default()).unwrap();
    match &recall {
        EpisodeResult::Chain { chunks: chain, .. } => {
            let ids: Vec<&str> = chain.iter().map(|h| h.chunk_id.as_str()).collect();
            assert!(
                ids.iter().any(|id| *id == "sp#0002"
                    || id.starts_with("sp:ab12cd34#")),
                "chain {:?} should include the spawn chunk or a sub-agent chunk",
                ids
            );
        }
        other => panic!("expected chain, got fallback: {:?}", other.fallback_reason()),
    }
}

#[test]
fn scenario_empty_transcript() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("empty.jsonl"), "").unwrap();

    let store = store();
    let report = store
        .ingest_root(dir.path(), &IngestOptions::default())
        .unwrap();
    assert_eq!(report.sessions_ingested, 0);
    assert!(report.errors.is_empty());
    assert_eq!(store.stats().unwrap().chunks, 0);
    assert_eq!(store.stats().unwrap().edges, 0);
}

#[test]
fn scenario_single_chunk_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let lines = vec![
        user_line("u0", "solo", "2025-02-05T10:00:00Z", "a single lonely question"),
        assistant_line("a0", "solo", "2025-02-05T10:00:30Z", "a single lonely answer"),
    ];
    write_file(dir.path(), "solo.jsonl", &lines);

    let store = store();
    store
        .ingest_root(dir.path(), &IngestOptions::default())
        .unwrap();
    assert_eq!(store.stats().unwrap().chunks, 1);

    let search = store
        .search("single lonely question", &QueryOptions::default())
        .unwrap();
    assert_eq!(search.chunks.len(), 1);

    let recall = store
        .recall("single lonely question", &QueryOptions::default())
        .unwrap();
    assert_eq!(recall.mode(), "search-fallback");
    assert_eq!(
        recall.fallback_reason(),
        Some("No edges found from seed chunks")
    );
}

#[test]
fn scenario_no_hits_falls_back_with_no_chunks() {
    let store = store();
    let recall = store
        .recall("anything whatsoever", &QueryOptions::default())
        .unwrap();
    assert_eq!(recall.mode(), "search-fallback");
    assert_eq!(recall.fallback_reason(), Some("No matching chunks in memory"));
}

#[test]
fn scenario_reingest_preserves_ids_and_edges() {
    let dir = tempfile::tempdir().unwrap();
    linear_session(dir.path(), "rep", 7);

    let store = store();
    store
        .ingest_root(dir.path(), &IngestOptions::default())
        .unwrap();
    let ids_before: Vec<String> = store
        .db()
        .session_chunks("rep")
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    let edges_before = store.stats().unwrap().edges;

    let second = store
        .ingest_root(dir.path(), &IngestOptions::default())
        .unwrap();
    assert_eq!(second.sessions_skipped, 1);

    let ids_after: Vec<String> = store
        .db()
        .session_chunks("rep")
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids_before, ids_after);
    assert_eq!(store.stats().unwrap().edges, edges_before);
}

#[test]
fn scenario_delete_and_reingest_reconstructs_chunk() {
    let dir = tempfile::tempdir().unwrap();
    linear_session(dir.path(), "rec", 9);

    let store = store();
    store
        .ingest_root(dir.path(), &IngestOptions::default())
        .unwrap();
    let original = store.db().get_chunk("rec#0002").unwrap().unwrap();

    store
        .forget(&ForgetRequest {
            project: original.project.clone(),
            session_id: Some("rec".to_string()),
            ..ForgetRequest::default()
        })
        .unwrap();
    assert!(store.db().get_chunk("rec#0002").unwrap().is_none());

    store
        .ingest_root(dir.path(), &IngestOptions::default())
        .unwrap();
    let rebuilt = store.db().get_chunk("rec#0002").unwrap().unwrap();
    assert_eq!(rebuilt.id, original.id);
    assert_eq!(rebuilt.text, original.text);
    assert_eq!(rebuilt.turn_indices, original.turn_indices);
}

#[test]
fn scenario_reference_clock_dominates_chunks() {
    let dir = tempfile::tempdir().unwrap();
    linear_session(dir.path(), "dom", 11);

    let store = store();
    store
        .ingest_root(dir.path(), &IngestOptions::default())
        .unwrap();

    let chunks = store.db().session_chunks("dom").unwrap();
    let project = chunks[0].project.clone();
    let reference = store.db().project_reference_clock(&project).unwrap();
    for chunk in &chunks {
        assert!(
            reference.dominates(&chunk.clock),
            "reference clock must dominate chunk {}",
            chunk.id
        );
    }
}
