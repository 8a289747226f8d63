//! Property tests: arbitrary network read boundaries and response modes
//! must not change the final cell.

use crate::integration::support::{chunk, completion, done, frame, gen_config, stop};
use gentable::aggregate::CellAggregator;
use gentable::protocol::{classify, FrameDecoder};
use gentable::session::{ReplayBackend, SessionConfig, SessionManager, SessionRequest};
use gentable::table::{Cell, Column, Row, TableRegistry, TableStore};
use gentable::types::{CellAddress, SessionId};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn content_pieces() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-zA-Z0-9 ,.!?\"\\\\\n\u{e9}\u{4e16}\u{1f600}]{0,8}", 1..12)
}

fn stream_body(pieces: &[String]) -> String {
    let mut body: String = pieces.iter().map(|p| chunk(p)).collect();
    body.push_str(&stop());
    body.push_str(&done());
    body
}

/// Split `bytes` at the given (cycled) read sizes.
fn split_reads<'a>(bytes: &'a [u8], sizes: &[usize]) -> Vec<&'a [u8]> {
    let mut reads = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while start < bytes.len() {
        let end = (start + sizes[i % sizes.len()]).min(bytes.len());
        reads.push(&bytes[start..end]);
        start = end;
        i += 1;
    }
    reads
}

fn decode_into_cell(reads: &[&[u8]]) -> String {
    let store = Arc::new(TableStore::new("t", vec![Column::output("a", gen_config())]));
    store.add_row(Row::new("r1")).unwrap();
    let address = CellAddress::new("r1", "a");
    store.begin_streaming(SessionId(1), &[address.clone()]).unwrap();
    let aggregator = CellAggregator::new(SessionId(1), Arc::clone(&store), vec![address.clone()]);

    let mut decoder = FrameDecoder::new();
    for read in reads {
        for frame in decoder.feed(read) {
            aggregator.ingest(&classify(&frame));
        }
    }
    for frame in decoder.finish() {
        aggregator.ingest(&classify(&frame));
    }
    store.cell(&address).map(|c| c.value).unwrap_or_default()
}

fn references(query: &str) -> serde_json::Value {
    json!({
        "object": "chat.references",
        "chunks": [{ "text": "source", "title": "Doc", "page": 3, "chunk_id": "c1" }],
        "search_query": query,
        "finish_reason": null
    })
}

/// References, one reasoning increment, then the answer pieces.
fn grounded_stream_body(pieces: &[String], reasoning: &str) -> String {
    let mut body = frame(&references("q"));
    body.push_str(&frame(&json!({
        "object": "chat.completion.chunk",
        "choices": [{
            "index": 0,
            "delta": { "reasoning_content": reasoning },
            "finish_reason": null
        }]
    })));
    body.push_str(&stream_body(pieces));
    body
}

fn grounded_completion(answer: &str, reasoning: &str) -> String {
    let mut body = completion(answer);
    body["choices"][0]["message"]["reasoning_content"] = json!(reasoning);
    body["references"] = references("q");
    body.to_string()
}

fn run_session(body: String, chunk_size: usize, streaming: bool) -> Option<Cell> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async move {
        let registry = Arc::new(TableRegistry::new());
        let store = registry.init("t", vec![Column::input("q"), Column::output("a", gen_config())]);
        store.add_row(Row::new("r1")).unwrap();
        let manager = SessionManager::new(
            Arc::clone(&registry),
            Arc::new(ReplayBackend::new(body, chunk_size)),
            SessionConfig::default(),
        );
        let address = CellAddress::new("r1", "a");
        let handle = manager
            .start_session(SessionRequest::new("t", vec![address.clone()], streaming))
            .unwrap();
        let report = handle.wait().await;
        assert!(report.is_success(), "session failed: {:?}", report.state);
        store.cell(&address)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn rechunking_does_not_change_the_cell(
        pieces in content_pieces(),
        sizes in prop::collection::vec(1usize..24, 1..16),
    ) {
        let body = stream_body(&pieces);
        let expected = pieces.concat();

        let whole = decode_into_cell(&[body.as_bytes()]);
        let split = decode_into_cell(&split_reads(body.as_bytes(), &sizes));
        prop_assert_eq!(&whole, &expected);
        prop_assert_eq!(&split, &expected);
    }

    #[test]
    fn crlf_framing_matches_lf(pieces in content_pieces(), size in 1usize..24) {
        let body = stream_body(&pieces).replace("\n\n", "\r\n\r\n");
        let reads = split_reads(body.as_bytes(), &[size]);
        prop_assert_eq!(decode_into_cell(&reads), pieces.concat());
    }

    #[test]
    fn streaming_and_non_streaming_agree(
        pieces in content_pieces(),
        chunk_size in 1usize..32,
    ) {
        let streamed = run_session(stream_body(&pieces), chunk_size, true);
        let whole = run_session(completion(&pieces.concat()).to_string(), chunk_size, false);
        let joined = pieces.concat();
        prop_assert_eq!(streamed.as_ref().map(|c| c.value.as_str()), Some(joined.as_str()));
        prop_assert_eq!(streamed, whole);
    }

    #[test]
    fn grounded_streaming_and_non_streaming_agree(
        pieces in content_pieces(),
        reasoning in "[a-z ]{1,8}",
        chunk_size in 1usize..32,
    ) {
        let joined = pieces.concat();
        let streamed = run_session(grounded_stream_body(&pieces, &reasoning), chunk_size, true);
        let whole = run_session(grounded_completion(&joined, &reasoning), chunk_size, false);
        let cell = streamed.clone().unwrap_or_default();
        prop_assert_eq!(cell.references.len(), 1);
        prop_assert_eq!(cell.reasoning_content.as_deref(), Some(reasoning.as_str()));
        prop_assert!(cell.error.is_none());
        prop_assert_eq!(streamed, whole);
    }
}
