//! End-to-end behaviour of the chunked pipeline.

use flatbatch::testing::*;
use flatbatch::{
    CancellationToken, ChunkedPipeline, ColumnMapMapper, ErrorKind, FieldSet, FnMapper, Message,
    MessageMapper, PipelineConfig, RecordMapper, RowOutcome, RunCoordinator, RunStatus, Sink,
    TokenizerMode,
};
use std::collections::HashMap;
use std::sync::Arc;

fn coordinator<M, S>(config: PipelineConfig, mapper: M, sink: S) -> RunCoordinator<M, S>
where
    M: RecordMapper + 'static,
    S: Sink<M::Record> + 'static,
{
    RunCoordinator::new(ChunkedPipeline::new(config, mapper, sink).unwrap())
}

fn recording(config: PipelineConfig) -> (RunCoordinator<MessageMapper, Arc<RecordingSink<Message>>>, Arc<RecordingSink<Message>>) {
    let sink = Arc::new(RecordingSink::new());
    (coordinator(config, MessageMapper, Arc::clone(&sink)), sink)
}

#[test]
fn test_three_rows_in_chunks_of_two() {
    let input = TempInput::new(SAMPLE_INPUT).unwrap();
    let (runs, sink) = recording(PipelineConfig::default().chunk_size(2));

    let result = runs.execute(input.path()).unwrap();

    assert_run_completed(&result);
    assert_counts(&result, 3, 0);
    let chunks = sink.chunks();
    assert_chunk_sizes(&chunks, &[2, 1]);
    assert_sequential(&chunks);
    assert_eq!(
        chunks[0].records,
        vec![Message::new("A", "1"), Message::new("B", "2")]
    );
    assert_eq!(chunks[1].records, vec![Message::new("C", "3")]);
    assert_eq!(result.write_count, 3);
    assert_eq!(result.commit_count, 2);
    assert_eq!(result.fail_count, 0);
}

#[test]
fn test_chunk_count_and_order_for_valid_inputs() {
    for n in 0..=7 {
        for chunk_size in [1, 2, 3, 500] {
            let input = TempInput::new(&type_value_rows(n)).unwrap();
            let (runs, sink) = recording(PipelineConfig::default().chunk_size(chunk_size));

            let result = runs.execute(input.path()).unwrap();

            assert_run_completed(&result);
            assert_counts(&result, n as u64, 0);
            assert_eq!(sink.delivery_count(), n.div_ceil(chunk_size), "n={n} chunk={chunk_size}");
            assert_records_equal(&sink.records(), &expected_messages(n));
        }
    }
}

#[test]
fn test_501_rows_deliver_full_and_partial_chunk() {
    let input = TempInput::new(&type_value_rows(501)).unwrap();
    let (runs, sink) = recording(PipelineConfig::default());

    let result = runs.execute(input.path()).unwrap();

    assert_run_completed(&result);
    assert_chunk_sizes(&sink.chunks(), &[500, 1]);
    assert_eq!(result.read_count, 501);
}

#[test]
fn test_header_only_completes_without_deliveries() {
    let input = TempInput::new("type,value\n").unwrap();
    let (runs, sink) = recording(PipelineConfig::default());

    let result = runs.execute(input.path()).unwrap();

    assert_run_completed(&result);
    assert_counts(&result, 0, 0);
    assert_eq!(sink.delivery_count(), 0);
}

#[test]
fn test_empty_input_fails() {
    for contents in ["", "\n", "\"\"\n"] {
        let input = TempInput::new(contents).unwrap();
        let (runs, sink) = recording(PipelineConfig::default());

        let result = runs.execute(input.path()).unwrap();

        assert_run_failed(&result, ErrorKind::EmptyInput);
        assert_eq!(sink.delivery_count(), 0);
    }
}

#[test]
fn test_missing_file_is_resource_unavailable() {
    let dir = TempDirPath::new().unwrap();
    let (runs, _sink) = recording(PipelineConfig::default());

    let result = runs.execute(dir.file_path("absent.csv")).unwrap();

    assert_run_failed(&result, ErrorKind::ResourceUnavailable);
    assert_counts(&result, 0, 0);
    assert!(result.error.unwrap().contains("absent.csv"));
}

#[test]
fn test_malformed_row_skipped_when_not_strict() {
    let input = TempInput::new(&rows_with_malformed(10, 4)).unwrap();
    let (runs, sink) = recording(PipelineConfig::default().strict(false).chunk_size(3));

    let result = runs.execute(input.path()).unwrap();

    assert_run_completed(&result);
    assert_counts(&result, 10, 1);
    assert_records_equal(&sink.records(), &expected_messages(10));
}

#[test]
fn test_malformed_row_fatal_when_strict() {
    let input = TempInput::new(&rows_with_malformed(10, 5)).unwrap();
    let (runs, sink) = recording(PipelineConfig::default().chunk_size(2));

    let result = runs.execute(input.path()).unwrap();

    assert_run_failed(&result, ErrorKind::MalformedRow);
    assert_chunk_sizes(&sink.chunks(), &[2, 2]);
    assert_eq!(result.read_count, 5);
    assert_eq!(result.write_count, 4);
    assert_eq!(result.fail_count, 1);
    assert!(result.error.unwrap().contains("line 7"));
}

#[test]
fn test_skip_limit_exceeded_fails_run() {
    let input = TempInput::new("type,value\nA,1\nX\nY\nZ\nB,2\n").unwrap();
    let config = PipelineConfig::default().strict(false).skip_limit(Some(2));
    let (runs, _sink) = recording(config);

    let result = runs.execute(input.path()).unwrap();

    assert_run_failed(&result, ErrorKind::SkipLimitExceeded);
    assert_eq!(result.skip_count, 3);
    assert_eq!(result.read_count, 1);
}

#[test]
fn test_skip_limit_not_reached_completes() {
    let input = TempInput::new("type,value\nA,1\nX\nY\nB,2\n").unwrap();
    let config = PipelineConfig::default().strict(false).skip_limit(Some(2));
    let (runs, _sink) = recording(config);

    let result = runs.execute(input.path()).unwrap();

    assert_run_completed(&result);
    assert_counts(&result, 2, 2);
}

#[test]
fn test_sink_failure_keeps_earlier_chunks() {
    let input = TempInput::new(&type_value_rows(5)).unwrap();
    let sink = Arc::new(FailingSink::on_delivery(2));
    let runs = coordinator(PipelineConfig::default().chunk_size(2), MessageMapper, Arc::clone(&sink));

    let result = runs.execute(input.path()).unwrap();

    assert_run_failed(&result, ErrorKind::Sink);
    assert_chunk_sizes(&sink.accepted().chunks(), &[2]);
    assert_eq!(result.write_count, 2);
    assert_eq!(result.fail_count, 2);
    assert_eq!(result.read_count, 4);
    assert_eq!(sink.attempts(), 2);
}

#[test]
fn test_lines_to_skip_and_comments() {
    let input =
        TempInput::new("export v2\ngenerated today\n# columns follow\ntype,value\nA,1\n# note\nB,2\n")
            .unwrap();
    let (runs, sink) = recording(PipelineConfig::default().lines_to_skip(2));

    let result = runs.execute(input.path()).unwrap();

    assert_run_completed(&result);
    assert_records_equal(&sink.records(), &expected_messages(2));
}

#[test]
fn test_custom_comment_prefixes() {
    let input = TempInput::new("type,value\n--A,9\nA,1\n#B,2\n").unwrap();
    let (runs, sink) = recording(PipelineConfig::default().comment_prefixes(["--"]));

    runs.execute(input.path()).unwrap();

    assert_eq!(
        sink.records(),
        vec![Message::new("A", "1"), Message::new("#B", "2")]
    );
}

#[test]
fn test_max_item_count_caps_rows() {
    let input = TempInput::new(&type_value_rows(10)).unwrap();
    let (runs, sink) = recording(PipelineConfig::default().max_item_count(Some(4)));

    let result = runs.execute(input.path()).unwrap();

    assert_run_completed(&result);
    assert_counts(&result, 4, 0);
    assert_records_equal(&sink.records(), &expected_messages(4));
}

#[test]
fn test_lenient_tokenizer_pads_and_truncates() {
    let input = TempInput::new("type,value\nA\nB,2,extra\n").unwrap();
    let config = PipelineConfig::default().tokenizer_mode(TokenizerMode::Lenient);
    let (runs, sink) = recording(config);

    let result = runs.execute(input.path()).unwrap();

    assert_run_completed(&result);
    assert_eq!(
        sink.records(),
        vec![Message::new("A", ""), Message::new("B", "2")]
    );
}

#[test]
fn test_blank_line_is_malformed_for_multi_column_header() {
    let input = TempInput::new("type,value\nA,1\n\nB,2\n").unwrap();
    let (runs, _sink) = recording(PipelineConfig::default().strict(false));

    let result = runs.execute(input.path()).unwrap();

    assert_run_completed(&result);
    assert_counts(&result, 2, 1);
}

#[test]
fn test_blank_line_matches_single_column_header() {
    let input = TempInput::new("value\n1\n\n").unwrap();
    let sink = Arc::new(RecordingSink::<HashMap<String, String>>::new());
    let runs = coordinator(PipelineConfig::default(), ColumnMapMapper, Arc::clone(&sink));

    let result = runs.execute(input.path()).unwrap();

    assert_run_completed(&result);
    let values: Vec<String> = sink.records().into_iter().map(|m| m["value"].clone()).collect();
    assert_eq!(values, vec!["1".to_string(), String::new()]);
}

#[test]
fn test_quoted_header_and_fields() {
    let input = TempInput::new("\"type\",\"value\"\nA,\"1,5\"\n\"B\",\"say \"\"hi\"\"\"\n").unwrap();
    let (runs, sink) = recording(PipelineConfig::default());

    runs.execute(input.path()).unwrap();

    assert_eq!(
        sink.records(),
        vec![Message::new("A", "1,5"), Message::new("B", "say \"hi\"")]
    );
}

#[test]
fn test_custom_delimiter() {
    let input = TempInput::new("value;type\n1;A\n2;B\n").unwrap();
    let (runs, sink) = recording(PipelineConfig::default().delimiter(";"));

    runs.execute(input.path()).unwrap();

    assert_records_equal(&sink.records(), &expected_messages(2));
}

#[test]
fn test_mapping_errors_follow_strict_flag() {
    let mapper = || {
        FnMapper::new(|fields: &FieldSet| {
            fields
                .get_or_empty("value")
                .parse::<i64>()
                .map_err(|e| fields.mapping_error(format!("value: {e}")))
        })
    };
    let input = TempInput::new("type,value\nA,1\nB,two\nC,3\n").unwrap();

    let lenient_sink = Arc::new(RecordingSink::<i64>::new());
    let lenient = coordinator(
        PipelineConfig::default().strict(false),
        mapper(),
        Arc::clone(&lenient_sink),
    );
    let result = lenient.execute(input.path()).unwrap();
    assert_run_completed(&result);
    assert_counts(&result, 2, 1);
    assert_eq!(lenient_sink.records(), vec![1, 3]);

    let strict_sink = Arc::new(RecordingSink::<i64>::new());
    let strict = coordinator(PipelineConfig::default(), mapper(), Arc::clone(&strict_sink));
    let result = strict.execute(input.path()).unwrap();
    assert_run_failed(&result, ErrorKind::Mapping);
    assert_eq!(strict_sink.delivery_count(), 0);
}

#[test]
fn test_invalid_bytes_skipped_as_decode_errors() {
    let input = TempInput::from_bytes(b"type,value\nA,1\nB,\xFF\nC,3\n", "csv").unwrap();
    let (runs, sink) = recording(PipelineConfig::default().strict(false));

    let result = runs.execute(input.path()).unwrap();

    assert_run_completed(&result);
    assert_counts(&result, 2, 1);
    assert_eq!(
        sink.records(),
        vec![Message::new("A", "1"), Message::new("C", "3")]
    );
}

#[test]
fn test_latin1_input_with_crlf() {
    let input = TempInput::from_bytes(b"type,value\r\ncaf\xE9,1\r\n", "csv").unwrap();
    let (runs, sink) = recording(PipelineConfig::default().encoding("latin1"));

    runs.execute(input.path()).unwrap();

    assert_eq!(sink.records(), vec![Message::new("café", "1")]);
}

#[cfg(feature = "compression-gzip")]
#[test]
fn test_gzip_input() {
    let input = TempInput::gzip(&type_value_rows(7)).unwrap();
    let (runs, sink) = recording(PipelineConfig::default().chunk_size(3));

    let result = runs.execute(input.path()).unwrap();

    assert_run_completed(&result);
    assert_chunk_sizes(&sink.chunks(), &[3, 3, 1]);
    assert_records_equal(&sink.records(), &expected_messages(7));
}

#[test]
fn test_cancelled_before_start() {
    let input = TempInput::new(&type_value_rows(3)).unwrap();
    let (runs, sink) = recording(PipelineConfig::default());
    let token = CancellationToken::new();
    token.cancel();

    let result = runs.execute_with(input.path(), &token).unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.read_count, 0);
    assert!(result.error.is_none());
    assert!(result.error_kind.is_none());
    assert_eq!(sink.delivery_count(), 0);
}

#[test]
fn test_cancel_from_sink_stops_after_chunk() {
    let input = TempInput::new(&type_value_rows(10)).unwrap();
    let token = CancellationToken::new();
    let sink_token = token.clone();
    let sink = flatbatch::FnSink::new(move |_chunk: flatbatch::Chunk<Message>| {
        sink_token.cancel();
        Ok::<(), anyhow::Error>(())
    });
    let runs = coordinator(PipelineConfig::default().chunk_size(3), MessageMapper, sink);

    let result = runs.execute_with(input.path(), &token).unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.read_count, 3);
    assert_eq!(result.commit_count, 1);
}

/// Maps like [`MessageMapper`] and cancels `token` when it maps `value`.
fn cancel_on_value(
    token: &CancellationToken,
    value: &'static str,
) -> impl RecordMapper<Record = Message> + 'static {
    let token = token.clone();
    FnMapper::new(move |fields: &FieldSet| {
        if fields.get_or_empty("value") == value {
            token.cancel();
        }
        MessageMapper.map(fields)
    })
}

#[test]
fn test_cancel_while_streaming_discards_partial_chunk() {
    for flush in [true, false] {
        let input = TempInput::new(&type_value_rows(10)).unwrap();
        let token = CancellationToken::new();
        let sink = Arc::new(RecordingSink::<Message>::new());
        let config = PipelineConfig::default().chunk_size(3).flush_on_cancel(flush);
        let runs = coordinator(config, cancel_on_value(&token, "5"), Arc::clone(&sink));

        let cancelled = runs.execute_with(input.path(), &token).unwrap();

        assert_eq!(cancelled.status, RunStatus::Cancelled, "flush_on_cancel={flush}");
        assert_chunk_sizes(&sink.chunks(), &[3]);
        assert_eq!(cancelled.read_count, 5);
        assert_eq!(cancelled.write_count, 3);
        assert_eq!(cancelled.commit_count, 1);

        // Rows 4 and 5 were never committed, so the rerun reads them again.
        let resumed = runs.execute(input.path()).unwrap();
        assert_run_completed(&resumed);
        assert_eq!(resumed.resumed_from, 3);
        assert_chunk_sizes(&sink.chunks(), &[3, 3, 3, 1]);
        assert_records_equal(&sink.records(), &expected_messages(10));
    }
}

#[test]
fn test_cancel_while_draining_flushes_by_default() {
    let input = TempInput::new(&type_value_rows(5)).unwrap();
    let token = CancellationToken::new();
    let sink = Arc::new(RecordingSink::<Message>::new());
    let runs = coordinator(
        PipelineConfig::default().chunk_size(3),
        cancel_on_value(&token, "5"),
        Arc::clone(&sink),
    );

    let cancelled = runs.execute_with(input.path(), &token).unwrap();

    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert_chunk_sizes(&sink.chunks(), &[3, 2]);
    assert_eq!(cancelled.write_count, 5);

    let resumed = runs.execute(input.path()).unwrap();
    assert_run_completed(&resumed);
    assert_eq!(resumed.resumed_from, 5);
    assert_eq!(resumed.read_count, 0);
    assert_eq!(sink.delivery_count(), 2);
}

#[test]
fn test_cancel_while_draining_can_discard() {
    let input = TempInput::new(&type_value_rows(5)).unwrap();
    let token = CancellationToken::new();
    let sink = Arc::new(RecordingSink::<Message>::new());
    let runs = coordinator(
        PipelineConfig::default().chunk_size(3).flush_on_cancel(false),
        cancel_on_value(&token, "5"),
        Arc::clone(&sink),
    );

    let cancelled = runs.execute_with(input.path(), &token).unwrap();

    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert_chunk_sizes(&sink.chunks(), &[3]);
    assert_eq!(cancelled.read_count, 5);
    assert_eq!(cancelled.write_count, 3);

    let resumed = runs.execute(input.path()).unwrap();
    assert_run_completed(&resumed);
    assert_eq!(resumed.resumed_from, 3);
    assert_records_equal(&sink.records(), &expected_messages(5));
}

#[test]
fn test_record_stream_is_lazy_and_tagged() {
    let input = TempInput::new("type,value\nA,1\nbad\nB,2\n").unwrap();
    let pipeline = ChunkedPipeline::new(
        PipelineConfig::default().strict(false),
        MessageMapper,
        RecordingSink::<Message>::new(),
    )
    .unwrap();

    let mut stream = pipeline.open(input.path(), 0).unwrap();
    assert_eq!(stream.header().names(), ["type", "value"]);
    assert_eq!(stream.consumed(), 0);

    assert!(matches!(stream.next(), Some(RowOutcome::Record { line: 2, .. })));
    assert_eq!(stream.consumed(), 1);
    match stream.next() {
        Some(RowOutcome::Skipped(err)) => assert_eq!(err.line(), Some(3)),
        other => panic!("expected skipped row, got {other:?}"),
    }
    assert!(matches!(stream.next(), Some(RowOutcome::Record { line: 4, .. })));
    assert!(stream.next().is_none());
    assert_eq!(stream.consumed(), 3);
}

#[test]
fn test_record_stream_stops_after_fatal() {
    let input = TempInput::new("type,value\nbad\nA,1\n").unwrap();
    let pipeline =
        ChunkedPipeline::new(PipelineConfig::default(), MessageMapper, RecordingSink::<Message>::new())
            .unwrap();

    let mut stream = pipeline.open(input.path(), 0).unwrap();

    assert!(matches!(stream.next(), Some(RowOutcome::Fatal(_))));
    assert!(stream.next().is_none());
}

#[test]
fn test_open_skips_restart_offset() {
    let input = TempInput::new(&type_value_rows(5)).unwrap();
    let pipeline =
        ChunkedPipeline::new(PipelineConfig::default(), MessageMapper, RecordingSink::<Message>::new())
            .unwrap();

    let records: Vec<Message> = pipeline
        .open(input.path(), 3)
        .unwrap()
        .filter_map(|outcome| match outcome {
            RowOutcome::Record { record, .. } => Some(record),
            _ => None,
        })
        .collect();

    assert_eq!(records, expected_messages(5)[3..].to_vec());
}

#[test]
fn test_invalid_config_rejected_at_construction() {
    let err = ChunkedPipeline::new(
        PipelineConfig::default().chunk_size(0),
        MessageMapper,
        RecordingSink::<Message>::new(),
    )
    .err()
    .unwrap();
    assert_eq!(err.kind(), ErrorKind::Config);
}
