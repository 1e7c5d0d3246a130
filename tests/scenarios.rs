//! End-to-end scenarios through the assembler and output stage.

use std::sync::Arc;

use muxframe::{
    ConnectionId,
    ConnectionState,
    FrameAssembler,
    FramerConfig,
    FramerErrorCode,
    FramingState,
    InputChunk,
    OutputRecord,
    OutputStage,
    ProtocolRegistry,
    SigLenSpec,
    word_chunks,
};

fn assembler() -> FrameAssembler {
    let mut registry = ProtocolRegistry::new();
    registry
        .register(Arc::new(SigLenSpec::new()))
        .expect("register reference spec");
    FrameAssembler::new(FramerConfig::default(), registry).expect("non-empty registry")
}

fn header(length: u16) -> Vec<u8> {
    let len = length.to_be_bytes();
    vec![SigLenSpec::DEFAULT_MAGIC[0], SigLenSpec::DEFAULT_MAGIC[1], len[0], len[1]]
}

fn feed_through_output(
    asm: &mut FrameAssembler,
    output: &mut OutputStage,
    id: ConnectionId,
    stream: &[u8],
) {
    for chunk in word_chunks(id, stream) {
        assert!(!output.is_programmable_full(), "producer must stop at backpressure");
        asm.process_into(&chunk, output).expect("within depth");
    }
}

fn frame_payloads(records: &[OutputRecord]) -> Vec<Vec<u8>> {
    let mut frames: Vec<Vec<u8>> = Vec::new();
    for record in records {
        if record.start_of_frame {
            frames.push(Vec::new());
        }
        if let Some(frame) = frames.last_mut() {
            frame.extend_from_slice(record.payload());
        }
    }
    frames
}

// Reference scenario: 4-byte header declaring 10 payload bytes, one stray
// byte before the next header.
#[test]
fn ten_byte_message_with_stray_trailing_byte() {
    let mut asm = assembler();
    let mut output = OutputStage::new(asm.config());
    let id = ConnectionId::new(1);

    let payload: Vec<u8> = (1..=10).collect();
    let mut stream = header(10);
    stream.extend_from_slice(&payload);
    stream.push(0x42);

    feed_through_output(&mut asm, &mut output, id, &stream);
    let records = output.drain();

    let frames = frame_payloads(&records);
    assert_eq!(frames, vec![payload]);
    assert!(records.iter().all(|r| r.error_code == FramerErrorCode::NoError));
    assert_eq!(
        records.iter().filter(|r| r.end_of_frame).count(),
        1,
        "exactly one frame completed"
    );

    // The stray byte opened a new header staging phase.
    let record = asm.records().record(id).expect("record exists");
    assert_eq!(record.header_len(), 1);
}

// Reference scenario: declared length 20000 exceeds the 16384 cap.
#[test]
fn oversized_declaration_drains_with_body_length_too_big() {
    let mut asm = assembler();
    let mut output = OutputStage::new(asm.config());
    let id = ConnectionId::new(2);

    let mut stream = header(20_000);
    stream.extend_from_slice(&[0x55; 64]);

    feed_through_output(&mut asm, &mut output, id, &stream);
    let records = output.drain();

    assert!(!records.is_empty());
    assert!(
        records
            .iter()
            .all(|r| r.error_code == FramerErrorCode::BodyLengthTooBig)
    );
    assert!(records.iter().all(|r| r.payload_len() == 0));

    // Further bytes stay discarded until an external reset.
    feed_through_output(&mut asm, &mut output, id, &[0x66; 24]);
    assert!(
        output
            .drain()
            .iter()
            .all(|r| r.error_code == FramerErrorCode::BodyLengthTooBig)
    );
}

// Reference scenario: external shutdown mid-payload, 5 of 10 bytes in.
#[test]
fn shutdown_mid_payload_discards_partial_frame() {
    let mut asm = assembler();
    let mut output = OutputStage::new(asm.config());
    let id = ConnectionId::new(3);

    let mut stream = header(10);
    stream.extend_from_slice(&[0x77; 5]);
    feed_through_output(&mut asm, &mut output, id, &stream);

    let drain = asm.shutdown(id);
    output.push(drain).expect("within depth");

    let records = output.drain();
    assert!(records.iter().all(|r| r.payload_len() == 0));
    let last = records.last().expect("drain record present");
    assert_eq!(last.error_code, FramerErrorCode::ShutdownDrain);
    assert_eq!(last.framing_state, FramingState::ErrorDrain);
}

#[test]
fn interleaved_connections_preserve_per_connection_order() {
    let mut asm = assembler();
    let left = ConnectionId::new(10);
    let right = ConnectionId::new(11);

    let left_payload: Vec<u8> = (0..20).collect();
    let right_payload: Vec<u8> = (100..112).collect();
    let mut left_stream = header(20);
    left_stream.extend_from_slice(&left_payload);
    let mut right_stream = header(12);
    right_stream.extend_from_slice(&right_payload);

    let left_chunks = word_chunks(left, &left_stream[..]);
    let right_chunks = word_chunks(right, &right_stream[..]);

    // Alternate deliveries between the two connections.
    let mut records = Vec::new();
    let mut l = left_chunks.into_iter();
    let mut r = right_chunks.into_iter();
    loop {
        let mut progressed = false;
        if let Some(chunk) = l.next() {
            records.extend(asm.process_chunk(&chunk));
            progressed = true;
        }
        if let Some(chunk) = r.next() {
            records.extend(asm.process_chunk(&chunk));
            progressed = true;
        }
        if !progressed {
            break;
        }
    }

    let left_records: Vec<OutputRecord> = records
        .iter()
        .copied()
        .filter(|record| record.connection_id == left)
        .collect();
    let right_records: Vec<OutputRecord> = records
        .iter()
        .copied()
        .filter(|record| record.connection_id == right)
        .collect();

    assert_eq!(frame_payloads(&left_records), vec![left_payload]);
    assert_eq!(frame_payloads(&right_records), vec![right_payload]);
}

#[test]
fn connection_events_pass_through_with_transport_state() {
    let mut asm = assembler();
    let mut output = OutputStage::new(asm.config());
    let id = ConnectionId::new(20);

    let open = InputChunk::connection_event(id, ConnectionState::Established);
    asm.process_into(&open, &mut output).expect("within depth");

    feed_through_output(&mut asm, &mut output, id, &header(0));

    let records = output.drain();
    assert_eq!(records.len(), 2);
    assert!(records[0].is_pass_through);
    assert_eq!(records[0].connection_state, ConnectionState::Established);
    // Framed records keep reporting the last observed transport state.
    assert!(records[1].connection_state_valid);
    assert_eq!(records[1].connection_state, ConnectionState::Established);
    assert!(!records[1].is_pass_through);
}
