//! Round-trip property: framing a stream of valid messages reproduces the
//! original payloads, in order, with start/end flags bracketing each message
//! exactly once.

use std::sync::Arc;

use muxframe::{
    ConnectionId,
    FrameAssembler,
    FramerConfig,
    FramerErrorCode,
    InputChunk,
    OutputRecord,
    ProtocolRegistry,
    SigLenSpec,
};
use proptest::prelude::*;

fn assembler() -> FrameAssembler {
    let mut registry = ProtocolRegistry::new();
    registry
        .register(Arc::new(SigLenSpec::new()))
        .expect("register reference spec");
    FrameAssembler::new(FramerConfig::default(), registry).expect("non-empty registry")
}

fn encode_stream(messages: &[Vec<u8>]) -> Vec<u8> {
    let mut stream = Vec::new();
    for message in messages {
        let len = (message.len() as u16).to_be_bytes();
        stream.extend_from_slice(&SigLenSpec::DEFAULT_MAGIC);
        stream.extend_from_slice(&len);
        stream.extend_from_slice(message);
    }
    stream
}

fn feed_in_chunks(
    asm: &mut FrameAssembler,
    id: ConnectionId,
    stream: &[u8],
    chunk_sizes: &[usize],
) -> Vec<OutputRecord> {
    let mut records = Vec::new();
    let mut offset = 0;
    let mut turn = 0;
    while offset < stream.len() {
        let take = chunk_sizes[turn % chunk_sizes.len()].min(stream.len() - offset);
        turn += 1;
        let chunk = InputChunk::data(id, &stream[offset..offset + take]).expect("word-sized");
        records.extend(asm.process_chunk(&chunk));
        offset += take;
    }
    records
}

proptest! {
    #[test]
    fn framing_reproduces_payloads_in_order(
        messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 1..8),
        chunk_sizes in prop::collection::vec(1usize..=8, 1..32),
    ) {
        let mut asm = assembler();
        let id = ConnectionId::new(1);
        let stream = encode_stream(&messages);
        let records = feed_in_chunks(&mut asm, id, &stream, &chunk_sizes);

        // Each message bracketed exactly once.
        let starts = records.iter().filter(|r| r.start_of_frame).count();
        let ends = records.iter().filter(|r| r.end_of_frame).count();
        prop_assert_eq!(starts, messages.len());
        prop_assert_eq!(ends, messages.len());

        // Concatenating per-frame payload bytes reproduces the messages.
        let mut frames: Vec<Vec<u8>> = Vec::new();
        for record in &records {
            prop_assert_eq!(record.error_code, FramerErrorCode::NoError);
            if record.start_of_frame {
                frames.push(Vec::new());
            }
            let frame = frames.last_mut().expect("start precedes payload");
            frame.extend_from_slice(record.payload());
        }
        prop_assert_eq!(frames, messages);
    }

    #[test]
    fn level_tracks_outstanding_bytes_and_never_goes_negative(
        payload_len in 0usize..500,
        chunk_sizes in prop::collection::vec(1usize..=8, 1..16),
    ) {
        let mut asm = assembler();
        let id = ConnectionId::new(2);
        let messages = vec![vec![0xA1; payload_len]];
        let stream = encode_stream(&messages);
        let records = feed_in_chunks(&mut asm, id, &stream, &chunk_sizes);

        let mut remaining = payload_len;
        for record in &records {
            remaining -= record.payload_len();
            prop_assert!(record.level >= 0);
            prop_assert_eq!(record.level as usize, remaining);
        }
        prop_assert_eq!(remaining, 0);
    }
}
