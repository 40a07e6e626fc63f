//! Property-based tests using proptest
//!
//! Envelope payload stack behaviour, header/length consistency, codec framing
//! over arbitrary chunking, and queue ordering.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use duplex_net::core::codec::EnvelopeCodec;
use duplex_net::core::envelope::{Envelope, StandardKind, HEADER_SIZE};
use duplex_net::core::queue::TsQueue;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Clone)]
enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F64(f64),
    Pair([i32; 2]),
}

fn any_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<u8>().prop_map(Value::U8),
        any::<u16>().prop_map(Value::U16),
        any::<u32>().prop_map(Value::U32),
        any::<u64>().prop_map(Value::U64),
        any::<f64>().prop_map(Value::F64),
        any::<[i32; 2]>().prop_map(Value::Pair),
    ]
}

fn push(env: &mut Envelope<StandardKind>, value: &Value) {
    match value {
        Value::U8(v) => env.append(v),
        Value::U16(v) => env.append(v),
        Value::U32(v) => env.append(v),
        Value::U64(v) => env.append(v),
        Value::F64(v) => env.append(v),
        Value::Pair(v) => env.append(v),
    };
}

fn pop_matches(env: &mut Envelope<StandardKind>, expected: &Value) -> bool {
    match expected {
        Value::U8(v) => env.extract::<u8>().unwrap() == *v,
        Value::U16(v) => env.extract::<u16>().unwrap() == *v,
        Value::U32(v) => env.extract::<u32>().unwrap() == *v,
        Value::U64(v) => env.extract::<u64>().unwrap() == *v,
        // compare bits so NaN payloads count as equal
        Value::F64(v) => env.extract::<f64>().unwrap().to_bits() == v.to_bits(),
        Value::Pair(v) => env.extract::<[i32; 2]>().unwrap() == *v,
    }
}

// Property: values come back out in reverse order of insertion
proptest! {
    #[test]
    fn prop_extract_reverses_append(values in prop::collection::vec(any_value(), 0..64)) {
        let mut env = Envelope::new(StandardKind::ServerMessage);
        for v in &values {
            push(&mut env, v);
        }

        for v in values.iter().rev() {
            prop_assert!(pop_matches(&mut env, v));
        }
        prop_assert!(env.is_empty());
    }
}

// Property: the header length tracks the payload through any interleaving
proptest! {
    #[test]
    fn prop_length_matches_payload(ops in prop::collection::vec(any::<Option<u32>>(), 0..128)) {
        let mut env = Envelope::new(StandardKind::ServerAll);
        for op in ops {
            match op {
                Some(v) => {
                    env.append(&v);
                }
                None => {
                    let _ = env.extract::<u32>();
                }
            }
            prop_assert_eq!(env.len(), env.payload().len());
            prop_assert_eq!(env.header().length as usize, env.payload().len());
            prop_assert_eq!(env.total_size(), HEADER_SIZE + env.payload().len());
        }
    }
}

// Property: a stream of envelopes decodes identically however it is split
proptest! {
    #[test]
    fn prop_decode_survives_arbitrary_chunking(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..8),
        chunk in 1usize..64,
    ) {
        let mut codec = EnvelopeCodec::<StandardKind>::new();
        let mut wire = BytesMut::new();
        let sent: Vec<_> = payloads
            .into_iter()
            .map(|p| Envelope::from_parts(StandardKind::ServerMessage, p).unwrap())
            .collect();
        for env in &sent {
            codec.encode(env, &mut wire).unwrap();
        }

        let mut received = Vec::new();
        let mut buf = BytesMut::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(env) = codec.decode(&mut buf).unwrap() {
                received.push(env);
            }
        }

        prop_assert_eq!(received, sent);
        prop_assert!(buf.is_empty());
    }
}

// Property: push_back/pop_front is FIFO, push_front/pop_front is LIFO
proptest! {
    #[test]
    fn prop_queue_ordering(items in prop::collection::vec(any::<u32>(), 0..200)) {
        let fifo = TsQueue::new();
        let lifo = TsQueue::new();
        for &i in &items {
            fifo.push_back(i);
            lifo.push_front(i);
        }
        prop_assert_eq!(fifo.len(), items.len());

        let drained: Vec<_> = std::iter::from_fn(|| fifo.pop_front()).collect();
        prop_assert_eq!(&drained, &items);

        let reversed: Vec<_> = std::iter::from_fn(|| lifo.pop_front()).collect();
        let expected: Vec<_> = items.iter().rev().copied().collect();
        prop_assert_eq!(reversed, expected);
    }
}

// Property: pop_back mirrors pop_front
proptest! {
    #[test]
    fn prop_queue_pop_back_is_reverse(items in prop::collection::vec(any::<u16>(), 0..100)) {
        let q = TsQueue::new();
        for &i in &items {
            q.push_back(i);
        }
        let from_back: Vec<_> = std::iter::from_fn(|| q.pop_back()).collect();
        let expected: Vec<_> = items.iter().rev().copied().collect();
        prop_assert_eq!(from_back, expected);
        prop_assert!(q.is_empty());
    }
}
