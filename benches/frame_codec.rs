//! Frame codec benchmark suite.
//!
//! Measures parse and serialize cost for the three frame kinds at a few
//! payload sizes, plus a request round trip over the in-memory transport.
//!
//! Run with: cargo bench --bench frame_codec
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use gateway_client::protocol::{Event, Frame, Request, Response, parse, serialize};
use gateway_client::{ConnectionConfig, GatewayClient, MemoryTransport, RequestId};
use serde_json::{Value, json};
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PAYLOAD_SIZES: &[usize] = &[16, 256, 4096];

fn payload(size: usize) -> Value {
    json!({
        "text": "x".repeat(size),
        "seq": 42,
        "tags": ["alpha", "beta"],
    })
}

// ============================================================================
// Benchmark: Parse
// ============================================================================

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    for &size in PAYLOAD_SIZES {
        let frames = [
            ("request", Frame::Request(Request::new("chat.send", payload(size)))),
            (
                "response",
                Frame::Response(Response::success(RequestId::new("bench"), payload(size))),
            ),
            ("event", Frame::Event(Event::new("chat.delta", payload(size)))),
        ];

        for (kind, frame) in frames {
            let raw = serialize(&frame).expect("serialize");
            group.throughput(Throughput::Bytes(raw.len() as u64));
            group.bench_with_input(BenchmarkId::new(kind, size), &raw, |b, raw| {
                b.iter(|| parse(black_box(raw)).expect("parse"));
            });
        }
    }

    group.finish();
}

// ============================================================================
// Benchmark: Serialize
// ============================================================================

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");

    for &size in PAYLOAD_SIZES {
        let frame = Frame::Request(Request::new("chat.send", payload(size)));
        group.bench_with_input(BenchmarkId::new("request", size), &frame, |b, frame| {
            b.iter(|| serialize(black_box(frame)).expect("serialize"));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Request Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let client = rt.block_on(async {
        let (transport, mut gateway) = MemoryTransport::pair();
        let client = GatewayClient::new(transport);

        tokio::spawn(async move {
            let Some(mut peer) = gateway.accept().await else {
                return;
            };
            if peer.accept_handshake(Duration::from_secs(3600)).await.is_err() {
                return;
            }
            while let Ok(request) = peer.recv_request().await {
                if peer.respond(&request.id, request.params).is_err() {
                    return;
                }
            }
        });

        let config = ConnectionConfig::new("ws://gateway.bench").expect("config");
        client.connect(config).await.expect("connect");
        client
    });

    let mut group = c.benchmark_group("round_trip");
    group.measurement_time(Duration::from_secs(10));

    for &size in PAYLOAD_SIZES {
        group.bench_with_input(BenchmarkId::new("echo", size), &payload(size), |b, params| {
            b.to_async(&rt)
                .iter(|| async { client.request("echo", params.clone()).await.expect("echo") });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse, bench_serialize, bench_round_trip);
criterion_main!(benches);
