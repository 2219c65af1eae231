//! Request dispatch benchmarks against an in-process server.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kvwire_client::{Connection, ConnectionOptions, MemoryEventSink};
use kvwire_protocol::ops::GetRequest;
use kvwire_protocol::{
    build_response, ChannelContext, Datatype, DocId, FrameDecoder, KvRequest, Opcode,
    ResponseHeader, Status,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Runtime;

/// Answers every request with a small document, batching replies per read.
async fn serve(mut stream: DuplexStream) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut out = BytesMut::new();
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);
        while let Ok(Some(frame)) = decoder.decode_frame() {
            let opaque = u32::from_be_bytes([frame[12], frame[13], frame[14], frame[15]]);
            let response = build_response(
                ResponseHeader {
                    opcode: Opcode::Get,
                    datatype: Datatype::new().with_json(),
                    status: Status::Success,
                    opaque,
                    cas: 1,
                },
                &[0, 0, 0, 0],
                &[],
                b"{\"name\":\"bench\"}",
            )
            .unwrap();
            out.extend_from_slice(&response);
        }
        if stream.write_all(&out).await.is_err() {
            return;
        }
        out.clear();
    }
}

fn setup(rt: &Runtime) -> Arc<Connection> {
    rt.block_on(async {
        let (client, server) = tokio::io::duplex(1024 * 1024);
        tokio::spawn(serve(server));
        Arc::new(Connection::from_stream(
            client,
            "bench",
            ChannelContext::new("default"),
            ConnectionOptions::default(),
            Arc::new(MemoryEventSink::new()),
        ))
    })
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let conn = setup(&rt);
    let request = KvRequest::Get(GetRequest::new(DocId::new("airline_10", 0)));
    let timeout = Duration::from_secs(5);

    let mut group = c.benchmark_group("dispatch");

    group.throughput(Throughput::Elements(1));
    group.bench_function("sequential_get", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(conn.dispatch(&request, timeout).await.unwrap()) });
    });

    for concurrency in [8, 64, 512] {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("concurrent_get", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| {
                    let conn = Arc::clone(&conn);
                    let request = request.clone();
                    async move {
                        let calls: Vec<_> = (0..concurrency)
                            .map(|_| {
                                let conn = Arc::clone(&conn);
                                let request = request.clone();
                                tokio::spawn(async move { conn.dispatch(&request, timeout).await })
                            })
                            .collect();
                        for call in calls {
                            black_box(call.await.unwrap().unwrap());
                        }
                    }
                });
            },
        );
    }

    group.finish();
    conn.close();
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
