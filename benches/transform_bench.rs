//! Packet transform benchmarks.
//!
//! Measures the per-datagram hot path: outbound and inbound rewriting,
//! including the transport fast paths that carry virtually all traffic.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use awg_relay::config::{Config, HRange};
use awg_relay::transform::{
    transform_inbound, transform_outbound, HANDSHAKE_INIT, HANDSHAKE_INIT_SIZE, TRANSPORT_DATA,
};

fn bench_config(h4: HRange, s4: usize) -> Config {
    let mut cfg = Config {
        jc: 4,
        jmin: 10,
        jmax: 50,
        s1: 46,
        s2: 122,
        s4,
        h1: HRange::single(1033089720),
        h2: HRange::single(1336452505),
        h3: HRange::single(1858775673),
        h4,
        ..Config::default()
    };
    cfg.finalize();
    cfg
}

fn make_packet(msg_type: u32, size: usize) -> Vec<u8> {
    let mut pkt = vec![0u8; size];
    pkt[..4].copy_from_slice(&msg_type.to_le_bytes());
    pkt
}

fn stage(cfg: &Config, pkt: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; cfg.max_scan() + 1500];
    buf[cfg.max_scan()..cfg.max_scan() + pkt.len()].copy_from_slice(pkt);
    buf
}

fn bench_outbound_transport(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbound_transport");
    group.throughput(Throughput::Bytes(1400));

    let noop = bench_config(HRange::single(TRANSPORT_DATA), 0);
    let pkt = make_packet(TRANSPORT_DATA, 1400);
    let mut buf = stage(&noop, &pkt);
    group.bench_function("h4_noop", |b| {
        b.iter(|| {
            let headroom = noop.max_scan();
            buf[headroom..headroom + 4].copy_from_slice(&TRANSPORT_DATA.to_le_bytes());
            black_box(transform_outbound(&noop, &mut buf, headroom, 1400))
        })
    });

    let rewrite = bench_config(HRange::single(332219739), 0);
    let mut buf = stage(&rewrite, &pkt);
    group.bench_function("rewrite", |b| {
        b.iter(|| {
            let headroom = rewrite.max_scan();
            buf[headroom..headroom + 4].copy_from_slice(&TRANSPORT_DATA.to_le_bytes());
            black_box(transform_outbound(&rewrite, &mut buf, headroom, 1400))
        })
    });

    let padded = bench_config(HRange { min: 4_000_000, max: 4_000_999 }, 25);
    let mut buf = stage(&padded, &pkt);
    group.bench_function("ranged_padded", |b| {
        b.iter(|| {
            let headroom = padded.max_scan();
            buf[headroom..headroom + 4].copy_from_slice(&TRANSPORT_DATA.to_le_bytes());
            black_box(transform_outbound(&padded, &mut buf, headroom, 1400))
        })
    });

    group.finish();
}

fn bench_outbound_handshake_init(c: &mut Criterion) {
    // Dominated by the MAC1 recomputation over 116 bytes.
    let mut cfg = bench_config(HRange::single(332219739), 0);
    cfg.server_pub = [0x55; 32];
    cfg.finalize();

    let pkt = make_packet(HANDSHAKE_INIT, HANDSHAKE_INIT_SIZE);
    let mut buf = stage(&cfg, &pkt);

    let mut group = c.benchmark_group("outbound_handshake");
    group.throughput(Throughput::Bytes(HANDSHAKE_INIT_SIZE as u64));
    group.bench_function("init_mac1", |b| {
        b.iter(|| {
            let headroom = cfg.max_scan();
            buf[headroom..headroom + 4].copy_from_slice(&HANDSHAKE_INIT.to_le_bytes());
            black_box(transform_outbound(&cfg, &mut buf, headroom, HANDSHAKE_INIT_SIZE))
        })
    });
    group.finish();
}

fn bench_inbound(c: &mut Criterion) {
    let mut group = c.benchmark_group("inbound_transport");
    group.throughput(Throughput::Bytes(1400));

    let cfg = bench_config(HRange::single(332219739), 0);
    let mut frame = make_packet(332219739, 1400);
    group.bench_function("fast_path", |b| {
        b.iter(|| {
            frame[..4].copy_from_slice(&332219739u32.to_le_bytes());
            black_box(transform_inbound(&cfg, &mut frame))
        })
    });

    // Worst case: padded frame forcing the scan across the full headroom.
    let padded = bench_config(HRange::single(332219739), 25);
    let mut scan_frame = vec![0xEEu8; 122 + 1400];
    scan_frame[122..126].copy_from_slice(&332219739u32.to_le_bytes());
    group.bench_function("scan", |b| {
        b.iter(|| {
            scan_frame[122..126].copy_from_slice(&332219739u32.to_le_bytes());
            black_box(transform_inbound(&padded, &mut scan_frame))
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_outbound_transport,
    bench_outbound_handshake_init,
    bench_inbound
);
criterion_main!(benches);
