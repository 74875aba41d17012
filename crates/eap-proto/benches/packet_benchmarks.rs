use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use eap_proto::simaka::{SimAkaAttribute, SimAkaSubtype, SimAkaTypeData};
use eap_proto::{EapCode, EapMethodType, EapPacket};

fn create_challenge_packet(identity_len: usize) -> EapPacket {
    let type_data = SimAkaTypeData::new(
        SimAkaSubtype::AkaChallenge,
        vec![
            SimAkaAttribute::RandAka([0x5A; 16]),
            SimAkaAttribute::Autn([0xA5; 16]),
            SimAkaAttribute::Identity(vec![0x30; identity_len]),
            SimAkaAttribute::Mac([0x11; 16]),
        ],
    );

    EapPacket::new(
        EapCode::Request,
        1,
        Some(EapMethodType::Aka),
        type_data.encode(),
    )
}

fn bench_packet_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode");

    for identity_len in [16, 64, 128] {
        let packet = create_challenge_packet(identity_len);
        group.bench_with_input(
            BenchmarkId::from_parameter(identity_len),
            &packet,
            |b, packet| b.iter(|| black_box(packet.to_bytes())),
        );
    }

    group.finish();
}

fn bench_packet_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_decode");

    for identity_len in [16, 64, 128] {
        let bytes = create_challenge_packet(identity_len).to_bytes();
        group.bench_with_input(
            BenchmarkId::from_parameter(identity_len),
            &bytes,
            |b, bytes| {
                b.iter(|| {
                    let packet = EapPacket::from_bytes(black_box(bytes)).unwrap();
                    SimAkaTypeData::decode(&packet.type_data).unwrap()
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_packet_encode, bench_packet_decode);
criterion_main!(benches);
