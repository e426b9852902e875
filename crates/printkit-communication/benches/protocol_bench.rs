use criterion::{black_box, criterion_group, criterion_main, Criterion};
use printkit_communication::encode_numbered;
use printkit_communication::marlin::parse_response;
use printkit_communication::s3g::{encode_packet, PacketDecoder, S3gCommand, S3gJobReader};
use printkit_core::CalibrationProfile;
use std::io::Cursor;

fn bench_marlin(c: &mut Criterion) {
    c.bench_function("marlin_parse_temperature_ok", |b| {
        b.iter(|| parse_response(black_box("ok T:210.5 /210.0 B:60.1 /60.0 @:64 B@:0"), 0))
    });
    c.bench_function("marlin_encode_numbered", |b| {
        b.iter(|| encode_numbered(black_box(12345), black_box("G1 X10.5 Y20.25 E0.4 F1800")))
    });
}

fn bench_s3g(c: &mut Criterion) {
    let command = S3gCommand::QueueExtendedPointNew {
        steps: [1200, -3400, 80, -150, 0],
        duration_us: 250_000,
        relative: 0,
    };
    let payload = command.encode().unwrap();
    let packet = encode_packet(&payload).unwrap();

    c.bench_function("s3g_encode_packet", |b| {
        b.iter(|| encode_packet(black_box(&payload)))
    });
    c.bench_function("s3g_decode_packet", |b| {
        b.iter(|| {
            let mut decoder = PacketDecoder::new();
            let mut out = None;
            for byte in black_box(&packet) {
                if let Ok(Some(p)) = decoder.push(*byte) {
                    out = Some(p);
                }
            }
            out
        })
    });

    let stream: Vec<u8> = (0..1000).flat_map(|_| payload.clone()).collect();
    c.bench_function("s3g_job_reader_1000_moves", |b| {
        b.iter(|| {
            let mut reader =
                S3gJobReader::new(Cursor::new(black_box(&stream)), CalibrationProfile::default());
            let mut count = 0;
            while let Ok(Some(_)) = reader.next_packet() {
                count += 1;
            }
            count
        })
    });
}

criterion_group!(benches, bench_marlin, bench_s3g);
criterion_main!(benches);
