use criterion::{criterion_group, criterion_main, Criterion};
use std::io::sink;

use chrono::{TimeZone, Utc};
use gmail_archiver::archive::{compressor_for, CompressionKind, CompressorOptions, TarWriter};
use gmail_archiver::model::message::MessageBlob;
use gmail_archiver::model::thread::Threads;
use gmail_archiver::naming::{build_message_file_name, build_thread_directory_name};

fn sample_threads() -> Threads<MessageBlob> {
    let date = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
    let body = b"Subject: Status\r\n\r\n".repeat(256);
    let mut threads = Threads::new();
    for i in 0..200u64 {
        threads.push(
            i % 20,
            MessageBlob::buffered(format!("uid-{i}"), date, body.clone())
                .with_subject(format!("Status report {i}"))
                .with_sender("Ops Team <ops@example.com>"),
        );
    }
    threads
}

fn bench_tar_writer(c: &mut Criterion) {
    c.bench_function("tar_200_messages", |b| {
        b.iter(|| {
            let mut writer = TarWriter::new(sink());
            writer.write_threads(sample_threads()).unwrap();
            writer.finish().unwrap();
        })
    });
}

fn bench_gzip_archive(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("bench.tar.gz");
    let compressor = compressor_for(CompressionKind::Gzip, &CompressorOptions::default());

    c.bench_function("gzip_archive_200_messages", |b| {
        b.iter(|| compressor.compress(&output, sample_threads()).unwrap())
    });
}

fn bench_naming(c: &mut Criterion) {
    c.bench_function("build_names", |b| {
        b.iter(|| {
            let dir = build_thread_directory_name(1_789_456_123_000, Some("Re: Invoice: Q3/2024? Draft"));
            let file = build_message_file_name(
                "unique:../id",
                Some("Quarterly <Update> with a rather long subject line"),
                "2024-12-31_23-59-59",
                Some("\"Pérez, Ana\" <ana@example.com>"),
            );
            (dir, file)
        })
    });
}

criterion_group!(benches, bench_tar_writer, bench_gzip_archive, bench_naming);
criterion_main!(benches);
