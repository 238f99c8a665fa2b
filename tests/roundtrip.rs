use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use jiff::Timestamp;
use stowzip::{
    ArchiveWriter, CdHeader, Entry, LocalFileReader, MemoryReader, ZipError, ZipExtractor,
    zip_stream,
};

fn mtime() -> Timestamp {
    // Odd seconds: DOS time keeps only even seconds.
    "2024-05-01T10:20:31Z".parse().unwrap()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// (name, content); `None` marks a directory.
fn fixtures() -> Vec<(&'static str, Option<Vec<u8>>)> {
    vec![
        ("scene/", None),
        ("scene/scene.gltf", Some(br#"{"asset":{"version":"2.0"}}"#.to_vec())),
        ("scene/empty.bin", Some(Vec::new())),
        ("scene/mesh.bin", Some(payload(300_000))),
        ("textures/木材-ähre.png", Some(payload(1234))),
    ]
}

fn entries() -> Vec<Entry> {
    fixtures()
        .into_iter()
        .map(|(name, content)| match content {
            None => Entry::directory(name, mtime()),
            Some(data) => Entry::from_bytes(name, mtime(), data),
        })
        .collect()
}

async fn assert_round_trip<R: stowzip::ReadAt + 'static>(zip: &ZipExtractor<R>) {
    let listed = zip.list_files().await.unwrap();
    let fixtures = fixtures();
    assert_eq!(listed.len(), fixtures.len());
    assert_eq!(zip.info().entries as usize, fixtures.len());

    for (entry, (name, content)) in listed.iter().zip(fixtures) {
        assert_eq!(entry.name(), name);
        assert!((entry.mtime().as_second() - mtime().as_second()).abs() <= 2);
        match content {
            None => assert!(entry.is_directory()),
            Some(data) => {
                assert!(!entry.is_directory());
                assert_eq!(zip.extract_to_memory(entry).await.unwrap(), data);
                zip.verify_entry(entry).await.unwrap();
            }
        }
    }
}

#[tokio::test]
async fn round_trip_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.zip");

    let file = tokio::fs::File::create(&path).await.unwrap();
    let mut writer = ArchiveWriter::new(file);
    for entry in entries() {
        writer.write_entry(entry).await.unwrap();
    }
    writer.finish(Some("exported scene")).await.unwrap();

    let reader = Arc::new(LocalFileReader::new(&path).unwrap());
    let zip = ZipExtractor::open(reader).await.unwrap();
    assert_eq!(zip.comment(), "exported scene");
    assert_round_trip(&zip).await;
}

#[tokio::test]
async fn round_trip_through_a_stream() {
    let chunks: Vec<Bytes> = zip_stream(stream::iter(entries()), None)
        .try_collect()
        .await
        .unwrap();

    let zip = ZipExtractor::open(Arc::new(MemoryReader::new(chunks.concat())))
        .await
        .unwrap();
    assert_round_trip(&zip).await;
}

#[tokio::test]
async fn sources_are_pulled_from_readers() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("mesh.bin");
    std::fs::write(&source_path, payload(200_000)).unwrap();

    let mut writer = ArchiveWriter::new(Vec::new());
    let source = tokio::fs::File::open(&source_path).await.unwrap();
    writer
        .write_entry(Entry::from_reader("mesh.bin", mtime(), source))
        .await
        .unwrap();
    let archive = writer.finish(None).await.unwrap();

    let zip = ZipExtractor::open(Arc::new(MemoryReader::new(archive)))
        .await
        .unwrap();
    let entry = zip.list_files().await.unwrap().remove(0);
    assert_eq!(entry.uncompressed_size, 200_000);
    assert_eq!(entry.crc32, crc32fast::hash(&payload(200_000)));
    assert_eq!(zip.extract_to_memory(&entry).await.unwrap(), payload(200_000));
}

#[tokio::test]
async fn concurrent_entry_streams_share_one_handle() {
    let mut writer = ArchiveWriter::new(Vec::new());
    for entry in entries() {
        writer.write_entry(entry).await.unwrap();
    }
    let archive = writer.finish(None).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.zip");
    std::fs::write(&path, archive).unwrap();

    let zip = ZipExtractor::open_with_options(
        Arc::new(LocalFileReader::new(&path).unwrap()),
        stowzip::ReadOptions { chunk_size: 1000 },
    )
    .await
    .unwrap();
    let listed = zip.list_files().await.unwrap();

    let collect = |entry: &CdHeader| {
        let entry = entry.clone();
        let zip = &zip;
        async move {
            zip.entry_stream(&entry)
                .await
                .unwrap()
                .try_fold(Vec::new(), |mut acc, chunk| async move {
                    acc.extend_from_slice(&chunk);
                    Ok(acc)
                })
                .await
                .unwrap()
        }
    };

    let (mesh, texture) = tokio::join!(collect(&listed[3]), collect(&listed[4]));
    assert_eq!(mesh, payload(300_000));
    assert_eq!(texture, payload(1234));
}

#[tokio::test]
async fn eocd_with_maximum_comment() {
    let comment = "#".repeat(65_535);
    let mut writer = ArchiveWriter::new(Vec::new());
    writer
        .write_entry(Entry::from_bytes("a.txt", mtime(), "a"))
        .await
        .unwrap();
    let archive = writer.finish(Some(comment.as_str())).await.unwrap();

    let zip = ZipExtractor::open(Arc::new(MemoryReader::new(archive)))
        .await
        .unwrap();
    assert_eq!(zip.comment().len(), 65_535);
    assert_eq!(zip.list_files().await.unwrap().len(), 1);

    let mut writer = ArchiveWriter::new(Vec::new());
    writer
        .write_entry(Entry::from_bytes("a.txt", mtime(), "a"))
        .await
        .unwrap();
    let err = writer.finish(Some("#".repeat(65_536).as_str())).await.unwrap_err();
    assert!(matches!(err, ZipError::TooLarge { .. }));
}

#[tokio::test]
async fn maximum_entry_count_round_trips() {
    let mut writer = ArchiveWriter::new(Vec::new());
    for index in 0..u16::MAX {
        writer
            .write_entry(Entry::from_bytes(format!("{index:05}"), mtime(), Bytes::new()))
            .await
            .unwrap();
    }
    let err = writer
        .write_entry(Entry::from_bytes("overflow", mtime(), Bytes::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, ZipError::TooLarge { .. }));
    let archive = writer.finish(None).await.unwrap();

    // Both EOCD entry counts hold 0xFFFF, with no ZIP64 locator before it.
    let zip = ZipExtractor::open(Arc::new(MemoryReader::new(archive)))
        .await
        .unwrap();
    assert_eq!(zip.info().entries, u16::MAX);

    let listed = zip.list_files().await.unwrap();
    assert_eq!(listed.len(), 65_535);
    assert_eq!(listed[0].name(), "00000");
    assert_eq!(listed[65_534].name(), "65534");
    zip.verify_entry(&listed[65_534]).await.unwrap();
}

#[tokio::test]
async fn rejects_files_that_are_not_archives() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "definitely not a zip file\n".repeat(100)).unwrap();

    let err = ZipExtractor::open(Arc::new(LocalFileReader::new(&path).unwrap()))
        .await
        .err()
        .unwrap();
    assert!(err.is_not_an_archive());
    assert!(err.to_string().contains("Not a supported ZIP archive"));
}

#[tokio::test]
async fn readable_by_the_zip_crate() {
    let mut writer = ArchiveWriter::new(Vec::new());
    for entry in entries() {
        writer.write_entry(entry).await.unwrap();
    }
    let archive = writer.finish(None).await.unwrap();

    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
    assert_eq!(zip.len(), fixtures().len());

    for (index, (name, content)) in fixtures().into_iter().enumerate() {
        let mut file = zip.by_index(index).unwrap();
        assert_eq!(file.name(), name);
        match content {
            None => {
                assert!(file.is_dir());
                assert_eq!(file.unix_mode(), Some(0o040755));
            }
            Some(data) => {
                assert_eq!(file.unix_mode(), Some(0o100644));
                assert_eq!(file.crc32(), crc32fast::hash(&data));
                let mut read = Vec::new();
                file.read_to_end(&mut read).unwrap();
                assert_eq!(read, data);
            }
        }
    }
}

#[tokio::test]
async fn reads_archives_from_the_zip_crate() {
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_directory("assets/", options).unwrap();
    writer.start_file("assets/a.txt", options).unwrap();
    writer.write_all(b"hello world\n").unwrap();
    writer.start_file("b.bin", options).unwrap();
    writer.write_all(&payload(5000)).unwrap();
    let archive = writer.finish().unwrap().into_inner();

    let zip = ZipExtractor::open(Arc::new(MemoryReader::new(archive)))
        .await
        .unwrap();
    let listed = zip.list_files().await.unwrap();
    let names: Vec<&str> = listed.iter().map(CdHeader::name).collect();
    assert_eq!(names, ["assets/", "assets/a.txt", "b.bin"]);

    assert!(listed[0].is_directory());
    assert_eq!(listed[1].crc32, 0xaf08_3b2d);
    assert_eq!(zip.extract_to_memory(&listed[1]).await.unwrap(), b"hello world\n");

    let chunks: Vec<Bytes> = zip
        .entry_stream(&listed[2])
        .await
        .unwrap()
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(chunks.concat(), payload(5000));

    for entry in &listed {
        zip.verify_entry(entry).await.unwrap();
    }
}
