mod common;

use ringrt::{open_file, run};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn write_then_read_at_matching_offsets_yields_bytes_written() {
    common::setup_tracing();

    let temp = NamedTempFile::new().expect("failed to create temp file");
    let path = temp.path().to_str().unwrap().to_string();

    let result = run(async move {
        let file = open_file(&path, "rw").await?;
        let written = file.write(0, b"hello, ringrt".to_vec()).await?;
        assert_eq!(written, b"hello, ringrt".len());

        let data = file.read(0, written).await?;
        assert_eq!(data, b"hello, ringrt");

        file.close().await?;
        Ok(())
    });

    result.unwrap();
}

#[test]
fn read_past_end_of_file_returns_fewer_bytes() {
    common::setup_tracing();

    let mut temp = NamedTempFile::new().expect("failed to create temp file");
    temp.write_all(b"short").unwrap();
    temp.flush().unwrap();
    let path = temp.path().to_str().unwrap().to_string();

    let result = run(async move {
        let file = open_file(&path, "r").await?;
        let data = file.read(0, 4096).await?;
        assert_eq!(data, b"short");
        file.close().await?;
        Ok(())
    });

    result.unwrap();
}

#[test]
fn create_mode_makes_a_new_file() {
    common::setup_tracing();

    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("fresh.txt").to_str().unwrap().to_string();

    let result = run(async move {
        let file = open_file(&path, "rwc").await?;
        file.write(0, b"fresh".to_vec()).await?;
        file.close().await?;
        Ok(())
    });

    result.unwrap();
}
