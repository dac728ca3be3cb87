use std::fs;

use assetsync_engine::{ensure_dir, move_into_place, AtomicFileWriter};
use tempfile::TempDir;

#[test]
fn creates_missing_directory() {
    let temp = TempDir::new().unwrap();
    let new_dir = temp.path().join("cache");
    assert!(!new_dir.exists());
    ensure_dir(&new_dir).unwrap();
    assert!(new_dir.is_dir());
}

#[test]
fn atomic_write_replaces_existing() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());

    let first = writer.write("index.json", b"[]").unwrap();
    assert_eq!(first.file_name().unwrap(), "index.json");
    assert_eq!(fs::read_to_string(&first).unwrap(), "[]");

    let second = writer.write("index.json", b"[1]").unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&second).unwrap(), "[1]");
}

#[test]
fn no_partial_file_on_error() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let writer = AtomicFileWriter::new(file_path.clone());
    let result = writer.write("index.json", b"data");
    assert!(result.is_err());
    assert!(!file_path.with_file_name("index.json").exists());
}

#[test]
fn move_into_place_replaces_destination() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("tmp").join("rock.fbx");
    fs::create_dir_all(source.parent().unwrap()).unwrap();
    fs::write(&source, "new").unwrap();
    let destination = temp.path().join("Assets").join("Imports").join("rock.fbx");
    fs::create_dir_all(destination.parent().unwrap()).unwrap();
    fs::write(&destination, "old").unwrap();

    move_into_place(&source, &destination).unwrap();

    assert!(!source.exists());
    assert_eq!(fs::read_to_string(&destination).unwrap(), "new");
}

#[test]
fn move_into_place_creates_parent_directories() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("a.png");
    fs::write(&source, "png").unwrap();
    let destination = temp.path().join("deep").join("nested").join("a.png");

    move_into_place(&source, &destination).unwrap();

    assert_eq!(fs::read_to_string(destination).unwrap(), "png");
}
