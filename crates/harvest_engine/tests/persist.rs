use std::fs;

use harvest_engine::{ensure_dir, AtomicFileWriter};
use tempfile::TempDir;

#[test]
fn creates_missing_directory() {
    let temp = TempDir::new().unwrap();
    let nested = temp.path().join("output").join("cache");
    assert!(!nested.exists());
    ensure_dir(&nested).unwrap();
    assert!(nested.is_dir());
}

#[test]
fn write_replaces_existing_content() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path());

    let first = writer.write("swords.json", "{\"v\":1}").unwrap();
    let second = writer.write("swords.json", "{\"v\":2}").unwrap();

    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&second).unwrap(), "{\"v\":2}");
}

#[test]
fn backup_holds_the_previous_version() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path());

    writer.write_with_backup("swords.json", "old").unwrap();
    assert!(!temp.path().join("swords.json.backup").exists());

    writer.write_with_backup("swords.json", "new").unwrap();
    assert_eq!(fs::read_to_string(temp.path().join("swords.json")).unwrap(), "new");
    assert_eq!(
        fs::read_to_string(temp.path().join("swords.json.backup")).unwrap(),
        "old"
    );
}

#[test]
fn interrupted_write_leaves_previous_file_intact() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path());
    writer.write("progress.json", "complete old state").unwrap();

    let staged = writer.stage("progress.json", "half of the new sta").unwrap();
    let temp_path = staged.temp_path().to_path_buf();
    assert!(temp_path.exists());
    assert_eq!(
        fs::read_to_string(temp.path().join("progress.json")).unwrap(),
        "complete old state"
    );

    // Process dies before the rename.
    drop(staged);

    assert!(!temp_path.exists());
    assert_eq!(
        fs::read_to_string(temp.path().join("progress.json")).unwrap(),
        "complete old state"
    );
    let leftovers: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
    assert_eq!(leftovers.len(), 1);
}

#[test]
fn staged_commit_lands_on_target() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path());

    let staged = writer.stage("list.txt", "a\nb\n").unwrap();
    assert_eq!(staged.target(), temp.path().join("list.txt"));
    let path = staged.commit().unwrap();

    assert_eq!(fs::read_to_string(path).unwrap(), "a\nb\n");
}

#[test]
fn fails_when_directory_is_a_file() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let writer = AtomicFileWriter::new(file_path.clone());
    assert!(writer.write("doc.json", "data").is_err());
    assert_eq!(fs::read_to_string(&file_path).unwrap(), "x");
}
