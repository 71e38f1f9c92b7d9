//! End-to-end coverage of the restriction policy: every operation runs
//! through the same whitelist, and the whole flow works against a real
//! directory tree.

use std::path::Path;
use std::sync::Arc;

use fsbound::{
    Access, DeleteOptions, Entry, Execute, FsConfig, FsContext, FsError, OpenMode, Restrictions,
};

fn context() -> Arc<FsContext> {
    FsContext::new(FsConfig::default())
}

#[tokio::test]
async fn restricted_write_is_denied_everywhere() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let readable = temp.path().join("readable");
    std::fs::create_dir(&readable)?;
    std::fs::write(readable.join("data.txt"), "content")?;

    let restrictions = Restrictions::new("integration").allow(&readable, false);

    // reads pass
    let entry = Entry::new(readable.join("data.txt"), restrictions.clone(), context())?;
    assert!(entry.check_readable(None).is_ok());
    let bytes = entry.read_bytes(0, 7).await?;
    assert_eq!(&bytes, b"content");

    // every write-shaped operation is refused
    let mut entry = Entry::new(readable.join("data.txt"), restrictions.clone(), context())?;
    assert!(matches!(
        entry.open(OpenMode::WriteOnly).await.unwrap_err(),
        FsError::Restrictions { .. }
    ));

    let entry = Entry::new(readable.join("data.txt"), restrictions.clone(), context())?;
    assert!(matches!(
        entry.delete(&DeleteOptions::default()).await.unwrap_err(),
        FsError::Restrictions { .. }
    ));

    let entry = Entry::new(readable.join("new-dir"), restrictions, context())?;
    assert!(matches!(
        entry
            .as_directory()?
            .ensure(None, false, false)
            .await
            .unwrap_err(),
        FsError::Restrictions { .. }
    ));

    Ok(())
}

#[tokio::test]
async fn write_read_move_delete_lifecycle() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let restrictions = Restrictions::new("lifecycle").allow(temp.path(), true);

    // create a nested directory, write a file into it
    let dir = Entry::new(temp.path().join("work/area"), restrictions.clone(), context())?;
    dir.as_directory()?.ensure(None, false, false).await?;

    let mut file = Entry::new(
        temp.path().join("work/area/report.txt"),
        restrictions.clone(),
        context(),
    )?;
    file.open(OpenMode::WriteOnly).await?;
    file.write_data(b"line one\nline two\n").await?;
    file.close().await?;

    // read it back line by line
    let mut file = Entry::new(
        temp.path().join("work/area/report.txt"),
        restrictions.clone(),
        context(),
    )?;
    file.open(OpenMode::ReadOnly).await?;
    assert_eq!(file.read_line().await?.as_deref(), Some("line one"));
    assert_eq!(file.read_line().await?.as_deref(), Some("line two"));
    assert_eq!(file.read_line().await?, None);
    file.close().await?;

    // move it elsewhere, then delete with upward pruning
    let archive = temp.path().join("archive");
    let file = Entry::new(
        temp.path().join("work/area/report.txt"),
        restrictions.clone(),
        context(),
    )?;
    let moved = file.move_to(&archive.join("report.txt"), None).await?;
    assert!(archive.join("report.txt").exists());

    moved.delete(&DeleteOptions::default()).await?;
    // report.txt gone, archive pruned; work/area survives only if non-empty
    assert!(!archive.exists());

    Ok(())
}

#[tokio::test]
async fn duplicate_scan_feeds_bulk_delete() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let restrictions = Restrictions::new("dups").allow(temp.path(), true);

    std::fs::write(temp.path().join("one.bin"), "payload")?;
    std::fs::write(temp.path().join("two.bin"), "payload")?;
    std::fs::write(temp.path().join("unique.bin"), "different")?;

    let root = Entry::new(temp.path(), restrictions.clone(), context())?;
    let duplicates = root.as_directory()?.duplicates(0, 0)?;
    assert_eq!(duplicates.len(), 1);

    // keep the first of each group, delete the rest
    for (_, group) in duplicates.iter() {
        let paths = group.paths();
        for path in paths.iter().skip(1) {
            let doomed = Entry::new(path, restrictions.clone(), context())?;
            doomed
                .delete(&DeleteOptions {
                    clean_path: false,
                    sudo: false,
                })
                .await?;
        }
    }

    assert!(temp.path().join("unique.bin").exists());
    let survivors = ["one.bin", "two.bin"]
        .iter()
        .filter(|name| temp.path().join(name).exists())
        .count();
    assert_eq!(survivors, 1);
    Ok(())
}

#[tokio::test]
async fn execute_composes_with_directory_listing() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let restrictions = Restrictions::new("walk").allow(temp.path(), true);

    std::fs::create_dir_all(temp.path().join("src/nested"))?;
    std::fs::create_dir_all(temp.path().join("target"))?;
    std::fs::write(temp.path().join("src/a.rs"), "x")?;
    std::fs::write(temp.path().join("src/nested/b.rs"), "x")?;
    std::fs::write(temp.path().join("src/notes.md"), "x")?;
    std::fs::write(temp.path().join("target/c.rs"), "x")?;

    let execute = Execute::new(restrictions)
        .path(temp.path())
        .recurse(true)
        .whitelist(&["rs"])
        .skip(temp.path().join("target"));

    let mut seen = Vec::new();
    let count = execute.on_files(&mut |path| {
        seen.push(path.to_path_buf());
        Ok(())
    })?;

    assert_eq!(count, 2);
    assert!(seen.iter().all(|p| !p.starts_with(temp.path().join("target"))));
    Ok(())
}

#[test]
fn derived_restrictions_stay_consistent() {
    let temp = tempfile::tempdir().unwrap();
    let base = Restrictions::new("derived").allow(temp.path().join("a/b"), false);

    // child of a parent derivation lands back on the original directory
    let round_trip = base.parent(1).child(&["b"], None);
    assert!(round_trip
        .check(&temp.path().join("a/b/file"), Access::Read)
        .is_ok());

    // writability escalation does not leak into the source ruleset
    let writable = base.these_writable();
    assert!(writable
        .check(&temp.path().join("a/b/file"), Access::Write)
        .is_ok());
    assert!(base
        .check(&temp.path().join("a/b/file"), Access::Write)
        .is_err());
}
