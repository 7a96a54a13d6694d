use std::fs::File;
use std::io::Write;

use starsync_cli::dump::{SourceCommodity, SourceRecord, SourceSystem};
use starsync_cli::{for_each_in_array, JsonLines, ReadStats};

#[test]
fn commodity_array_is_streamed_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[{{"id": 1, "name": "Gold", "category": {{"name": "Metals"}}}},
            {{"id": "two"}},
            {{"id": 3, "name": "Tea", "is_rare": 1}}]"#
    )
    .unwrap();

    let mut names = Vec::new();
    let stats = for_each_in_array(File::open(file.path()).unwrap(), |c: SourceCommodity| {
        c.validate()?;
        names.push(c.name.unwrap_or_default());
        Ok(())
    })
    .unwrap();

    assert_eq!(names, vec!["Gold", "Tea"]);
    assert_eq!(
        stats,
        ReadStats {
            records: 2,
            malformed: 1
        }
    );
}

#[test]
fn trailing_garbage_after_array_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"[{{"id": 1, "name": "Gold"}}] ]"#).unwrap();
    let result = for_each_in_array(File::open(file.path()).unwrap(), |_: SourceCommodity| Ok(()));
    assert!(result.is_err());
}

#[test]
fn system_lines_are_read_lazily() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"id": 1, "name": "Sol", "is_populated": true}}"#).unwrap();
    writeln!(file).unwrap();
    writeln!(file, r#"{{"id": 2, "name": "Lave", "needs_permit": 0}}"#).unwrap();
    writeln!(file, r#"{{"id": 3, "name": "#).unwrap();

    let mut lines = JsonLines::<_, SourceSystem>::new(File::open(file.path()).unwrap());
    let first = lines.next().unwrap().unwrap();
    assert_eq!(first.name.as_deref(), Some("Sol"));
    assert_eq!(lines.stats().records, 1);

    let rest: Vec<SourceSystem> = lines.by_ref().map(|r| r.unwrap()).collect();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].needs_permit, Some(false));
    assert_eq!(
        lines.stats(),
        ReadStats {
            records: 2,
            malformed: 1
        }
    );
}
