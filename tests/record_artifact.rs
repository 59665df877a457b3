//! Exercises the record stream the way the coordinator actually uses it:
//! written to a real file under a scratch directory, then read back by a
//! separate process step (§4.4's producer/consumer handoff via the
//! filesystem).

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;

use dedup_rs::record::{FileRecord, HeaderRecord, Record, RecordReader, RecordWriter};

#[test]
fn artefact_round_trips_through_a_scratch_file() {
    let scratch = tempfile::tempdir().unwrap();
    let artefact = scratch.path().join("demo.jsonl");

    {
        let out = File::create(&artefact).unwrap();
        let mut writer = RecordWriter::new(out);
        writer
            .write(&Record::Header(HeaderRecord {
                package: "demo".into(),
                source: "demo".into(),
                version: "1.0".into(),
                architecture: "amd64".into(),
                depends: vec!["libc6".into()],
            }))
            .unwrap();
        writer
            .write(&Record::File(FileRecord {
                name: "a.txt".into(),
                size: 6,
                hashes: HashMap::from([("sha512".to_string(), "deadbeef".to_string())]),
            }))
            .unwrap();
        writer.write(&Record::Commit).unwrap();
    }

    let reader = BufReader::new(File::open(&artefact).unwrap());
    let (header, files) = RecordReader::new(reader).read_package().unwrap();
    assert_eq!(header.package, "demo");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "a.txt");

    // Successful apply unlinks the artefact, mirroring `coordinator::apply_all`.
    std::fs::remove_file(&artefact).unwrap();
    assert!(!artefact.exists());
}
