//! Advisory capture contract: the default sink reports every advisory as a
//! structured `WARN` event (fmt JSON writer, parsed back).

mod common;

use std::sync::{Arc, Mutex};

use common::{empty_dict_stream, model_tree};
use modelgate_core::{LoaderConfig, SecureLoader};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct MockWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl std::io::Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for MockWriter {
    type Writer = MockWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn setup_capture() -> (MockWriter, tracing::subscriber::DefaultGuard) {
    let writer = MockWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(writer.clone())
        .with_max_level(tracing::Level::DEBUG)
        .json()
        .finish();
    (writer, tracing::subscriber::set_default(subscriber))
}

/// `fields` objects of every WARN event carrying an `advisory` field.
fn advisory_events(output: &str) -> Vec<serde_json::Value> {
    output
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .filter(|event| event["level"] == "WARN")
        .filter_map(|event| event.get("fields").cloned())
        .filter(|fields| fields.get("advisory").is_some())
        .collect()
}

#[test]
fn test_advisories_reach_tracing_as_structured_warnings() {
    let (writer, _guard) = setup_capture();
    let dir = model_tree(&[("m.pkl", empty_dict_stream().as_slice())]);

    let loader = SecureLoader::from_config(&LoaderConfig::new(dir.path())).unwrap();
    loader.secure_load("m.pkl", false).unwrap();
    loader.unsafe_load("m.pkl").unwrap();

    let output = String::from_utf8(writer.buf.lock().unwrap().clone()).unwrap();
    let events = advisory_events(&output);
    let kinds: Vec<_> = events
        .iter()
        .filter_map(|fields| fields["advisory"].as_str())
        .collect();
    assert_eq!(
        kinds,
        vec!["manifest_missing", "verification_bypassed", "unsafe_load"]
    );

    assert!(events[0]["manifest"]
        .as_str()
        .unwrap()
        .ends_with("model_manifest.json"));
    assert!(events[2]["path"].as_str().unwrap().ends_with("m.pkl"));
    assert!(events[2]["message"]
        .as_str()
        .unwrap()
        .contains("use secure_load instead"));
}

#[test]
fn test_verified_load_logs_no_warnings() {
    let stream = empty_dict_stream();
    let dir = model_tree(&[("m.pkl", stream.as_slice())]);
    common::write_manifest(dir.path(), &[("m.pkl", stream.as_slice())]);
    let (writer, _guard) = setup_capture();

    let loader = SecureLoader::from_config(&LoaderConfig::new(dir.path())).unwrap();
    loader.load_model("m.pkl").unwrap();

    let output = String::from_utf8(writer.buf.lock().unwrap().clone()).unwrap();
    assert!(advisory_events(&output).is_empty(), "{output}");
    assert!(output.contains("model integrity verified"));
}
