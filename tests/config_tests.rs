//! Connection-string behaviour through the public surface.

use std::time::Duration;

use sidewire::config::parse;
use sidewire::{ConfigurationError, Engine, EngineError};

#[test]
fn the_canonical_string_parses_into_two_literal_specs() {
    let specs = parse("tcp(host=localhost,port=4228);file(filename=\"a b.swl\",append=true)")
        .expect("canonical string");
    assert_eq!(specs.len(), 2);

    assert_eq!(specs[0].name, "tcp");
    assert_eq!(specs[0].options.get("host"), Some("localhost"));
    assert_eq!(specs[0].options.get("port"), Some("4228"));

    assert_eq!(specs[1].name, "file");
    assert_eq!(specs[1].options.get("filename"), Some("a b.swl"));
    assert_eq!(specs[1].options.get("append"), Some("true"));
}

#[test]
fn typed_option_accessors_convert_sizes_and_durations() {
    let specs = parse("tcp(timeout=5s,backlog=4MB,reconnect.interval=250ms)").unwrap();
    let options = &specs[0].options;
    assert_eq!(
        options.get_duration("timeout", Duration::ZERO).unwrap(),
        Duration::from_secs(5)
    );
    assert_eq!(options.get_size("backlog", 0).unwrap(), 4 * 1024 * 1024);
    assert_eq!(
        options
            .get_duration("reconnect.interval", Duration::ZERO)
            .unwrap(),
        Duration::from_millis(250)
    );
}

#[test]
fn engine_configure_reports_unknown_options() {
    let engine = Engine::new("app", "host");
    let err = engine.configure("tcp(hostname=localhost)").unwrap_err();
    match err {
        EngineError::Configuration(ConfigurationError::UnknownOption { transport, key }) => {
            assert_eq!(transport, "tcp");
            assert_eq!(key, "hostname");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn engine_configure_reports_malformed_values() {
    let engine = Engine::new("app", "host");
    let err = engine.configure("tcp(port=not-a-port)").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Configuration(ConfigurationError::InvalidValue { .. })
    ));
}

#[test]
fn structural_faults_name_the_clause_or_position() {
    assert_eq!(
        parse("tcp").unwrap_err(),
        ConfigurationError::MissingOpenParen { position: 4 }
    );
    assert_eq!(
        parse("tcp(host=\"oops)").unwrap_err(),
        ConfigurationError::UnterminatedQuote {
            clause: "tcp".into()
        }
    );
    assert_eq!(
        parse("noop();telegraph(dots=3)").unwrap_err(),
        ConfigurationError::UnknownTransport {
            name: "telegraph".into(),
            position: 8
        }
    );
    assert_eq!(
        parse("mem(maxsize=1,maxsize=2)").unwrap_err(),
        ConfigurationError::DuplicateOption {
            clause: "mem".into(),
            key: "maxsize".into()
        }
    );
}
