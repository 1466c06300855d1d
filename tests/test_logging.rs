//! Tests for logging configuration parsing

use brewlink::observability::logging::{
    filter_directives, parse_level, parse_span_flag, LogFormat,
};
use tracing::Level;

#[test]
fn test_log_format_parse() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("COMPACT"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    for input in ["invalid", "", "xml", "  pretty  "] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input: {input:?}");
    }
}

#[test]
fn test_log_level_defaults_to_info() {
    assert_eq!(parse_level("warn"), Level::WARN);
    assert_eq!(parse_level("TRACE"), Level::TRACE);
    assert_eq!(parse_level("loud"), Level::INFO);
}

#[test]
fn test_log_spans_flag() {
    assert!(parse_span_flag("True"));
    assert!(!parse_span_flag("on"));
}

#[test]
fn test_filter_directives_start_with_level() {
    assert!(filter_directives(Level::WARN).starts_with("warn"));
    assert!(filter_directives(Level::TRACE).starts_with("trace"));
}
