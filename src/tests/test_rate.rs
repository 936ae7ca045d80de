use crate::{Rate, TidewayError};

#[test]
fn parses_rates_with_explicit_period() {
    let rate: Rate = "100/20s".parse().unwrap();
    assert_eq!(rate.max_requests(), 100);
    assert_eq!(rate.interval(), 20.0);

    let rate: Rate = "100/3m".parse().unwrap();
    assert_eq!(rate.max_requests(), 100);
    assert_eq!(rate.interval(), 180.0);

    let rate: Rate = "5/2h".parse().unwrap();
    assert_eq!(rate.interval(), 7_200.0);
}

#[test]
fn omitted_period_defaults_to_one() {
    let rate: Rate = "100/s".parse().unwrap();
    assert_eq!(rate.max_requests(), 100);
    assert_eq!(rate.interval(), 1.0);

    let rate: Rate = "100/ms".parse().unwrap();
    assert_eq!(rate.interval(), 0.001);

    let rate: Rate = "10/m".parse().unwrap();
    assert_eq!(rate.interval(), 60.0);
}

#[test]
fn supports_every_documented_unit() {
    let expected: &[(&str, f64)] = &[
        ("1/ns", 1e-9),
        ("1/us", 1e-6),
        ("1/ms", 1e-3),
        ("1/s", 1.0),
        ("1/m", 60.0),
        ("1/h", 3_600.0),
        ("1/d", 86_400.0),
        ("1/y", 31_536_000.0),
    ];
    for (raw, interval) in expected {
        let rate: Rate = raw.parse().unwrap();
        assert_eq!(rate.interval(), *interval, "interval mismatch for {raw}");
    }
}

#[test]
fn malformed_rates_fail_with_the_offending_string() {
    let malformed = [
        "100", "abc", "100//s", "100/-1s", "100/s20", "100/20", "", "/s", "100/", "1.5/s",
        "100/x", "0/s", "100/0s",
    ];
    for raw in malformed {
        let err = raw.parse::<Rate>().unwrap_err();
        assert!(
            matches!(err, TidewayError::RateParse(ref r) if r == raw),
            "expected RateParse carrying {raw:?}, got {err:?}"
        );
    }
}
