// Copyright © 2024 Pathway

use assert_matches::assert_matches;

use physical_plan::plan::{
    Config, Error, InputPortAttributes, InputPortRef, LogicalPlan, OutputPortAttributes,
};

#[test]
fn test_duplicate_port_is_rejected() -> eyre::Result<()> {
    let mut logical = LogicalPlan::default();
    let operator = logical.add_operator("join");
    logical.add_input_port(operator, "left", InputPortAttributes::default())?;
    assert_matches!(
        logical.add_input_port(operator, "left", InputPortAttributes::default()),
        Err(Error::DuplicatePort { operator, port }) if operator.as_str() == "join" && port.as_str() == "left"
    );
    assert_matches!(
        logical.add_output_port(operator, "left", OutputPortAttributes::default()),
        Err(Error::DuplicatePort { .. })
    );
    Ok(())
}

#[test]
fn test_stream_with_unknown_port_is_rejected() -> eyre::Result<()> {
    let mut logical = LogicalPlan::default();
    let producer = logical.add_operator("producer");
    let consumer = logical.add_operator("consumer");
    let source = logical.add_output_port(producer, "out", OutputPortAttributes::default())?;
    let missing = InputPortRef {
        operator: consumer,
        port: "in".into(),
    };
    assert_matches!(
        logical.add_stream("data", source, vec![missing]),
        Err(Error::InvalidPortReference { operator, port }) if operator.as_str() == "consumer" && port.as_str() == "in"
    );
    assert_eq!(logical.streams().count(), 0);
    Ok(())
}

#[test]
fn test_port_joins_one_stream_only() -> eyre::Result<()> {
    let mut logical = LogicalPlan::default();
    let producer = logical.add_operator("producer");
    let consumer = logical.add_operator("consumer");
    let first = logical.add_output_port(producer, "first", OutputPortAttributes::default())?;
    let second = logical.add_output_port(producer, "second", OutputPortAttributes::default())?;
    let sink = logical.add_input_port(consumer, "in", InputPortAttributes::default())?;

    logical.add_stream("first", first.clone(), vec![sink.clone()])?;
    assert_matches!(
        logical.add_stream("again", first, vec![]),
        Err(Error::PortAlreadyConnected { port, .. }) if port.as_str() == "first"
    );
    assert_matches!(
        logical.add_stream("second", second.clone(), vec![sink]),
        Err(Error::PortAlreadyConnected { port, .. }) if port.as_str() == "in"
    );
    let other = logical.add_input_port(consumer, "other", InputPortAttributes::default())?;
    assert_matches!(
        logical.add_stream("second", second, vec![other.clone(), other]),
        Err(Error::PortAlreadyConnected { port, .. }) if port.as_str() == "other"
    );
    Ok(())
}

#[test]
fn test_streams_by_operator() -> eyre::Result<()> {
    let mut logical = LogicalPlan::default();
    let reader = logical.add_operator("reader");
    let filter = logical.add_operator("filter");
    let writer = logical.add_operator("writer");
    let raw_out = logical.add_output_port(reader, "raw", OutputPortAttributes::default())?;
    let raw_in = logical.add_input_port(filter, "raw", InputPortAttributes::default())?;
    let kept_out = logical.add_output_port(filter, "kept", OutputPortAttributes::default())?;
    let kept_in = logical.add_input_port(writer, "kept", InputPortAttributes::default())?;
    let raw = logical.add_stream("raw", raw_out, vec![raw_in])?;
    let kept = logical.add_stream("kept", kept_out, vec![kept_in])?;

    assert_eq!(logical.streams_from(reader), vec![raw]);
    assert_eq!(logical.streams_into(reader), vec![]);
    assert_eq!(logical.streams_from(filter), vec![kept]);
    assert_eq!(logical.streams_into(filter), vec![raw]);
    assert_eq!(logical.streams_into(writer), vec![kept]);
    assert_eq!(logical.stream(kept)?.name().as_str(), "kept");
    assert_eq!(logical.stream(kept)?.source().operator, filter);
    Ok(())
}

#[test]
fn test_unifier_limit_follows_config() -> eyre::Result<()> {
    let mut logical = LogicalPlan::new(Config::default().with_unifier_limit(5)?.with_max_fan_in(8)?);
    let producer = logical.add_operator("producer");
    let plain = logical.add_output_port(producer, "plain", OutputPortAttributes::default())?;
    let wide = logical.add_output_port(
        producer,
        "wide",
        OutputPortAttributes::default().with_unifier_limit(32),
    )?;
    let plain = logical.add_stream("plain", plain, vec![])?;
    let wide = logical.add_stream("wide", wide, vec![])?;

    assert_eq!(logical.unifier_limit(plain)?, Some(5));
    assert_eq!(logical.unifier_limit(wide)?, Some(8));
    Ok(())
}
