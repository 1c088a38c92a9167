// Copyright © 2024 Pathway

use physical_plan::plan::{
    Config, OperatorId, OutputPortAttributes, PhysicalPlan, StreamMapping, TopologySnapshot,
};

use super::helpers::{
    add_partitions, expected_cascade, fan_out, fan_out_with_config, sources_of, unifiers,
};

fn limited(limit: usize) -> OutputPortAttributes {
    OutputPortAttributes::default().with_unifier_limit(limit)
}

#[test]
fn test_five_sources_with_limit_two() -> eyre::Result<()> {
    let topology = fan_out(1, limited(2))?;
    let mut physical = PhysicalPlan::new();
    let consumers = add_partitions(&mut physical, &topology.logical, topology.consumers[0], 1)?;
    let producers = add_partitions(&mut physical, &topology.logical, topology.producer, 5)?;

    let mut mapping = StreamMapping::new(topology.stream);
    let delta = mapping.set_sources(&topology.logical, &mut physical, &producers)?;

    let cascade: Vec<OperatorId> = mapping.cascading_unifiers().iter().copied().collect();
    assert_eq!(cascade.len(), 5);
    let final_unifier = mapping.final_unifier().expect("final unifier");
    assert!(!cascade.contains(&final_unifier));
    assert_eq!(delta.created.len(), 6);

    // first level groups the partitions positionally: (0, 1), (2, 3), (4)
    assert_eq!(sources_of(&physical, cascade[0])?, producers[0..2]);
    assert_eq!(sources_of(&physical, cascade[1])?, producers[2..4]);
    assert_eq!(sources_of(&physical, cascade[2])?, producers[4..]);
    // second level: (u0, u1), (u2)
    assert_eq!(sources_of(&physical, cascade[3])?, cascade[0..2]);
    assert_eq!(sources_of(&physical, cascade[4])?, cascade[2..3]);

    assert_eq!(sources_of(&physical, final_unifier)?, cascade[3..]);
    assert_eq!(sources_of(&physical, consumers[0])?, vec![final_unifier]);
    physical.check_links()?;
    Ok(())
}

#[test]
fn test_cascade_size_and_fan_in() -> eyre::Result<()> {
    for limit in 2..=4 {
        for sources in 2..=20 {
            let topology = fan_out(1, limited(limit))?;
            let mut physical = PhysicalPlan::new();
            add_partitions(&mut physical, &topology.logical, topology.consumers[0], 1)?;
            let producers =
                add_partitions(&mut physical, &topology.logical, topology.producer, sources)?;

            let mut mapping = StreamMapping::new(topology.stream);
            mapping.set_sources(&topology.logical, &mut physical, &producers)?;

            let (cascading, top_level) = expected_cascade(sources, limit);
            assert_eq!(
                mapping.cascading_unifiers().len(),
                cascading,
                "{sources} sources, limit {limit}"
            );
            let final_unifier = mapping.final_unifier().expect("final unifier");
            assert_eq!(physical.operator(final_unifier)?.inputs().len(), top_level);
            assert_eq!(unifiers(&physical).len(), cascading + 1);
            for unifier in unifiers(&physical) {
                let fan_in = physical.operator(unifier)?.inputs().len();
                assert!(fan_in <= limit, "unifier {unifier} has fan-in {fan_in}");
                assert_eq!(physical.operator(unifier)?.outputs().len(), 1);
            }
            physical.check_links()?;
        }
    }
    Ok(())
}

#[test]
fn test_sources_within_limit_are_not_cascaded() -> eyre::Result<()> {
    let topology = fan_out(1, limited(4))?;
    let mut physical = PhysicalPlan::new();
    add_partitions(&mut physical, &topology.logical, topology.consumers[0], 1)?;
    let producers = add_partitions(&mut physical, &topology.logical, topology.producer, 4)?;

    let mut mapping = StreamMapping::new(topology.stream);
    mapping.set_sources(&topology.logical, &mut physical, &producers)?;

    assert!(mapping.cascading_unifiers().is_empty());
    let final_unifier = mapping.final_unifier().expect("final unifier");
    assert_eq!(sources_of(&physical, final_unifier)?, producers);
    Ok(())
}

#[test]
fn test_cascade_is_reused_on_recompute() -> eyre::Result<()> {
    let topology = fan_out(1, limited(2))?;
    let mut physical = PhysicalPlan::new();
    add_partitions(&mut physical, &topology.logical, topology.consumers[0], 1)?;
    let producers = add_partitions(&mut physical, &topology.logical, topology.producer, 5)?;

    let mut mapping = StreamMapping::new(topology.stream);
    mapping.set_sources(&topology.logical, &mut physical, &producers)?;
    let cascade = mapping.cascading_unifiers().clone();
    let before = TopologySnapshot::capture(&topology.logical, &physical)?;

    let delta = mapping.recompute(&topology.logical, &mut physical)?;
    assert!(delta.created.is_empty());
    assert!(delta.removed.is_empty());
    // the whole cascade was rewired
    assert_eq!(delta.redeploy().count(), cascade.len());
    assert_eq!(mapping.cascading_unifiers(), &cascade);
    assert_eq!(TopologySnapshot::capture(&topology.logical, &physical)?, before);
    Ok(())
}

#[test]
fn test_shrinking_cascade_releases_unused_unifiers() -> eyre::Result<()> {
    let topology = fan_out(1, limited(2))?;
    let mut physical = PhysicalPlan::new();
    let consumers = add_partitions(&mut physical, &topology.logical, topology.consumers[0], 1)?;
    let producers = add_partitions(&mut physical, &topology.logical, topology.producer, 9)?;

    let mut mapping = StreamMapping::new(topology.stream);
    mapping.set_sources(&topology.logical, &mut physical, &producers)?;
    let old_cascade: Vec<OperatorId> = mapping.cascading_unifiers().iter().copied().collect();
    assert_eq!(old_cascade.len(), expected_cascade(9, 2).0);

    let delta = mapping.set_sources(&topology.logical, &mut physical, &producers[..5])?;
    let new_cascade: Vec<OperatorId> = mapping.cascading_unifiers().iter().copied().collect();
    assert_eq!(new_cascade.len(), 5);
    assert!(delta.created.is_empty());
    // pooled unifiers are taken in their previous order
    assert_eq!(new_cascade, old_cascade[..5]);
    assert_eq!(delta.removed.iter().copied().collect::<Vec<_>>(), old_cascade[5..]);
    assert_eq!(delta.redeploy().count(), 5);
    for removed in &old_cascade[5..] {
        assert!(physical.operator(*removed).is_err());
    }
    let final_unifier = mapping.final_unifier().expect("final unifier");
    assert_eq!(sources_of(&physical, consumers[0])?, vec![final_unifier]);
    for stale in &producers[5..] {
        let output = physical.operator(*stale)?.outputs()[0];
        assert!(physical.output(output)?.sinks().is_empty());
    }
    physical.check_links()?;
    Ok(())
}

#[test]
fn test_cascade_collapses_to_single_source() -> eyre::Result<()> {
    let topology = fan_out(1, limited(2))?;
    let mut physical = PhysicalPlan::new();
    let consumers = add_partitions(&mut physical, &topology.logical, topology.consumers[0], 1)?;
    let producers = add_partitions(&mut physical, &topology.logical, topology.producer, 5)?;

    let mut mapping = StreamMapping::new(topology.stream);
    mapping.set_sources(&topology.logical, &mut physical, &producers)?;

    let delta = mapping.set_sources(&topology.logical, &mut physical, &producers[..1])?;
    assert_eq!(delta.removed.len(), 6);
    assert!(unifiers(&physical).is_empty());
    assert_eq!(mapping.unifiers().count(), 0);
    assert_eq!(sources_of(&physical, consumers[0])?, vec![producers[0]]);
    physical.check_links()?;
    Ok(())
}

#[test]
fn test_plan_default_limit_applies_to_ports_without_one() -> eyre::Result<()> {
    let config = Config::default().with_unifier_limit(3)?;
    let topology = fan_out_with_config(1, OutputPortAttributes::default(), config)?;
    let mut physical = PhysicalPlan::new();
    add_partitions(&mut physical, &topology.logical, topology.consumers[0], 1)?;
    let producers = add_partitions(&mut physical, &topology.logical, topology.producer, 7)?;

    let mut mapping = StreamMapping::new(topology.stream);
    mapping.set_sources(&topology.logical, &mut physical, &producers)?;
    assert_eq!(mapping.cascading_unifiers().len(), expected_cascade(7, 3).0);

    let config = Config::default().with_unifier_limit(3)?;
    let topology = fan_out_with_config(1, limited(8), config)?;
    let mut physical = PhysicalPlan::new();
    add_partitions(&mut physical, &topology.logical, topology.consumers[0], 1)?;
    let producers = add_partitions(&mut physical, &topology.logical, topology.producer, 7)?;

    let mut mapping = StreamMapping::new(topology.stream);
    mapping.set_sources(&topology.logical, &mut physical, &producers)?;
    assert!(mapping.cascading_unifiers().is_empty());
    Ok(())
}
