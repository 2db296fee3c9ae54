//! Property tests for registry selection.
//!
//! For any sequence of registrations, a lookup returns a provider from the
//! lowest priority group containing an eligible member (capabilities cover
//! the request, circuit not open), or none when no member is eligible.

use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;

use meridian_core::protocols::RuntimeService;
use meridian_core::registry::{
    ProviderRegistration, ProviderRegistry, SelectionStrategy, ServiceKind, ServicePriority,
};
use meridian_core::time::ManualTimeService;

struct Plain;

#[async_trait]
impl RuntimeService for Plain {}

#[derive(Debug, Clone)]
struct ProviderSpec {
    priority: ServicePriority,
    group: i32,
    capabilities: Vec<String>,
    tripped: bool,
}

fn priority_strategy() -> impl Strategy<Value = ServicePriority> {
    prop_oneof![
        Just(ServicePriority::Critical),
        Just(ServicePriority::High),
        Just(ServicePriority::Normal),
        Just(ServicePriority::Low),
        Just(ServicePriority::Fallback),
    ]
}

fn provider_spec() -> impl Strategy<Value = ProviderSpec> {
    (
        priority_strategy(),
        0..4i32,
        proptest::collection::vec("[ab]", 0..3),
        any::<bool>(),
    )
        .prop_map(|(priority, group, capabilities, tripped)| ProviderSpec {
            priority,
            group,
            capabilities,
            tripped,
        })
}

proptest! {
    #[test]
    fn selection_picks_lowest_eligible_group(
        specs in proptest::collection::vec(provider_spec(), 0..12),
        required in proptest::collection::vec("[ab]", 0..2),
    ) {
        let time = Arc::new(ManualTimeService::new());
        let registry: ProviderRegistry<dyn RuntimeService> =
            ProviderRegistry::new(ServiceKind::Telemetry, time);

        for (i, spec) in specs.iter().enumerate() {
            registry.register(
                ProviderRegistration::new(format!("p{i}"), Arc::new(Plain) as _)
                    .with_priority(spec.priority)
                    .with_priority_group(spec.group)
                    .with_strategy(SelectionStrategy::Fallback)
                    .with_capabilities(spec.capabilities.clone()),
            );
        }
        // Trip the marked providers' breakers.
        let all = registry.candidates(None, &[]);
        for selected in &all {
            let index: usize = selected.name[1..].parse().unwrap();
            if specs[index].tripped {
                for _ in 0..5 {
                    selected.circuit.record_failure();
                }
            }
        }

        let required_refs: Vec<&str> = required.iter().map(String::as_str).collect();
        let eligible_groups: Vec<i32> = specs
            .iter()
            .filter(|s| !s.tripped)
            .filter(|s| required.iter().all(|cap| s.capabilities.contains(cap)))
            .map(|s| s.group)
            .collect();

        match registry.select(None, &required_refs) {
            Some(selected) => {
                let index: usize = selected.name[1..].parse().unwrap();
                let chosen = &specs[index];
                let min_group = eligible_groups.iter().min().copied().unwrap();
                prop_assert!(!chosen.tripped);
                prop_assert_eq!(chosen.group, min_group);
                prop_assert!(required.iter().all(|cap| chosen.capabilities.contains(cap)));
            }
            None => prop_assert!(eligible_groups.is_empty()),
        }
    }
}
