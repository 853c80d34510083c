//! Capacity arithmetic and the deferred scale-down
use std::collections::BTreeMap;

use super::Direction;
use crate::backend::{ProvisionedCapacity, Resource, TableBackend};
use crate::config::ScalingConfig;
use crate::error::Error;

/// Capacity after one scale-up step in `direction`
///
/// The other direction is left as it is. A value already at or above the
/// maximum is never lowered here.
pub(crate) fn raised(
    current: ProvisionedCapacity,
    direction: Direction,
    config: &ScalingConfig,
) -> ProvisionedCapacity {
    let (base, max) = direction.bounds(config);
    let value = direction.of(current);

    if value >= max {
        return current;
    }

    let scaled = (value as f64 * config.scale_up_factor).ceil() as i64;
    direction.with(current, scaled.max(value).max(base).min(max))
}

/// Value a scale-down lowers `current` to
///
/// Only a value above base that this invocation raised it to (or that has
/// since dropped below that level) is lowered; a higher value belongs to a
/// later scale-up.
pub(crate) fn lowered(current: i64, raised_to: i64, base: i64) -> i64 {
    if current > base && current <= raised_to {
        base
    } else {
        current
    }
}

/// Lowering owed by one successful scaled invocation
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScaleDownPlan {
    pub(crate) direction: Direction,
    pub(crate) base: i64,
    /// Highest level this invocation raised each resource to
    pub(crate) levels: BTreeMap<Resource, i64>,
}

impl ScaleDownPlan {
    pub(crate) fn new(direction: Direction, config: &ScalingConfig) -> Self {
        Self {
            direction,
            base: direction.bounds(config).0,
            levels: BTreeMap::new(),
        }
    }

    pub(crate) fn record(&mut self, resource: Resource, level: i64) {
        let entry = self.levels.entry(resource).or_insert(level);
        *entry = (*entry).max(level);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Re-read every raised resource and lower those still owned by this plan
    ///
    /// Returns the number of resources lowered.
    pub(crate) async fn run(&self, backend: &dyn TableBackend) -> Result<usize, Error> {
        let mut lowered_count = 0;

        for (resource, raised_to) in &self.levels {
            let current = backend.describe_capacity(resource).await?;
            let value = self.direction.of(current.capacity);
            let target = lowered(value, *raised_to, self.base);

            if target == value {
                tracing::debug!(
                    resource = %resource,
                    direction = %self.direction,
                    current = value,
                    raised_to = *raised_to,
                    "Scale-down not needed"
                );
                continue;
            }

            tracing::info!(
                resource = %resource,
                direction = %self.direction,
                from = value,
                to = target,
                "Scaling down capacity"
            );
            backend
                .update_capacity(resource, self.direction.with(current.capacity, target))
                .await?;
            lowered_count += 1;
        }

        Ok(lowered_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryBackend;
    use crate::config::{IndexSchema, TableSchema};

    fn config() -> ScalingConfig {
        ScalingConfig {
            max_write_capacity: 50,
            ..Default::default()
        }
    }

    #[test]
    fn test_write_scale_up_sequence_is_capped() {
        let config = config();
        let mut capacity = ProvisionedCapacity::new(5, 5);
        let mut writes = Vec::new();

        for _ in 0..4 {
            capacity = raised(capacity, Direction::Write, &config);
            writes.push(capacity.write);
        }

        assert_eq!(writes, vec![10, 20, 40, 50]);
        assert_eq!(capacity.read, 5);
    }

    #[test]
    fn test_raise_rounds_up_and_respects_base() {
        let config = ScalingConfig {
            scale_up_factor: 1.5,
            base_read_capacity: 4,
            ..Default::default()
        };

        assert_eq!(raised(ProvisionedCapacity::new(5, 1), Direction::Read, &config).read, 8);
        assert_eq!(raised(ProvisionedCapacity::new(1, 1), Direction::Read, &config).read, 4);
    }

    #[test]
    fn test_raise_never_lowers_capacity_above_max() {
        let config = config();
        let current = ProvisionedCapacity::new(5, 80);
        assert_eq!(raised(current, Direction::Write, &config), current);
    }

    #[test]
    fn test_lowered_respects_watermark() {
        assert_eq!(lowered(40, 40, 5), 5);
        assert_eq!(lowered(20, 40, 5), 5);
        assert_eq!(lowered(80, 40, 5), 80);
        assert_eq!(lowered(5, 40, 5), 5);
        assert_eq!(lowered(3, 40, 5), 3);
    }

    #[test]
    fn test_plan_keeps_highest_level() {
        let mut plan = ScaleDownPlan::new(Direction::Write, &config());
        plan.record(Resource::Table, 10);
        plan.record(Resource::Table, 40);
        plan.record(Resource::Table, 20);

        assert_eq!(plan.levels.get(&Resource::Table), Some(&40));
        assert_eq!(plan.base, 5);
    }

    #[tokio::test]
    async fn test_plan_lowers_only_owned_resources() {
        let schema = TableSchema::new("t").with_index(IndexSchema::new("gsi1", "gsi1pk", "gsi1sk"));
        let backend = InMemoryBackend::new(schema);
        let index = Resource::Index("gsi1".to_string());
        backend
            .set_capacity(Resource::Table, ProvisionedCapacity::new(5, 40))
            .await;
        backend
            .set_capacity(index.clone(), ProvisionedCapacity::new(5, 80))
            .await;

        let mut plan = ScaleDownPlan::new(Direction::Write, &config());
        plan.record(Resource::Table, 40);
        plan.record(index.clone(), 40);

        let lowered = plan.run(&backend).await.unwrap();

        assert_eq!(lowered, 1);
        let updates = backend.capacity_updates().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].resource, Resource::Table);
        assert_eq!(updates[0].capacity, ProvisionedCapacity::new(5, 5));
    }
}
