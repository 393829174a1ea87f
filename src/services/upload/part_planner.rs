//! Part size and count selection. Pure and deterministic.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use super::UploadError;

pub const MIB: u64 = 1024 * 1024;

/// Backends reject non-final parts smaller than this.
pub const MIN_PART_SIZE: u64 = 5 * MIB;
pub const DEFAULT_PART_SIZE: u64 = 10 * MIB;
pub const MAX_PART_SIZE: u64 = 5 * 1024 * MIB;
/// Highest part number a session accepts.
pub const MAX_PART_COUNT: u64 = 10_000;

/// Part size bounds; `target` is clamped into `min..=max`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartSizePolicy {
    pub target: u64,
    pub min: u64,
    pub max: u64,
}

impl Default for PartSizePolicy {
    fn default() -> Self {
        Self {
            target: DEFAULT_PART_SIZE,
            min: MIN_PART_SIZE,
            max: MAX_PART_SIZE,
        }
    }
}

impl PartSizePolicy {
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.min == 0 {
            return Err(UploadError::InvalidConfig(
                "minimum part size must be positive".into(),
            ));
        }
        if self.min > self.max {
            return Err(UploadError::InvalidConfig(format!(
                "minimum part size {} exceeds maximum {}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// How a file of `total_size` bytes is split.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartPlan {
    pub total_size: u64,
    pub part_size: u64,
    pub part_count: u32,
}

impl PartPlan {
    pub fn part_numbers(&self) -> RangeInclusive<u32> {
        1..=self.part_count
    }

    /// `(offset, length)` of a 1-based part, or `None` when out of range.
    /// Only the last part may be shorter than `part_size`.
    pub fn part_range(&self, part_number: u32) -> Option<(u64, u64)> {
        if part_number == 0 || part_number > self.part_count {
            return None;
        }
        let offset = (part_number as u64 - 1) * self.part_size;
        let len = self.part_size.min(self.total_size - offset);
        Some((offset, len))
    }
}

/// Decide the part size and count for a file.
///
/// Files no larger than `policy.min` travel as one part of their own size.
pub fn plan_parts(total_size: u64, policy: &PartSizePolicy) -> Result<PartPlan, UploadError> {
    policy.validate()?;
    if total_size == 0 {
        return Err(UploadError::InvalidPlan("file is empty".into()));
    }

    if total_size <= policy.min {
        return Ok(PartPlan {
            total_size,
            part_size: total_size,
            part_count: 1,
        });
    }

    let part_size = policy.target.clamp(policy.min, policy.max);
    let part_count = total_size.div_ceil(part_size);
    if part_count > MAX_PART_COUNT {
        return Err(UploadError::InvalidPlan(format!(
            "{} bytes at {} bytes per part needs {} parts (limit {})",
            total_size, part_size, part_count, MAX_PART_COUNT
        )));
    }

    Ok(PartPlan {
        total_size,
        part_size,
        part_count: part_count as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(plan: &PartPlan) -> Vec<u64> {
        plan.part_numbers()
            .map(|n| plan.part_range(n).unwrap().1)
            .collect()
    }

    #[test]
    fn small_file_is_a_single_part() {
        let plan = plan_parts(3 * MIB, &PartSizePolicy::default()).unwrap();
        assert_eq!(plan.part_count, 1);
        assert_eq!(plan.part_size, 3 * MIB);
        assert_eq!(plan.part_range(1), Some((0, 3 * MIB)));
    }

    #[test]
    fn exactly_minimum_is_a_single_part() {
        let plan = plan_parts(MIN_PART_SIZE, &PartSizePolicy::default()).unwrap();
        assert_eq!(plan.part_count, 1);
        assert_eq!(plan.part_size, MIN_PART_SIZE);
    }

    #[test]
    fn uneven_file_has_short_last_part() {
        let plan = plan_parts(27 * MIB, &PartSizePolicy::default()).unwrap();
        assert_eq!(plan.part_count, 3);
        assert_eq!(sizes(&plan), vec![10 * MIB, 10 * MIB, 7 * MIB]);
    }

    #[test]
    fn hundred_mib_is_ten_parts() {
        let plan = plan_parts(100 * MIB, &PartSizePolicy::default()).unwrap();
        assert_eq!(plan.part_count, 10);
        assert!(sizes(&plan).iter().all(|&s| s == 10 * MIB));
    }

    #[test]
    fn target_is_clamped_into_bounds() {
        let policy = PartSizePolicy {
            target: MIB,
            ..PartSizePolicy::default()
        };
        let plan = plan_parts(12 * MIB, &policy).unwrap();
        assert_eq!(plan.part_size, MIN_PART_SIZE);
        assert_eq!(plan.part_count, 3);

        let policy = PartSizePolicy {
            target: 100,
            min: 10,
            max: 40,
        };
        assert_eq!(plan_parts(1000, &policy).unwrap().part_size, 40);
    }

    #[test]
    fn parts_cover_the_file_exactly() {
        let policy = PartSizePolicy {
            target: 7,
            min: 3,
            max: 64,
        };
        for total in 1..=200u64 {
            let plan = plan_parts(total, &policy).unwrap();
            let sizes = sizes(&plan);
            assert_eq!(sizes.iter().sum::<u64>(), total, "total {}", total);
            assert_eq!(sizes.len() as u32, plan.part_count);
            let (last, rest) = sizes.split_last().unwrap();
            assert!(rest.iter().all(|&s| s == plan.part_size));
            assert!(*last > 0 && *last <= plan.part_size);
            if total <= policy.min {
                assert_eq!(plan.part_count, 1);
                assert_eq!(plan.part_size, total);
            }
        }
    }

    #[test]
    fn out_of_range_part_numbers() {
        let plan = plan_parts(27 * MIB, &PartSizePolicy::default()).unwrap();
        assert_eq!(plan.part_range(0), None);
        assert_eq!(plan.part_range(4), None);
        assert_eq!(plan.part_range(3), Some((20 * MIB, 7 * MIB)));
    }

    #[test]
    fn rejects_empty_files_and_bad_policies() {
        assert!(matches!(
            plan_parts(0, &PartSizePolicy::default()),
            Err(UploadError::InvalidPlan(_))
        ));
        let inverted = PartSizePolicy {
            target: 10,
            min: 20,
            max: 5,
        };
        assert!(matches!(
            plan_parts(100, &inverted),
            Err(UploadError::InvalidConfig(_))
        ));
    }

    #[test]
    fn too_many_parts_is_an_error() {
        let policy = PartSizePolicy {
            target: 1,
            min: 1,
            max: 1,
        };
        assert!(plan_parts(MAX_PART_COUNT, &policy).is_ok());
        assert!(matches!(
            plan_parts(MAX_PART_COUNT + 1, &policy),
            Err(UploadError::InvalidPlan(_))
        ));
    }
}
