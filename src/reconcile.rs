//! Drift detection between declared and observed parameters.

use crate::params::{ParamMap, ParamValue};

/// Returns `true` when any field declared in `desired` differs from the
/// observed, already normalized `current` mapping.
///
/// Only declared fields are compared: extra fields carried by the remote
/// struct never force an update. A declared field that is absent from
/// `current` counts as drift.
pub fn needs_update(desired: &ParamMap, current: &ParamMap) -> bool {
    desired
        .iter()
        .any(|(key, value)| current.get(key) != Some(value))
}

/// Names of the declared fields that drifted, for logging.
pub(crate) fn drifted_fields<'a>(desired: &'a ParamMap, current: &ParamMap) -> Vec<&'a str> {
    desired
        .iter()
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(key, _)| key.as_str())
        .collect()
}

/// Compares a single sentinel field against its desired value.
///
/// Used for parameter classes where one field stands in for the whole
/// struct. An undeclared sentinel matches only an absent observed field.
pub(crate) fn sentinel_differs(desired: &ParamMap, current: &ParamValue, field: &str) -> bool {
    desired.get(field) != current.field(field)
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, U256, address};
    use proptest::prelude::*;

    use super::*;
    use crate::param_map;
    use crate::params::{RawStruct, normalize};

    const TREASURY: Address = address!("0x2222222222222222222222222222222222222222");

    #[test]
    fn unbounded_limits_match() {
        let desired = param_map! { "limits" => vec![U256::MAX] };
        let current = param_map! { "limits" => vec![U256::MAX] };

        assert!(!needs_update(&desired, &current));
    }

    #[test]
    fn changed_limit_is_drift() {
        let desired = param_map! { "limits" => vec![U256::MAX] };
        let current = param_map! { "limits" => vec![U256::from(1000)] };

        assert!(needs_update(&desired, &current));
        assert_eq!(drifted_fields(&desired, &current), vec!["limits"]);
    }

    #[test]
    fn list_order_matters() {
        let desired = param_map! { "redirects" => vec![1u64, 2] };
        let current = param_map! { "redirects" => vec![2u64, 1] };

        assert!(needs_update(&desired, &current));
    }

    #[test]
    fn undeclared_extra_fields_are_ignored() {
        let desired = param_map! { "strategyTreasury" => TREASURY };
        let current = param_map! {
            "strategyTreasury" => TREASURY,
            "managementFee" => 2_000_000_000u64,
        };

        assert!(!needs_update(&desired, &current));
    }

    #[test]
    fn missing_declared_field_is_drift() {
        let desired = param_map! { "strategyTreasury" => TREASURY };

        assert!(needs_update(&desired, &ParamMap::new()));
    }

    #[test]
    fn empty_desired_never_drifts() {
        let current = param_map! { "limits" => vec![1u64] };

        assert!(!needs_update(&ParamMap::new(), &current));
    }

    #[test]
    fn sentinel_compares_only_the_named_field() {
        let desired = param_map! {
            "strategyTreasury" => TREASURY,
            "redirects" => vec![5u64],
        };
        let observed = ParamValue::Raw(RawStruct::from_fields([
            (Some("strategyTreasury".to_owned()), TREASURY.into()),
            (Some("redirects".to_owned()), vec![9u64].into()),
        ]));

        assert!(!sentinel_differs(&desired, &observed, "strategyTreasury"));
        assert!(sentinel_differs(&desired, &observed, "redirects"));
    }

    fn arb_map() -> impl Strategy<Value = ParamMap> {
        prop::collection::btree_map(
            "[a-z]{1,6}",
            any::<u64>().prop_map(ParamValue::from),
            0..6,
        )
    }

    proptest! {
        #[test]
        fn projection_of_current_never_needs_update(
            current in arb_map(),
            extra in arb_map(),
            keep in any::<u8>(),
        ) {
            let desired: ParamMap = current
                .iter()
                .enumerate()
                .filter(|(index, _)| keep & (1 << (index % 8)) != 0)
                .map(|(_, (key, value))| (key.clone(), value.clone()))
                .collect();

            let mut observed = extra;
            observed.extend(current);
            let blob = ParamValue::Raw(RawStruct::from_fields(
                observed
                    .into_iter()
                    .map(|(key, value)| (Some(key), value)),
            ));

            prop_assert!(!needs_update(&desired, &normalize(&blob)));
        }
    }
}
