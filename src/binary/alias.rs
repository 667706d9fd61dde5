// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Alias propagation (spec.md §4.10 "Alias propagation", §9 redesign note
// "Cyclic references between variable and its aliases: arena + index").
// Builds a target-handle -> referring-handles map from one block's decoded
// chain table, then the caller multiplexes every chunk emission on a target
// handle to its aliases as well.

use std::collections::HashMap;

use crate::binary::vc::ChainSlot;
use crate::error::{DecodeError, Result};

/// `target handle -> every handle in this block's chain table that aliases
/// it`. Built once per value-change block.
pub fn build_alias_map(chain: &[ChainSlot]) -> Result<HashMap<u32, Vec<u32>>> {
    let mut map: HashMap<u32, Vec<u32>> = HashMap::new();
    for (handle, slot) in chain.iter().enumerate().skip(1) {
        if let ChainSlot::Alias { target } = slot {
            let target = *target;
            if target == 0 || target as usize >= chain.len() {
                return Err(DecodeError::invariant(
                    &[],
                    handle as u64,
                    format!("alias handle {handle} references out-of-range target {target}"),
                ));
            }
            // spec.md §8 "Alias closure is acyclic: for any handle H that
            // references T, T is not an alias."
            if matches!(chain[target as usize], ChainSlot::Alias { .. }) {
                return Err(DecodeError::invariant(
                    &[],
                    handle as u64,
                    format!("alias handle {handle} targets another alias ({target}), not a data handle"),
                ));
            }
            map.entry(target).or_default().push(handle as u32);
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_target_to_its_aliases() {
        let chain = vec![
            ChainSlot::Empty,
            ChainSlot::Data { offset: 1, length: 10 },
            ChainSlot::Alias { target: 1 },
            ChainSlot::Alias { target: 1 },
        ];
        let map = build_alias_map(&chain).unwrap();
        let mut aliases = map.get(&1).cloned().unwrap();
        aliases.sort();
        assert_eq!(aliases, vec![2, 3]);
    }

    #[test]
    fn rejects_alias_chains_through_another_alias() {
        let chain = vec![
            ChainSlot::Empty,
            ChainSlot::Alias { target: 2 },
            ChainSlot::Alias { target: 3 },
            ChainSlot::Data { offset: 1, length: 5 },
        ];
        let err = build_alias_map(&chain).unwrap_err();
        assert!(matches!(err, DecodeError::InvariantViolation { .. }));
    }

    #[test]
    fn rejects_out_of_range_target() {
        let chain = vec![ChainSlot::Empty, ChainSlot::Alias { target: 99 }];
        assert!(build_alias_map(&chain).is_err());
    }
}
