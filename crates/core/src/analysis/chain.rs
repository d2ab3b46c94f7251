//! Call-chain traversal.
//!
//! Breadth-first walk from a seed function: callers are always followed,
//! callees only on request. Each function is expanded in the direction it
//! was reached from, so the walk fans out from the seed instead of bouncing
//! between neighbours.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::classify::{classify_function, SpecialKind};
use crate::analysis::context::{discover_callees, discover_callers};
use crate::model::FunctionAddress;
use crate::oracle::SymbolOracle;

/// Upper bound accepted for `max_depth`.
pub const MAX_CHAIN_DEPTH: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainOptions {
    pub max_depth: u32,
    pub include_callees: bool,
    /// Record special neighbours without expanding them instead of dropping them.
    pub keep_special_leaves: bool,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self { max_depth: 3, include_callees: false, keep_special_leaves: false }
    }
}

impl ChainOptions {
    pub fn clamp_depth(depth: u32) -> u32 {
        depth.clamp(1, MAX_CHAIN_DEPTH)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Reached as a callee; expand its callees.
    Forward,
    /// Reached as a caller (or the seed); expand its callers.
    Reverse,
}

struct SpecialCache<'a> {
    oracle: &'a dyn SymbolOracle,
    kinds: HashMap<FunctionAddress, SpecialKind>,
}

impl SpecialCache<'_> {
    fn is_special(&mut self, func: FunctionAddress) -> bool {
        let oracle = self.oracle;
        self.kinds.entry(func).or_insert_with(|| classify_function(oracle, func)).is_special()
    }
}

/// Ordered, duplicate-free work-list starting at `seed`.
pub fn build_chain(
    oracle: &dyn SymbolOracle,
    seed: FunctionAddress,
    options: &ChainOptions,
) -> Vec<FunctionAddress> {
    let mut chain = vec![seed];
    let mut visited: HashSet<FunctionAddress> = HashSet::from([seed]);
    let mut special = SpecialCache { oracle, kinds: HashMap::new() };

    // Callees are expanded before callers on every level.
    let mut frontier: VecDeque<(FunctionAddress, Direction)> = VecDeque::new();
    if options.include_callees {
        frontier.push_back((seed, Direction::Forward));
    }
    frontier.push_back((seed, Direction::Reverse));

    let max_depth = options.max_depth.min(MAX_CHAIN_DEPTH);
    let mut depth = 0;
    while !frontier.is_empty() && depth < max_depth {
        depth += 1;
        let mut next = VecDeque::new();
        while let Some((current, direction)) = frontier.pop_front() {
            let neighbours: Vec<FunctionAddress> = match direction {
                Direction::Forward => match oracle.function(current.0) {
                    Some(info) => discover_callees(oracle, &info).into_iter().map(|c| c.address).collect(),
                    None => Vec::new(),
                },
                Direction::Reverse => {
                    discover_callers(oracle, current).into_iter().map(|c| c.address).collect()
                }
            };
            for neighbour in neighbours {
                if visited.contains(&neighbour) {
                    continue;
                }
                if special.is_special(neighbour) {
                    if options.keep_special_leaves {
                        visited.insert(neighbour);
                        chain.push(neighbour);
                    }
                    continue;
                }
                visited.insert(neighbour);
                chain.push(neighbour);
                next.push_back((neighbour, direction));
            }
        }
        debug!(depth, discovered = chain.len(), "chain level expanded");
        frontier = next;
    }

    chain
}

/// The seed followed by every function its call instructions target
/// directly, in discovery order.
pub fn visible_functions(oracle: &dyn SymbolOracle, seed: FunctionAddress) -> Vec<FunctionAddress> {
    let mut out = vec![seed];
    let mut seen: HashSet<FunctionAddress> = HashSet::from([seed]);
    let Ok(instructions) = oracle.instructions(seed) else {
        return out;
    };
    for insn in instructions.iter().filter(|insn| insn.is_call) {
        for xref in oracle.xrefs_from(insn.address) {
            if !xref.kind.is_call() {
                continue;
            }
            if let Some(target) = oracle.function_containing(xref.to) {
                if seen.insert(target.address) {
                    out.push(target.address);
                }
            }
        }
    }
    out
}
