use std::collections::HashMap;

use crate::error::SolverError;

use super::{Nfa, MAX_STATES};

/// One outgoing edge group: every symbol in `mask` leads to `state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfaTransition {
    pub state: usize,
    pub mask: u16,
}

#[derive(Debug, Clone)]
pub struct DfaState {
    pub accepting: bool,
    /// Disjoint symbol masks with pairwise distinct destinations.
    pub transitions: Vec<DfaTransition>,
}

/// A deterministic automaton with destination-grouped transition masks,
/// built from an epsilon-closed NFA by subset construction.
#[derive(Debug, Clone)]
pub struct Dfa {
    pub num_symbols: usize,
    pub start_state: usize,
    pub states: Vec<DfaState>,
}

impl Dfa {
    pub fn from_nfa(nfa: &Nfa) -> Result<Dfa, SolverError> {
        assert!(
            !nfa.has_epsilon(),
            "subset construction needs an epsilon-closed NFA"
        );

        let mut subset_ids: HashMap<Vec<usize>, usize> = HashMap::new();
        let mut subsets: Vec<Vec<usize>> = Vec::new();
        let mut states: Vec<DfaState> = Vec::new();

        let mut start_subset: Vec<usize> = nfa.start_ids().to_vec();
        start_subset.sort_unstable();
        start_subset.dedup();

        subset_ids.insert(start_subset.clone(), 0);
        subsets.push(start_subset);
        states.push(DfaState {
            accepting: false,
            transitions: Vec::new(),
        });

        let mut next = 0;
        while next < subsets.len() {
            let subset = subsets[next].clone();
            states[next].accepting = subset.iter().any(|&s| nfa.is_accepting(s));

            // Destination subset per symbol, then grouped by destination.
            let mut by_target: Vec<(Vec<usize>, u16)> = Vec::new();
            for symbol in 0..nfa.num_symbols {
                let mut target: Vec<usize> = Vec::new();
                for &s in &subset {
                    target.extend_from_slice(nfa.targets(s, symbol));
                }
                target.sort_unstable();
                target.dedup();
                if target.is_empty() {
                    continue;
                }
                match by_target.iter_mut().find(|(t, _)| *t == target) {
                    Some((_, mask)) => *mask |= 1 << symbol,
                    None => by_target.push((target, 1 << symbol)),
                }
            }

            for (target, mask) in by_target {
                let id = match subset_ids.get(&target) {
                    Some(&id) => id,
                    None => {
                        if subsets.len() >= MAX_STATES {
                            return Err(SolverError::StateLimitExceeded(MAX_STATES));
                        }
                        let id = subsets.len();
                        subset_ids.insert(target.clone(), id);
                        subsets.push(target);
                        states.push(DfaState {
                            accepting: false,
                            transitions: Vec::new(),
                        });
                        id
                    }
                };
                states[next].transitions.push(DfaTransition { state: id, mask });
            }

            next += 1;
        }

        Ok(Dfa {
            num_symbols: nfa.num_symbols,
            start_state: 0,
            states,
        })
    }

    /// Moore minimisation: split by acceptance, refine on transition
    /// signatures until stable, then rebuild with merged destinations.
    pub fn minimize(&self) -> Dfa {
        let n = self.states.len();
        let mut partition: Vec<usize> = self
            .states
            .iter()
            .map(|s| s.accepting as usize)
            .collect();

        // Per-state, per-symbol destination for signature building.
        let mut dest = vec![vec![usize::MAX; self.num_symbols]; n];
        for (s, state) in self.states.iter().enumerate() {
            for t in &state.transitions {
                let mut mask = t.mask;
                while mask != 0 {
                    let symbol = mask.trailing_zeros() as usize;
                    mask &= mask - 1;
                    dest[s][symbol] = t.state;
                }
            }
        }

        loop {
            let mut signatures: HashMap<Vec<usize>, usize> = HashMap::new();
            let mut next_partition = vec![0; n];
            for s in 0..n {
                let mut signature = Vec::with_capacity(self.num_symbols + 1);
                signature.push(partition[s]);
                for symbol in 0..self.num_symbols {
                    signature.push(match dest[s][symbol] {
                        usize::MAX => usize::MAX,
                        d => partition[d],
                    });
                }
                let next_id = signatures.len();
                next_partition[s] = *signatures.entry(signature).or_insert(next_id);
            }
            if next_partition == partition {
                break;
            }
            partition = next_partition;
        }

        let num_classes = partition.iter().max().map_or(0, |&m| m + 1);
        let mut states = vec![
            DfaState {
                accepting: false,
                transitions: Vec::new(),
            };
            num_classes
        ];
        let mut seen = vec![false; num_classes];
        for s in 0..n {
            let class = partition[s];
            if seen[class] {
                continue;
            }
            seen[class] = true;
            states[class].accepting = self.states[s].accepting;
            // Regroup the masks by destination class.
            for symbol in 0..self.num_symbols {
                let d = dest[s][symbol];
                if d == usize::MAX {
                    continue;
                }
                let target = partition[d];
                match states[class]
                    .transitions
                    .iter_mut()
                    .find(|t| t.state == target)
                {
                    Some(t) => t.mask |= 1 << symbol,
                    None => states[class].transitions.push(DfaTransition {
                        state: target,
                        mask: 1 << symbol,
                    }),
                }
            }
        }

        Dfa {
            num_symbols: self.num_symbols,
            start_state: partition[self.start_state],
            states,
        }
    }

    pub fn accepts(&self, input: &[usize]) -> bool {
        let mut state = self.start_state;
        for &symbol in input {
            let bit = 1u16 << symbol;
            match self.states[state]
                .transitions
                .iter()
                .find(|t| t.mask & bit != 0)
            {
                Some(t) => state = t.state,
                None => return false,
            }
        }
        self.states[state].accepting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfa::regex_parser;

    fn dfa_for(pattern: &str, num_symbols: usize) -> Dfa {
        let nfa = regex_parser::compile(pattern, num_symbols).unwrap();
        Dfa::from_nfa(&nfa).unwrap().minimize()
    }

    #[test]
    fn dfa_matches_nfa_language() {
        let dfa = dfa_for("(12)+", 9);
        assert!(dfa.accepts(&[0, 1]));
        assert!(dfa.accepts(&[0, 1, 0, 1]));
        assert!(!dfa.accepts(&[0]));
        assert!(!dfa.accepts(&[0, 1, 0]));
    }

    #[test]
    fn masks_are_disjoint_with_distinct_destinations() {
        let dfa = dfa_for("[1-4][1-4]|[5-9].", 9);
        for state in &dfa.states {
            let mut union = 0u16;
            for t in &state.transitions {
                assert_eq!(union & t.mask, 0);
                union |= t.mask;
            }
            let destinations: Vec<usize> = state.transitions.iter().map(|t| t.state).collect();
            let mut deduped = destinations.clone();
            deduped.sort_unstable();
            deduped.dedup();
            assert_eq!(deduped.len(), destinations.len());
        }
    }

    #[test]
    fn minimisation_collapses_equivalent_states() {
        // Both alternatives reach equivalent accepting tails.
        let dfa_raw = {
            let nfa = regex_parser::compile("12|32", 9).unwrap();
            Dfa::from_nfa(&nfa).unwrap()
        };
        let dfa_min = dfa_raw.minimize();
        assert!(dfa_min.states.len() <= dfa_raw.states.len());
        assert!(dfa_min.accepts(&[0, 1]));
        assert!(dfa_min.accepts(&[2, 1]));
        assert!(!dfa_min.accepts(&[1, 1]));
    }

    #[test]
    fn exhaustive_agreement_with_nfa() {
        let nfa = regex_parser::compile("1*2{2}|[3-5]+", 6).unwrap();
        let dfa = Dfa::from_nfa(&nfa).unwrap().minimize();
        // Compare on every string of length up to 4.
        let mut inputs: Vec<Vec<usize>> = vec![vec![]];
        for _ in 0..4 {
            let mut next = Vec::new();
            for input in &inputs {
                for s in 0..6 {
                    let mut extended = input.clone();
                    extended.push(s);
                    next.push(extended);
                }
            }
            for input in &next {
                assert_eq!(nfa.accepts(input), dfa.accepts(input), "on {:?}", input);
            }
            inputs = next;
        }
    }
}
