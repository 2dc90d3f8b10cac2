pub mod dfa;
pub mod regex_parser;
pub mod serialize;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;

use crate::error::SolverError;

/// Hard cap on machine size; a state machine that explodes past this is
/// rejected rather than ground through.
pub const MAX_STATES: usize = 4096;

/// A nondeterministic finite automaton over symbols `0..num_symbols`.
///
/// Mutable while being built; `seal` freezes it. The compilation pipeline
/// is: build → seal → `close_over_epsilon_transitions` →
/// `remove_dead_states` → `reduce_by_simulation`, then either simulate
/// directly or lower to a `Dfa`.
pub struct Nfa {
    pub num_symbols: usize,
    transitions: Vec<Vec<Vec<usize>>>,
    epsilon: Vec<Vec<usize>>,
    start_ids: Vec<usize>,
    accept: Vec<bool>,
    sealed: bool,
}

impl Nfa {
    pub fn new(num_symbols: usize) -> Nfa {
        Nfa {
            num_symbols,
            transitions: Vec::new(),
            epsilon: Vec::new(),
            start_ids: Vec::new(),
            accept: Vec::new(),
            sealed: false,
        }
    }

    pub fn num_states(&self) -> usize {
        self.transitions.len()
    }

    pub fn start_ids(&self) -> &[usize] {
        &self.start_ids
    }

    pub fn is_accepting(&self, state: usize) -> bool {
        self.accept[state]
    }

    pub fn targets(&self, state: usize, symbol: usize) -> &[usize] {
        &self.transitions[state][symbol]
    }

    pub fn has_epsilon(&self) -> bool {
        self.epsilon.iter().any(|e| !e.is_empty())
    }

    pub fn add_state(&mut self, accepting: bool) -> Result<usize, SolverError> {
        assert!(!self.sealed, "modifying a sealed NFA");
        if self.num_states() >= MAX_STATES {
            return Err(SolverError::StateLimitExceeded(MAX_STATES));
        }
        self.transitions.push(vec![Vec::new(); self.num_symbols]);
        self.epsilon.push(Vec::new());
        self.accept.push(accepting);
        Ok(self.num_states() - 1)
    }

    pub fn add_start(&mut self, state: usize) {
        assert!(!self.sealed, "modifying a sealed NFA");
        if !self.start_ids.contains(&state) {
            self.start_ids.push(state);
        }
    }

    pub fn add_transition(&mut self, from: usize, symbol: usize, to: usize) {
        assert!(!self.sealed, "modifying a sealed NFA");
        if !self.transitions[from][symbol].contains(&to) {
            self.transitions[from][symbol].push(to);
        }
    }

    pub fn add_epsilon(&mut self, from: usize, to: usize) {
        assert!(!self.sealed, "modifying a sealed NFA");
        if from != to && !self.epsilon[from].contains(&to) {
            self.epsilon[from].push(to);
        }
    }

    pub fn set_accepting(&mut self, state: usize, accepting: bool) {
        assert!(!self.sealed, "modifying a sealed NFA");
        self.accept[state] = accepting;
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Each state inherits the transitions and accepting status of all its
    /// epsilon-reachable descendants; the epsilon lists are then cleared.
    pub fn close_over_epsilon_transitions(&mut self) {
        let n = self.num_states();
        for state in 0..n {
            // Depth-first closure from this state.
            let mut seen = vec![false; n];
            let mut stack = self.epsilon[state].clone();
            seen[state] = true;
            while let Some(next) = stack.pop() {
                if seen[next] {
                    continue;
                }
                seen[next] = true;
                if self.accept[next] {
                    self.accept[state] = true;
                }
                for symbol in 0..self.num_symbols {
                    let targets = self.transitions[next][symbol].clone();
                    for t in targets {
                        if !self.transitions[state][symbol].contains(&t) {
                            self.transitions[state][symbol].push(t);
                        }
                    }
                }
                stack.extend(self.epsilon[next].iter().copied());
            }
        }
        for e in &mut self.epsilon {
            e.clear();
        }
    }

    /// Drops states that cannot sit on an accepting path, and (when a depth
    /// limit is given) states only reachable on paths longer than it.
    pub fn remove_dead_states(&mut self, max_depth: Option<usize>) {
        let n = self.num_states();

        // Forward BFS from the starts.
        let mut depth_from_start = vec![usize::MAX; n];
        let mut queue: VecDeque<usize> = VecDeque::new();
        for &s in &self.start_ids {
            if depth_from_start[s] == usize::MAX {
                depth_from_start[s] = 0;
                queue.push_back(s);
            }
        }
        while let Some(s) = queue.pop_front() {
            for symbol in 0..self.num_symbols {
                for &t in &self.transitions[s][symbol] {
                    if depth_from_start[t] == usize::MAX {
                        depth_from_start[t] = depth_from_start[s] + 1;
                        queue.push_back(t);
                    }
                }
            }
        }

        // Backward BFS from the accepts over the reversed machine.
        let mut reversed: Vec<Vec<usize>> = vec![Vec::new(); n];
        for s in 0..n {
            for symbol in 0..self.num_symbols {
                for &t in &self.transitions[s][symbol] {
                    reversed[t].push(s);
                }
            }
        }
        let mut depth_to_accept = vec![usize::MAX; n];
        for s in 0..n {
            if self.accept[s] {
                depth_to_accept[s] = 0;
                queue.push_back(s);
            }
        }
        while let Some(s) = queue.pop_front() {
            for &p in &reversed[s] {
                if depth_to_accept[p] == usize::MAX {
                    depth_to_accept[p] = depth_to_accept[s] + 1;
                    queue.push_back(p);
                }
            }
        }

        let mut remap = vec![-1i32; n];
        let mut next = 0;
        for s in 0..n {
            let alive = depth_from_start[s] != usize::MAX
                && depth_to_accept[s] != usize::MAX
                && match max_depth {
                    Some(limit) => depth_from_start[s] + depth_to_accept[s] <= limit,
                    None => true,
                };
            if alive {
                remap[s] = next;
                next += 1;
            }
        }
        self.remap_states(&remap);
    }

    /// Computes the forward-simulation preorder, prunes dominated
    /// transitions, and merges simulation-equivalent states.
    pub fn reduce_by_simulation(&mut self) {
        let n = self.num_states();
        if n == 0 {
            return;
        }

        // sim[s][t]: t simulates s.
        let mut sim = vec![vec![false; n]; n];
        for s in 0..n {
            for t in 0..n {
                sim[s][t] = !self.accept[s] || self.accept[t];
            }
        }

        // Iterative refinement to the greatest fixpoint.
        let mut changed = true;
        while changed {
            changed = false;
            for s in 0..n {
                for t in 0..n {
                    if !sim[s][t] {
                        continue;
                    }
                    'symbols: for symbol in 0..self.num_symbols {
                        for &sd in &self.transitions[s][symbol] {
                            let matched = self.transitions[t][symbol]
                                .iter()
                                .any(|&td| sim[sd][td]);
                            if !matched {
                                sim[s][t] = false;
                                changed = true;
                                break 'symbols;
                            }
                        }
                    }
                }
            }
        }

        // Drop transitions dominated by a sibling with the same symbol.
        for s in 0..n {
            for symbol in 0..self.num_symbols {
                let targets = &self.transitions[s][symbol];
                let keep: Vec<usize> = targets
                    .iter()
                    .copied()
                    .filter(|&u| {
                        !targets.iter().any(|&v| {
                            v != u && sim[u][v] && (!sim[v][u] || v < u)
                        })
                    })
                    .collect();
                self.transitions[s][symbol] = keep;
            }
        }

        // Dominated start states contribute nothing to the language.
        let starts = self.start_ids.clone();
        self.start_ids.retain(|&s| {
            !starts
                .iter()
                .any(|&t| t != s && sim[s][t] && (!sim[t][s] || t < s))
        });

        // Merge mutually-simulating states down to their lowest member.
        let mut remap = vec![-1i32; n];
        let mut representative = vec![usize::MAX; n];
        let mut next = 0;
        for s in 0..n {
            let mut rep = s;
            for t in 0..s {
                if sim[s][t] && sim[t][s] {
                    rep = t;
                    break;
                }
            }
            representative[s] = rep;
            if rep == s {
                remap[s] = next;
                next += 1;
            }
        }
        for s in 0..n {
            if representative[s] != s {
                remap[s] = remap[representative[s]];
            }
        }
        self.remap_states(&remap);
    }

    /// Applies an old-index → new-index map; `-1` removes the state.
    /// Merged states have their target lists deduplicated.
    pub fn remap_states(&mut self, remap: &[i32]) {
        let n = self.num_states();
        assert_eq!(remap.len(), n);
        let new_n = remap
            .iter()
            .map(|&i| if i < 0 { 0 } else { i as usize + 1 })
            .max()
            .unwrap_or(0);

        let mut transitions = vec![vec![Vec::new(); self.num_symbols]; new_n];
        let mut epsilon: Vec<Vec<usize>> = vec![Vec::new(); new_n];
        let mut accept = vec![false; new_n];

        for s in 0..n {
            if remap[s] < 0 {
                continue;
            }
            let ns = remap[s] as usize;
            accept[ns] = accept[ns] || self.accept[s];
            for symbol in 0..self.num_symbols {
                for &t in &self.transitions[s][symbol] {
                    if remap[t] >= 0 {
                        let nt = remap[t] as usize;
                        if !transitions[ns][symbol].contains(&nt) {
                            transitions[ns][symbol].push(nt);
                        }
                    }
                }
            }
            for &t in &self.epsilon[s] {
                if remap[t] >= 0 {
                    let nt = remap[t] as usize;
                    if nt != ns && !epsilon[ns].contains(&nt) {
                        epsilon[ns].push(nt);
                    }
                }
            }
        }

        let mut start_ids = Vec::new();
        for &s in &self.start_ids {
            if remap[s] >= 0 && !start_ids.contains(&(remap[s] as usize)) {
                start_ids.push(remap[s] as usize);
            }
        }

        self.transitions = transitions;
        self.epsilon = epsilon;
        self.accept = accept;
        self.start_ids = start_ids;
    }

    /// Direct simulation, for tests and spot checks.
    pub fn accepts(&self, input: &[usize]) -> bool {
        let n = self.num_states();
        let closure = |set: &mut Vec<bool>| {
            let mut queue: Vec<usize> = (0..n).filter(|&s| set[s]).collect();
            while let Some(s) = queue.pop() {
                for &t in &self.epsilon[s] {
                    if !set[t] {
                        set[t] = true;
                        queue.push(t);
                    }
                }
            }
        };

        let mut current = vec![false; n];
        for &s in &self.start_ids {
            current[s] = true;
        }
        closure(&mut current);

        for &symbol in input {
            let mut next = vec![false; n];
            for s in 0..n {
                if current[s] {
                    for &t in &self.transitions[s][symbol] {
                        next[t] = true;
                    }
                }
            }
            closure(&mut next);
            current = next;
        }

        (0..n).any(|s| current[s] && self.accept[s])
    }
}

/// Builds an NFA from a user state machine: explicit start states, a
/// transition function and an acceptance predicate. States are explored
/// breadth-first up to `max_depth` and capped at `MAX_STATES`.
pub fn build_from_state_machine<S, T, A>(
    num_symbols: usize,
    starts: Vec<S>,
    transition: T,
    accept: A,
    max_depth: Option<usize>,
) -> Result<Nfa, SolverError>
where
    S: Clone + Eq + Hash,
    T: Fn(&S, usize) -> Vec<S>,
    A: Fn(&S) -> bool,
{
    let mut nfa = Nfa::new(num_symbols);
    let mut ids: HashMap<S, usize> = HashMap::new();
    let mut queue: VecDeque<(S, usize)> = VecDeque::new();

    for start in starts {
        if ids.contains_key(&start) {
            return Err(SolverError::BadConstraint(
                "duplicate start state".to_string(),
            ));
        }
        let id = nfa.add_state(accept(&start))?;
        nfa.add_start(id);
        ids.insert(start.clone(), id);
        queue.push_back((start, 0));
    }

    while let Some((state, depth)) = queue.pop_front() {
        if let Some(limit) = max_depth {
            if depth >= limit {
                continue;
            }
        }
        let from = ids[&state];
        for symbol in 0..num_symbols {
            for next in transition(&state, symbol) {
                let to = match ids.get(&next) {
                    Some(&id) => id,
                    None => {
                        let id = nfa.add_state(accept(&next))?;
                        ids.insert(next.clone(), id);
                        queue.push_back((next.clone(), depth + 1));
                        id
                    }
                };
                nfa.add_transition(from, symbol, to);
            }
        }
    }

    nfa.seal();
    Ok(nfa)
}
