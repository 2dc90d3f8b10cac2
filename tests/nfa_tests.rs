use variant_sudoku_solver::nfa::dfa::Dfa;
use variant_sudoku_solver::nfa::serialize::{deserialize, serialize};
use variant_sudoku_solver::nfa::{build_from_state_machine, regex_parser};

fn all_inputs(num_symbols: usize, max_len: usize) -> Vec<Vec<usize>> {
    let mut inputs: Vec<Vec<usize>> = vec![vec![]];
    let mut frontier = inputs.clone();
    for _ in 0..max_len {
        let mut next = Vec::new();
        for input in &frontier {
            for s in 0..num_symbols {
                let mut extended = input.clone();
                extended.push(s);
                next.push(extended);
            }
        }
        inputs.extend(next.iter().cloned());
        frontier = next;
    }
    inputs
}

#[test]
fn compiled_patterns_survive_the_wire() {
    for pattern in ["(12)+", "1*2|34", "[1-3]{1,2}4?", "(1|2)(2|3)(3|4)"] {
        let nfa = regex_parser::compile(pattern, 4).unwrap();
        let decoded = deserialize(&serialize(&nfa)).unwrap();
        for input in all_inputs(4, 5) {
            assert_eq!(
                nfa.accepts(&input),
                decoded.accepts(&input),
                "{pattern} on {input:?}"
            );
        }
    }
}

#[test]
fn dfa_transition_masks_stay_deterministic() {
    for pattern in ["(12)+3?", "[1-4]+|2[3-4]*", "1.2.3"] {
        let nfa = regex_parser::compile(pattern, 4).unwrap();
        for dfa in [Dfa::from_nfa(&nfa).unwrap(), Dfa::from_nfa(&nfa).unwrap().minimize()] {
            for state in &dfa.states {
                let mut union = 0u16;
                for t in &state.transitions {
                    assert_eq!(union & t.mask, 0, "masks overlap in {pattern}");
                    union |= t.mask;
                }
                let mut destinations: Vec<usize> =
                    state.transitions.iter().map(|t| t.state).collect();
                destinations.sort_unstable();
                destinations.dedup();
                assert_eq!(destinations.len(), state.transitions.len());
            }
        }
    }
}

#[test]
fn state_machine_lines_compile_to_automata() {
    // Running total modulo 5; accept when the total is 0.
    let nfa = build_from_state_machine(
        4,
        vec![0u32],
        |&total, symbol| vec![(total + symbol as u32 + 1) % 5],
        |&total| total == 0,
        None,
    )
    .unwrap();

    let dfa = Dfa::from_nfa(&nfa).unwrap().minimize();
    assert!(dfa.accepts(&[0, 3])); // 1 + 4 = 5
    assert!(dfa.accepts(&[0, 0, 2])); // 1 + 1 + 3 = 5
    assert!(!dfa.accepts(&[0]));

    // The DFA agrees with the NFA everywhere.
    for input in all_inputs(4, 4) {
        assert_eq!(nfa.accepts(&input), dfa.accepts(&input));
    }
}

#[test]
fn depth_capped_machines_stay_small() {
    let nfa = build_from_state_machine(
        2,
        vec![Vec::<u8>::new()],
        |state, symbol| {
            let mut next = state.clone();
            next.push(symbol as u8);
            vec![next]
        },
        |state| state.len() == 2,
        Some(2),
    )
    .unwrap();
    // Depth-2 exploration of a binary tree: 1 + 2 + 4 states.
    assert_eq!(nfa.num_states(), 7);
    assert!(nfa.accepts(&[0, 1]));
    assert!(!nfa.accepts(&[0]));
}
