use std::cmp;

use crate::types::CellIndex;
use crate::value_set::ValueSet;

use super::{Contradiction, SolverResult};

/// Enforces that a group of cells take pairwise different values, removing
/// every value that cannot take part in any complete assignment.
///
/// Algorithm: http://www.constraint-programming.com/people/regin/papers/alldiff.pdf
/// Scratch buffers are allocated once and reused across calls; a single
/// enforcer serves every house of one solver.
pub struct AllDifferentEnforcer {
    assignees: Vec<usize>,
    assignees_inv: Vec<ValueSet>,
    ids: Vec<u32>,
    lowlinks: Vec<u32>,
    rec_stack: Vec<usize>,
    scc_stack: Vec<usize>,
    cell_nodes: Vec<ValueSet>,
}

impl AllDifferentEnforcer {
    pub fn new(num_values: u32) -> AllDifferentEnforcer {
        let n = num_values as usize;
        AllDifferentEnforcer {
            assignees: vec![0; n],
            assignees_inv: vec![ValueSet::empty(); n],
            ids: vec![0; n],
            lowlinks: vec![0; n],
            rec_stack: Vec::with_capacity(n),
            scc_stack: Vec::with_capacity(n),
            cell_nodes: vec![ValueSet::empty(); n],
        }
    }

    /// Prunes `grid` to matching-consistent values, reporting each shrunken
    /// cell through `on_change`.
    pub fn enforce_all_different<F: FnMut(CellIndex)>(
        &mut self,
        grid: &mut [ValueSet],
        cells: &[CellIndex],
        mut on_change: F,
    ) -> SolverResult {
        let n = cells.len();

        for (i, &cell) in cells.iter().enumerate() {
            self.cell_nodes[i] = grid[cell];
        }

        if !self.max_matching(n) {
            return Err(Contradiction);
        }

        self.remove_scc(n);

        // cell_nodes now holds the removable edges.
        for (i, &cell) in cells.iter().enumerate() {
            if !self.cell_nodes[i].is_empty() {
                grid[cell].remove_set(self.cell_nodes[i]);
                if grid[cell].is_empty() {
                    return Err(Contradiction);
                }
                on_change(cell);
            }
        }

        Ok(())
    }

    // https://en.wikipedia.org/wiki/Tarjan%27s_strongly_connected_components_algorithm
    fn remove_scc(&mut self, num_cells: usize) {
        let cell_nodes = &mut self.cell_nodes[..num_cells];
        let assignees = &self.assignees;
        let assignees_inv = &mut self.assignees_inv[..num_cells];
        let ids = &mut self.ids[..num_cells];
        let lowlinks = &mut self.lowlinks[..num_cells];
        let rec_stack = &mut self.rec_stack;
        let scc_stack = &mut self.scc_stack;
        rec_stack.clear();
        scc_stack.clear();

        let mut seen = ValueSet::empty();
        let mut inv_seen = ValueSet::empty();
        let mut inv_stack_member = ValueSet::empty();
        let mut index = 0;
        let mut prev_rec_stack_top = 0;

        // Remove the matched edges and remember them per cell.
        for (v, &assignee) in assignees.iter().enumerate().take(num_cells) {
            let v_set = ValueSet::from_value(v as u8);
            cell_nodes[assignee].remove_set(v_set);
            assignees_inv[assignee] = v_set;
        }

        for i in 0..num_cells {
            // Try the next unseen node.
            // If it has no edges, ignore it (it's a fixed value).
            if cell_nodes[i].is_empty() || seen.contains(i as u8) {
                continue;
            }

            rec_stack.push(i);

            while let Some(&u) = rec_stack.last() {
                let u_set = ValueSet::from_value(u as u8);
                if !seen.intersects(u_set) {
                    // First time we've seen u.
                    ids[u] = index;
                    lowlinks[u] = index;
                    index += 1;
                    seen |= u_set;
                    let u_inv = assignees_inv[u];
                    inv_stack_member |= u_inv;
                    inv_seen |= u_inv;
                    scc_stack.push(u);
                } else {
                    // We returned from a recursive call.
                    let n = prev_rec_stack_top;
                    lowlinks[u] = cmp::min(lowlinks[u], lowlinks[n]);
                }

                // Recurse into the next unseen node.
                let unseen_adj = cell_nodes[u] & !inv_seen;
                if !unseen_adj.is_empty() {
                    let n = assignees[unseen_adj.value() as usize];
                    rec_stack.push(n);
                    continue;
                }

                // Handle any adjacent nodes already in the stack.
                let mut stack_adj = cell_nodes[u] & inv_stack_member;
                while let Some(node) = stack_adj.pop() {
                    let n = assignees[node.value() as usize];
                    lowlinks[u] = cmp::min(lowlinks[u], ids[n]);
                }

                // We have looked at all the relevant edges.
                // If u is a root node, pop the scc_stack and generate an SCC.
                if lowlinks[u] == ids[u] {
                    // Determine the edges to remove.
                    let mut mask = ValueSet::from_bits(u16::MAX);
                    for scc_index in (0..scc_stack.len()).rev() {
                        let w = scc_stack[scc_index];
                        let inv_mask = !assignees_inv[w];
                        inv_stack_member &= inv_mask;
                        mask &= inv_mask;
                        if w == u {
                            break;
                        }
                    }

                    let mut w = u;
                    loop {
                        // Remove the edges in the SCC from the graph.
                        cell_nodes[w] &= mask;
                        w = scc_stack.pop().unwrap();
                        if w == u {
                            break;
                        }
                    }
                }

                prev_rec_stack_top = *rec_stack.last().unwrap();
                rec_stack.pop();
            }
        }
    }

    // Max bipartite matching algorithm from:
    // https://www.geeksforgeeks.org/maximum-bipartite-matching/
    fn max_matching(&mut self, num_cells: usize) -> bool {
        let mut assigned = ValueSet::empty();

        for i in 0..num_cells {
            let values = self.cell_nodes[i] & !assigned;
            if !values.is_empty() {
                let value = values.min_set();
                self.assignees[value.value() as usize] = i;
                assigned |= value;
            } else {
                let matched = self.update_matching(i, assigned, num_cells);
                if matched.is_empty() {
                    return false;
                }
                assigned |= matched;
            }
        }

        true
    }

    fn update_matching(&mut self, cell: usize, assigned: ValueSet, num_cells: usize) -> ValueSet {
        let cell_nodes = &self.cell_nodes[..num_cells];
        let assignees = &mut self.assignees;

        let mut c_stack = vec![cell; 1];
        let mut v_stack = vec![0u8; num_cells];

        let mut seen = ValueSet::empty();

        while let Some(c) = c_stack.last() {
            // Check any unseen values.
            let values = cell_nodes[*c] & !seen;

            // We've run out of legal values, backtrack.
            if values.is_empty() {
                c_stack.pop();
                continue;
            }

            // Find the next value. We know this is already assigned.
            let value = values.min_set();
            let v = value.value();
            v_stack[c_stack.len() - 1] = v;

            // Check if the next assignee is free.
            // If so then we can assign everything in the stack and return.
            let next_c = assignees[v as usize];
            let next_values = cell_nodes[next_c] & !assigned;
            if !next_values.is_empty() {
                let next_v = next_values.value();
                assignees[next_v as usize] = next_c;
                while let Some(c) = c_stack.pop() {
                    assignees[v_stack[c_stack.len()] as usize] = c;
                }

                return next_values.min_set();
            }

            // Otherwise we need to recurse because v is assigned, and that
            // cell needs to find a new assignment.
            seen |= value;
            c_stack.push(next_c);
        }

        ValueSet::empty()
    }
}
