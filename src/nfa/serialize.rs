use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::SolverError;

use super::Nfa;

// Wire format, bit-packed then base64-encoded:
//   2  format (0 = plain, 1 = packed)
//   4  stateBits - 1
//   4  symbolCount - 1
//   stateBits  startCount
//   stateBits  acceptCount (excluding accepting start states)
//   startCount bits: which start states are accepting
//   [plain] 4  transitionCountBits
// then per state, in start/accepting/other order:
//   [plain]  transitionCount, then (symbol:symbolBits, target:stateBits) pairs
//   [packed] symbolCount-bit mask of symbols, then stateBits target per bit
// States decode until the remaining bits cannot hold another state; up to 7
// bits of trailing padding are ignored.

const FORMAT_PLAIN: u32 = 0;
const FORMAT_PACKED: u32 = 1;

struct BitWriter {
    bytes: Vec<u8>,
    bit: usize,
}

impl BitWriter {
    fn new() -> BitWriter {
        BitWriter {
            bytes: Vec::new(),
            bit: 0,
        }
    }

    /// Writes `width` bits of `value`, most significant first.
    fn write(&mut self, value: u32, width: u32) {
        debug_assert!(width == 32 || value < (1 << width));
        for i in (0..width).rev() {
            if self.bit % 8 == 0 {
                self.bytes.push(0);
            }
            if value & (1 << i) != 0 {
                *self.bytes.last_mut().unwrap() |= 0x80 >> (self.bit % 8);
            }
            self.bit += 1;
        }
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> BitReader<'a> {
        BitReader { bytes, bit: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() * 8 - self.bit
    }

    fn read(&mut self, width: u32) -> Result<u32, SolverError> {
        if (self.remaining() as u32) < width {
            return Err(SolverError::BadSerialization(
                "truncated payload".to_string(),
            ));
        }
        let mut value = 0;
        for _ in 0..width {
            let byte = self.bytes[self.bit / 8];
            value = (value << 1) | ((byte >> (7 - self.bit % 8)) & 1) as u32;
            self.bit += 1;
        }
        Ok(value)
    }
}

fn bits_for(value: usize) -> u32 {
    (usize::BITS - value.leading_zeros()).max(1)
}

/// The start-first/accepting-next state order the wire format uses.
fn wire_order(nfa: &Nfa) -> (Vec<usize>, Vec<i32>) {
    let n = nfa.num_states();
    let mut order = Vec::with_capacity(n);
    let mut remap = vec![-1i32; n];

    for &s in nfa.start_ids() {
        remap[s] = order.len() as i32;
        order.push(s);
    }
    for s in 0..n {
        if remap[s] < 0 && nfa.is_accepting(s) {
            remap[s] = order.len() as i32;
            order.push(s);
        }
    }
    for s in 0..n {
        if remap[s] < 0 {
            remap[s] = order.len() as i32;
            order.push(s);
        }
    }
    (order, remap)
}

pub fn serialize(nfa: &Nfa) -> String {
    assert!(!nfa.has_epsilon(), "serialize an epsilon-closed NFA");

    let n = nfa.num_states();
    let state_bits = bits_for(n);
    let symbol_count = nfa.num_symbols;
    let symbol_bits = bits_for(symbol_count.saturating_sub(1));

    let (order, remap) = wire_order(nfa);

    // Per wire-state transition lists.
    let mut state_transitions: Vec<Vec<(usize, usize)>> = Vec::with_capacity(n);
    for &old in &order {
        let mut list = Vec::new();
        for symbol in 0..symbol_count {
            for &t in nfa.targets(old, symbol) {
                list.push((symbol, remap[t] as usize));
            }
        }
        state_transitions.push(list);
    }

    let start_count = nfa.start_ids().len();
    let accept_extra = (0..n)
        .filter(|&s| nfa.is_accepting(s) && !nfa.start_ids().contains(&s))
        .count();

    // Packed works when no (state, symbol) fans out, and saves bits when
    // the symbol mask beats the per-transition symbol indexes.
    let max_count = state_transitions.iter().map(|l| l.len()).max().unwrap_or(0);
    let single_target = state_transitions.iter().all(|list| {
        let mut seen = 0u16;
        list.iter().all(|&(symbol, _)| {
            let bit = 1u16 << symbol;
            let fresh = seen & bit == 0;
            seen |= bit;
            fresh
        })
    });
    let tc_bits = bits_for(max_count).min(15);
    let plain_body: usize = state_transitions
        .iter()
        .map(|l| tc_bits as usize + l.len() * (symbol_bits + state_bits) as usize)
        .sum();
    let packed_body: usize = state_transitions
        .iter()
        .map(|l| symbol_count + l.len() * state_bits as usize)
        .sum();
    let packed = single_target && packed_body < plain_body;

    let mut writer = BitWriter::new();
    writer.write(if packed { FORMAT_PACKED } else { FORMAT_PLAIN }, 2);
    writer.write(state_bits - 1, 4);
    writer.write(symbol_count as u32 - 1, 4);
    writer.write(start_count as u32, state_bits);
    writer.write(accept_extra as u32, state_bits);
    for &s in nfa.start_ids() {
        writer.write(nfa.is_accepting(s) as u32, 1);
    }
    if !packed {
        writer.write(tc_bits, 4);
    }

    for list in &state_transitions {
        if packed {
            let mut mask = 0u32;
            for &(symbol, _) in list {
                mask |= 1 << symbol;
            }
            writer.write(mask, symbol_count as u32);
            let mut sorted = list.clone();
            sorted.sort_by_key(|&(symbol, _)| symbol);
            for &(_, target) in &sorted {
                writer.write(target as u32, state_bits);
            }
        } else {
            writer.write(list.len() as u32, tc_bits);
            for &(symbol, target) in list {
                writer.write(symbol as u32, symbol_bits);
                writer.write(target as u32, state_bits);
            }
        }
    }

    STANDARD.encode(&writer.bytes)
}

pub fn deserialize(payload: &str) -> Result<Nfa, SolverError> {
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| SolverError::BadSerialization(e.to_string()))?;
    let mut reader = BitReader::new(&bytes);

    let format = reader.read(2)?;
    if format != FORMAT_PLAIN && format != FORMAT_PACKED {
        return Err(SolverError::BadSerialization(format!(
            "unknown format {format}"
        )));
    }
    let state_bits = reader.read(4)? + 1;
    let symbol_count = reader.read(4)? as usize + 1;
    let symbol_bits = bits_for(symbol_count - 1);
    let start_count = reader.read(state_bits)? as usize;
    let accept_extra = reader.read(state_bits)? as usize;
    let mut start_accepting = Vec::with_capacity(start_count);
    for _ in 0..start_count {
        start_accepting.push(reader.read(1)? == 1);
    }
    let tc_bits = if format == FORMAT_PLAIN {
        reader.read(4)?
    } else {
        0
    };
    if format == FORMAT_PLAIN && tc_bits == 0 {
        return Err(SolverError::BadSerialization(
            "zero transition-count width".to_string(),
        ));
    }

    let mut nfa = Nfa::new(symbol_count);
    let mut transitions: Vec<Vec<(usize, usize)>> = Vec::new();

    loop {
        let state_head = if format == FORMAT_PLAIN {
            tc_bits
        } else {
            symbol_count as u32
        };
        if (reader.remaining() as u32) < state_head {
            break;
        }
        let mut list = Vec::new();
        if format == FORMAT_PLAIN {
            let count = reader.read(tc_bits)?;
            for _ in 0..count {
                let symbol = reader.read(symbol_bits)? as usize;
                let target = reader.read(state_bits)? as usize;
                list.push((symbol, target));
            }
        } else {
            let mask = reader.read(symbol_count as u32)?;
            for symbol in 0..symbol_count {
                if mask & (1 << symbol) != 0 {
                    let target = reader.read(state_bits)? as usize;
                    list.push((symbol, target));
                }
            }
        }
        transitions.push(list);
    }

    // Zeroed trailing padding can read as extra transition-less states;
    // strip any unreferenced dead tail so decoding is exact.
    loop {
        let s = transitions.len();
        if s == 0 || s <= start_count + accept_extra {
            break;
        }
        let last = s - 1;
        let dead = transitions[last].is_empty()
            && !transitions[..last]
                .iter()
                .any(|list| list.iter().any(|&(_, target)| target == last));
        if !dead {
            break;
        }
        transitions.pop();
    }

    let num_states = transitions.len();
    if num_states < start_count + accept_extra {
        return Err(SolverError::BadSerialization(
            "state count below start/accept counts".to_string(),
        ));
    }

    for s in 0..num_states {
        let accepting = if s < start_count {
            start_accepting[s]
        } else {
            s < start_count + accept_extra
        };
        nfa.add_state(accepting)?;
        if s < start_count {
            nfa.add_start(s);
        }
    }
    for (s, list) in transitions.iter().enumerate() {
        for &(symbol, target) in list {
            if symbol >= symbol_count || target >= num_states {
                return Err(SolverError::BadSerialization(format!(
                    "field out of range in state {s}"
                )));
            }
            nfa.add_transition(s, symbol, target);
        }
    }

    nfa.seal();
    Ok(nfa)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfa::regex_parser;

    fn round_trip_language(pattern: &str, num_symbols: usize, max_len: usize) {
        let nfa = regex_parser::compile(pattern, num_symbols).unwrap();
        let payload = serialize(&nfa);
        let decoded = deserialize(&payload).unwrap();
        assert_eq!(decoded.num_symbols, nfa.num_symbols);

        let mut inputs: Vec<Vec<usize>> = vec![vec![]];
        for _ in 0..max_len {
            let mut next = Vec::new();
            for input in &inputs {
                for s in 0..num_symbols {
                    let mut extended = input.clone();
                    extended.push(s);
                    next.push(extended);
                }
            }
            for input in &next {
                assert_eq!(
                    nfa.accepts(input),
                    decoded.accepts(input),
                    "{pattern} on {input:?}"
                );
            }
            inputs = next;
        }
    }

    #[test]
    fn round_trips_preserve_language() {
        round_trip_language("(12)+", 4, 5);
        round_trip_language("1*2|34", 4, 4);
        round_trip_language("[1-3]{2,3}", 4, 5);
        round_trip_language("...", 3, 4);
    }

    #[test]
    fn double_round_trip_is_stable() {
        let nfa = regex_parser::compile("1(2|3)*4", 4).unwrap();
        let once = serialize(&nfa);
        let decoded = deserialize(&once).unwrap();
        let twice = serialize(&decoded);
        assert_eq!(once, twice);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let nfa = regex_parser::compile("(123)+", 9).unwrap();
        let payload = serialize(&nfa);
        let bytes = STANDARD.decode(&payload).unwrap();
        // Cut the body in half: decoding must fail, not panic.
        let cut = STANDARD.encode(&bytes[..2]);
        assert!(deserialize(&cut).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(deserialize("!!!not base64!!!").is_err());
        assert!(deserialize("").is_err());
    }
}
