use crate::error::SolverError;

use super::Nfa;

/// Compiles a line pattern into an NFA over symbols `0..num_symbols`.
///
/// Literals name grid values: digits `1`..`9` and letters `a`..`g` for
/// values 10..16. The pattern language supports `.`, classes `[...]` with
/// ranges and `^` negation, groups, alternation and the usual quantifiers.
pub fn compile(pattern: &str, num_symbols: usize) -> Result<Nfa, SolverError> {
    let ast = Parser::new(pattern, num_symbols).parse()?;

    let mut nfa = Nfa::new(num_symbols);
    let entry = nfa.add_state(false)?;
    nfa.add_start(entry);
    let exit = build(&mut nfa, &ast, entry)?;
    nfa.set_accepting(exit, true);

    nfa.close_over_epsilon_transitions();
    nfa.remove_dead_states(None);
    nfa.reduce_by_simulation();
    nfa.seal();
    Ok(nfa)
}

enum Ast {
    /// A set of symbols, one transition's worth.
    Class(u16),
    Concat(Vec<Ast>),
    Alt(Vec<Ast>),
    Repeat {
        node: Box<Ast>,
        min: usize,
        max: Option<usize>,
    },
}

/// Builds the fragment for `ast` hanging off `entry`; returns its exit.
fn build(nfa: &mut Nfa, ast: &Ast, entry: usize) -> Result<usize, SolverError> {
    match ast {
        Ast::Class(mask) => {
            let exit = nfa.add_state(false)?;
            let mut m = *mask;
            while m != 0 {
                let symbol = m.trailing_zeros() as usize;
                m &= m - 1;
                nfa.add_transition(entry, symbol, exit);
            }
            Ok(exit)
        }
        Ast::Concat(parts) => {
            let mut at = entry;
            for part in parts {
                at = build(nfa, part, at)?;
            }
            Ok(at)
        }
        Ast::Alt(options) => {
            let exit = nfa.add_state(false)?;
            for option in options {
                let branch_exit = build(nfa, option, entry)?;
                nfa.add_epsilon(branch_exit, exit);
            }
            Ok(exit)
        }
        Ast::Repeat { node, min, max } => {
            let mut at = entry;
            for _ in 0..*min {
                at = build(nfa, node, at)?;
            }
            match max {
                Some(max) => {
                    // Optional copies, each skippable to the shared exit.
                    let exit = nfa.add_state(false)?;
                    nfa.add_epsilon(at, exit);
                    for _ in *min..*max {
                        at = build(nfa, node, at)?;
                        nfa.add_epsilon(at, exit);
                    }
                    Ok(exit)
                }
                None => {
                    // One looping copy.
                    let loop_exit = build(nfa, node, at)?;
                    nfa.add_epsilon(loop_exit, at);
                    Ok(at)
                }
            }
        }
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    num_symbols: usize,
}

impl<'a> Parser<'a> {
    fn new(pattern: &'a str, num_symbols: usize) -> Parser<'a> {
        Parser {
            input: pattern.as_bytes(),
            pos: 0,
            num_symbols,
        }
    }

    fn error(&self, message: &str) -> SolverError {
        SolverError::RegexParse {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn parse(mut self) -> Result<Ast, SolverError> {
        let ast = self.parse_alt()?;
        if self.pos != self.input.len() {
            return Err(self.error("unexpected character"));
        }
        Ok(ast)
    }

    fn parse_alt(&mut self) -> Result<Ast, SolverError> {
        let mut options = vec![self.parse_concat()?];
        while self.peek() == Some(b'|') {
            self.bump();
            options.push(self.parse_concat()?);
        }
        if options.len() == 1 {
            Ok(options.pop().unwrap())
        } else {
            Ok(Ast::Alt(options))
        }
    }

    fn parse_concat(&mut self) -> Result<Ast, SolverError> {
        let mut parts = Vec::new();
        while let Some(c) = self.peek() {
            if c == b'|' || c == b')' {
                break;
            }
            parts.push(self.parse_repeat()?);
        }
        Ok(Ast::Concat(parts))
    }

    fn parse_repeat(&mut self) -> Result<Ast, SolverError> {
        let mut node = self.parse_atom()?;
        loop {
            match self.peek() {
                Some(b'*') => {
                    self.bump();
                    node = Ast::Repeat {
                        node: Box::new(node),
                        min: 0,
                        max: None,
                    };
                }
                Some(b'+') => {
                    self.bump();
                    node = Ast::Repeat {
                        node: Box::new(node),
                        min: 1,
                        max: None,
                    };
                }
                Some(b'?') => {
                    self.bump();
                    node = Ast::Repeat {
                        node: Box::new(node),
                        min: 0,
                        max: Some(1),
                    };
                }
                Some(b'{') => {
                    self.bump();
                    let min = self.parse_number()?;
                    let max = match self.peek() {
                        Some(b',') => {
                            self.bump();
                            if self.peek() == Some(b'}') {
                                None
                            } else {
                                Some(self.parse_number()?)
                            }
                        }
                        _ => Some(min),
                    };
                    if self.bump() != Some(b'}') {
                        return Err(self.error("expected '}'"));
                    }
                    if let Some(max) = max {
                        if max < min {
                            return Err(self.error("bad repetition range"));
                        }
                    }
                    node = Ast::Repeat {
                        node: Box::new(node),
                        min,
                        max,
                    };
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_atom(&mut self) -> Result<Ast, SolverError> {
        match self.peek() {
            None => Err(self.error("unexpected end of pattern")),
            Some(b'(') => {
                self.bump();
                let inner = self.parse_alt()?;
                if self.bump() != Some(b')') {
                    return Err(self.error("expected ')'"));
                }
                Ok(inner)
            }
            Some(b'.') => {
                self.bump();
                Ok(Ast::Class(self.all_symbols()))
            }
            Some(b'[') => {
                self.bump();
                self.parse_class()
            }
            Some(c) => {
                let symbol = self
                    .symbol_of(c)
                    .ok_or_else(|| self.error("unrecognized character"))?;
                self.bump();
                Ok(Ast::Class(1 << symbol))
            }
        }
    }

    fn parse_class(&mut self) -> Result<Ast, SolverError> {
        let negated = if self.peek() == Some(b'^') {
            self.bump();
            true
        } else {
            false
        };

        let mut mask = 0u16;
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated class")),
                Some(b']') => {
                    self.bump();
                    break;
                }
                Some(c) => {
                    let low = self
                        .symbol_of(c)
                        .ok_or_else(|| self.error("unrecognized character in class"))?;
                    self.bump();
                    if self.peek() == Some(b'-')
                        && self.input.get(self.pos + 1) != Some(&b']')
                    {
                        self.bump();
                        let hc = self.peek().ok_or_else(|| self.error("unterminated range"))?;
                        let high = self
                            .symbol_of(hc)
                            .ok_or_else(|| self.error("unrecognized character in class"))?;
                        self.bump();
                        if high < low {
                            return Err(self.error("inverted range"));
                        }
                        for s in low..=high {
                            mask |= 1 << s;
                        }
                    } else {
                        mask |= 1 << low;
                    }
                }
            }
        }

        if negated {
            mask = !mask & self.all_symbols();
        }
        if mask == 0 {
            return Err(self.error("empty class"));
        }
        Ok(Ast::Class(mask))
    }

    fn parse_number(&mut self) -> Result<usize, SolverError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.pos == start {
            return Err(self.error("expected a number"));
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .unwrap()
            .parse()
            .map_err(|_| self.error("number out of range"))
    }

    fn all_symbols(&self) -> u16 {
        if self.num_symbols >= 16 {
            u16::MAX
        } else {
            (1 << self.num_symbols) - 1
        }
    }

    /// Digit/letter value encoding: '1'..'9' then 'a'..'g' (or uppercase).
    fn symbol_of(&self, c: u8) -> Option<usize> {
        let symbol = match c {
            b'1'..=b'9' => (c - b'1') as usize,
            b'a'..=b'g' => (c - b'a') as usize + 9,
            b'A'..=b'G' => (c - b'A') as usize + 9,
            _ => return None,
        };
        (symbol < self.num_symbols).then_some(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_sequence() {
        let nfa = compile("123", 9).unwrap();
        assert!(nfa.accepts(&[0, 1, 2]));
        assert!(!nfa.accepts(&[0, 1]));
        assert!(!nfa.accepts(&[0, 1, 3]));
    }

    #[test]
    fn repeated_group() {
        let nfa = compile("(12)+", 9).unwrap();
        assert!(nfa.accepts(&[0, 1]));
        assert!(nfa.accepts(&[0, 1, 0, 1]));
        assert!(!nfa.accepts(&[]));
        assert!(!nfa.accepts(&[0, 1, 0]));
    }

    #[test]
    fn alternation_and_dot() {
        let nfa = compile("1.|9", 9).unwrap();
        assert!(nfa.accepts(&[0, 6]));
        assert!(nfa.accepts(&[8]));
        assert!(!nfa.accepts(&[6, 0]));
    }

    #[test]
    fn classes_and_negation() {
        let nfa = compile("[1-3][^1-8]", 9).unwrap();
        assert!(nfa.accepts(&[1, 8]));
        assert!(!nfa.accepts(&[3, 8]));
        assert!(!nfa.accepts(&[1, 4]));
    }

    #[test]
    fn counted_repetition() {
        let nfa = compile("1{2,3}", 9).unwrap();
        assert!(!nfa.accepts(&[0]));
        assert!(nfa.accepts(&[0, 0]));
        assert!(nfa.accepts(&[0, 0, 0]));
        assert!(!nfa.accepts(&[0, 0, 0, 0]));

        let nfa = compile("2{2,}", 9).unwrap();
        assert!(!nfa.accepts(&[1]));
        assert!(nfa.accepts(&[1, 1, 1, 1]));
    }

    #[test]
    fn optional_suffix() {
        let nfa = compile("12?", 9).unwrap();
        assert!(nfa.accepts(&[0]));
        assert!(nfa.accepts(&[0, 1]));
        assert!(!nfa.accepts(&[0, 1, 1]));
    }

    #[test]
    fn letter_literals_for_high_values() {
        let nfa = compile("a", 16).unwrap();
        assert!(nfa.accepts(&[9]));
        assert!(!nfa.accepts(&[8]));
    }

    #[test]
    fn parse_errors_are_reported() {
        assert!(compile("(", 9).is_err());
        assert!(compile("[", 9).is_err());
        assert!(compile("1{3,2}", 9).is_err());
        assert!(compile("x", 9).is_err());
        assert!(compile("12)", 9).is_err());
    }
}
