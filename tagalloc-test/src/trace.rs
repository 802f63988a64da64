//! Allocation traces.
//!
//! A trace is a sequence of operations on identified allocations, one per line:
//!
//! ```text
//! # comment
//! a <id> <size>           allocate
//! f <id>                  free
//! r <id> <size>           reallocate
//! c <id> <count> <size>   zero-allocate
//! ```

use std::{error, fmt, str::FromStr};

use rand::{Rng, SeedableRng, rngs::StdRng};

/// An operation of a Trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Allocates `size` bytes for `id`.
    Allocate {
        /// Identifier of the allocation.
        id: usize,
        /// Number of bytes.
        size: usize,
    },
    /// Frees `id`.
    Free {
        /// Identifier of the allocation.
        id: usize,
    },
    /// Reallocates `id` to `size` bytes.
    Reallocate {
        /// Identifier of the allocation.
        id: usize,
        /// Number of bytes.
        size: usize,
    },
    /// Allocates `count` zeroed elements of `size` bytes for `id`.
    ZeroAllocate {
        /// Identifier of the allocation.
        id: usize,
        /// Number of elements.
        count: usize,
        /// Size of an element.
        size: usize,
    },
}

/// A line of a trace which could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    /// Line number, starting from 1.
    pub line: usize,
    /// Content of the line.
    pub content: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid operation at line {}: {:?}", self.line, self.content)
    }
}

impl error::Error for ParseError {}

/// Trace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Trace {
    operations: Vec<Operation>,
}

impl Trace {
    /// Creates a trace from its operations.
    pub fn new(operations: Vec<Operation>) -> Self { Self { operations } }

    /// Parses a trace, ignoring blank lines and comments.
    pub fn parse(text: &str) -> Result<Self, ParseError> { text.parse() }

    /// Generates a random trace of `length` operations, with sizes up to `max_size` bytes.
    ///
    /// The same `seed` always yields the same trace. Allocations are only freed or reallocated while live, and every
    /// identifier is allocated at most once.
    pub fn random(seed: u64, length: usize, max_size: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut live: Vec<usize> = Vec::new();
        let mut next_id = 0;

        let mut operations = Vec::with_capacity(length);

        for _ in 0..length {
            if live.is_empty() || rng.gen_bool(0.5) {
                let id = next_id;
                next_id += 1;

                let operation = if rng.gen_bool(0.1) {
                    let count = rng.gen_range(1..=8);
                    Operation::ZeroAllocate { id, count, size: rng.gen_range(0..=max_size / count) }
                } else {
                    Operation::Allocate { id, size: rng.gen_range(0..=max_size) }
                };

                operations.push(operation);
                live.push(id);
                continue;
            }

            let index = rng.gen_range(0..live.len());
            let id = live[index];

            if rng.gen_bool(0.7) {
                live.swap_remove(index);
                operations.push(Operation::Free { id });
            } else {
                operations.push(Operation::Reallocate { id, size: rng.gen_range(1..=max_size.max(1)) });
            }
        }

        Self { operations }
    }

    /// Returns the operations.
    pub fn operations(&self) -> &[Operation] { &self.operations }

    /// Returns the number of operations.
    pub fn len(&self) -> usize { self.operations.len() }

    /// Returns whether the trace holds no operation.
    pub fn is_empty(&self) -> bool { self.operations.is_empty() }
}

impl FromStr for Trace {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, ParseError> {
        let mut operations = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let content = line.trim();

            if content.is_empty() || content.starts_with('#') {
                continue;
            }

            let operation = parse_operation(content)
                .ok_or_else(|| ParseError { line: index + 1, content: content.to_string() })?;

            operations.push(operation);
        }

        Ok(Self { operations })
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for operation in &self.operations {
            match *operation {
                Operation::Allocate { id, size } => writeln!(f, "a {} {}", id, size)?,
                Operation::Free { id } => writeln!(f, "f {}", id)?,
                Operation::Reallocate { id, size } => writeln!(f, "r {} {}", id, size)?,
                Operation::ZeroAllocate { id, count, size } => writeln!(f, "c {} {} {}", id, count, size)?,
            }
        }

        Ok(())
    }
}

fn parse_operation(content: &str) -> Option<Operation> {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    let (kind, arguments) = tokens.split_first()?;

    let numbers = arguments.iter()
        .map(|token| token.parse::<usize>().ok())
        .collect::<Option<Vec<_>>>()?;

    match (*kind, &numbers[..]) {
        ("a", &[id, size]) => Some(Operation::Allocate { id, size }),
        ("f", &[id]) => Some(Operation::Free { id }),
        ("r", &[id, size]) => Some(Operation::Reallocate { id, size }),
        ("c", &[id, count, size]) => Some(Operation::ZeroAllocate { id, count, size }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn trace_parse() {
    let text = "
        # A small trace.
        a 0 24
        c 1 10 4

        r 0 64
        f 1
        f 0
    ";

    let trace = Trace::parse(text).unwrap();

    assert_eq!(
        &[
            Operation::Allocate { id: 0, size: 24 },
            Operation::ZeroAllocate { id: 1, count: 10, size: 4 },
            Operation::Reallocate { id: 0, size: 64 },
            Operation::Free { id: 1 },
            Operation::Free { id: 0 },
        ][..],
        trace.operations()
    );

    assert_eq!(trace, Trace::parse(&trace.to_string()).unwrap());
}

#[test]
fn trace_parse_errors() {
    assert_eq!(Err(ParseError { line: 2, content: "x 1".to_string() }), Trace::parse("a 0 1\nx 1"));
    assert_eq!(Err(ParseError { line: 1, content: "a 0".to_string() }), Trace::parse("a 0"));
    assert_eq!(Err(ParseError { line: 1, content: "f 0 1".to_string() }), Trace::parse("f 0 1"));
    assert_eq!(Err(ParseError { line: 1, content: "a 0 -4".to_string() }), Trace::parse("a 0 -4"));
}

#[test]
fn trace_random_is_reproducible() {
    let (first, second) = (Trace::random(42, 200, 128), Trace::random(42, 200, 128));

    assert_eq!(200, first.len());
    assert_eq!(first, second);
    assert_ne!(first, Trace::random(43, 200, 128));
}

#[test]
fn trace_random_is_well_formed() {
    let trace = Trace::random(7, 1000, 256);
    let mut live = std::collections::HashSet::new();

    for operation in trace.operations() {
        match *operation {
            Operation::Allocate { id, size } => {
                assert!(size <= 256);
                assert!(live.insert(id));
            },
            Operation::ZeroAllocate { id, count, size } => {
                assert!(count * size <= 256);
                assert!(live.insert(id));
            },
            Operation::Reallocate { id, size } => {
                assert!(size > 0 && size <= 256);
                assert!(live.contains(&id));
            },
            Operation::Free { id } => assert!(live.remove(&id)),
        }
    }
}

}
