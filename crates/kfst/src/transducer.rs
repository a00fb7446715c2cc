// Immutable transducer store and the public API surface.

use crate::lookup::{self, LookupOptions};
use crate::symbols::SymbolTable;
use crate::{KfstError, binary, text};
use hashbrown::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// One outgoing transition. The source state is implicit in the per-state
/// grouping inside [`Transducer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub target: u32,
    pub sym_in: u16,
    pub sym_out: u16,
    /// 0.0 in unweighted transducers.
    pub weight: f64,
}

/// A transition record paired with its source state, as read from a file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RawTransition {
    pub src: u32,
    pub dst: u32,
    pub sym_in: u16,
    pub sym_out: u16,
    pub weight: f64,
}

/// An immutable finite state transducer.
///
/// States are dense ids in `[0, N)`; state 0 is the start state. All
/// transitions live in one flat array indexed by a per-state offsets table
/// (with an end sentinel), so a state's outgoing block is a single slice and
/// its file order is preserved. The value is immutable after construction
/// and safe to share across threads.
pub struct Transducer {
    symbols: SymbolTable,
    transitions: Vec<Transition>,
    /// `offsets[s]..offsets[s+1]` bounds state `s`'s outgoing block.
    offsets: Vec<u32>,
    finals: HashMap<u32, f64>,
    weighted: bool,
}

impl Transducer {
    /// Assemble a transducer from codec output, validating the referential
    /// invariants: symbol ids within the table, state ids within `[0, N)`,
    /// final entries unique per state.
    pub(crate) fn assemble(
        symbols: SymbolTable,
        raw: Vec<RawTransition>,
        finals: Vec<(u32, f64)>,
        state_count: u32,
        weighted: bool,
    ) -> Result<Self, KfstError> {
        let n = state_count as usize;
        let symbol_count = symbols.len();

        let mut degree = vec![0u32; n];
        for t in &raw {
            if t.src >= state_count || t.dst >= state_count {
                return Err(KfstError::MalformedRecord(format!(
                    "transition {} -> {} references a state outside [0, {state_count})",
                    t.src, t.dst
                )));
            }
            for sym in [t.sym_in, t.sym_out] {
                if sym as usize >= symbol_count {
                    return Err(KfstError::SymbolCountMismatch {
                        symbol: sym,
                        count: symbol_count,
                    });
                }
            }
            degree[t.src as usize] += 1;
        }

        let mut offsets = Vec::with_capacity(n + 1);
        let mut total = 0u32;
        offsets.push(0);
        for d in &degree {
            total += d;
            offsets.push(total);
        }

        // Stable counting scatter: iterating records in file order and
        // bumping a per-state cursor preserves each state's record order.
        let mut cursor: Vec<u32> = offsets[..n].to_vec();
        let mut transitions = vec![
            Transition {
                target: 0,
                sym_in: 0,
                sym_out: 0,
                weight: 0.0,
            };
            raw.len()
        ];
        for t in raw {
            let slot = cursor[t.src as usize] as usize;
            transitions[slot] = Transition {
                target: t.dst,
                sym_in: t.sym_in,
                sym_out: t.sym_out,
                weight: t.weight,
            };
            cursor[t.src as usize] += 1;
        }

        let mut final_map = HashMap::with_capacity(finals.len());
        for (state, weight) in finals {
            if state >= state_count {
                return Err(KfstError::MalformedRecord(format!(
                    "final state {state} outside [0, {state_count})"
                )));
            }
            if final_map.insert(state, weight).is_some() {
                return Err(KfstError::MalformedRecord(format!(
                    "duplicate final state {state}"
                )));
            }
        }

        Ok(Self {
            symbols,
            transitions,
            offsets,
            finals: final_map,
            weighted,
        })
    }

    /// Load a transducer from the tabular (ATT) format.
    ///
    /// Only the first transducer of a multi-transducer file is kept.
    pub fn from_tabular<R: BufRead>(reader: R) -> Result<Self, KfstError> {
        text::parse(reader)
    }

    /// Write the transducer in the tabular (ATT) format.
    pub fn to_tabular<W: Write>(&self, writer: W) -> Result<(), KfstError> {
        text::emit(self, writer)
    }

    /// Load a transducer from the binary KFST format.
    pub fn from_binary<R: Read>(reader: R) -> Result<Self, KfstError> {
        binary::parse(reader)
    }

    /// Write the transducer in the binary KFST format.
    pub fn to_binary<W: Write>(&self, writer: W) -> Result<(), KfstError> {
        binary::emit(self, writer)
    }

    /// Load a transducer from an `.att` file.
    pub fn from_att_file<P: AsRef<Path>>(path: P) -> Result<Self, KfstError> {
        Self::from_tabular(BufReader::new(File::open(path)?))
    }

    /// Load a transducer from a `.kfst` file.
    pub fn from_kfst_file<P: AsRef<Path>>(path: P) -> Result<Self, KfstError> {
        Self::from_binary(BufReader::new(File::open(path)?))
    }

    /// Write the transducer to a `.kfst` file.
    pub fn to_kfst_file<P: AsRef<Path>>(&self, path: P) -> Result<(), KfstError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.to_binary(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Enumerate every `(output, weight)` pair the transducer produces for
    /// `input`, deduplicated and sorted by ascending weight.
    pub fn lookup(
        &self,
        input: &str,
        options: LookupOptions,
    ) -> Result<Vec<(String, f64)>, KfstError> {
        lookup::lookup(self, input, options)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Number of states.
    pub fn state_count(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    /// Number of transitions across all states.
    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    /// Whether transition and final weights are meaningful.
    pub fn is_weighted(&self) -> bool {
        self.weighted
    }

    /// The start state.
    pub fn start_state(&self) -> u32 {
        0
    }

    /// Outgoing transitions of a state, in source-file order. An out-of-range
    /// state has no transitions.
    pub fn transitions_from(&self, state: u32) -> &[Transition] {
        let s = state as usize;
        if s + 1 >= self.offsets.len() {
            return &[];
        }
        &self.transitions[self.offsets[s] as usize..self.offsets[s + 1] as usize]
    }

    /// Acceptance weight of a final state, `None` for non-final states.
    pub fn final_weight(&self, state: u32) -> Option<f64> {
        self.finals.get(&state).copied()
    }

    /// All final states with their weights, in unspecified order.
    pub fn final_states(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.finals.iter().map(|(&s, &w)| (s, w))
    }
}

impl std::fmt::Debug for Transducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transducer")
            .field("state_count", &self.state_count())
            .field("transition_count", &self.transitions.len())
            .field("symbol_count", &self.symbols.len())
            .field("final_count", &self.finals.len())
            .field("weighted", &self.weighted)
            .finish()
    }
}
