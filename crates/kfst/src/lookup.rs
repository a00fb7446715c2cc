// Backtracking lookup engine.
//
// Depth-first search over configurations (state, input position, flag
// state, output buffers, accumulated weight) with an explicit frame stack.
// The output buffers, flag rows and cycle-protection set are shared across
// the path and restored when a frame pops, so a branch costs one frame plus
// whatever its edge appended.
//
// Two output buffers run in parallel: the verbatim derivation (flag
// diacritic text included) and the flag-stripped surface form. Results are
// deduplicated on the verbatim derivation, so post-processing only changes
// which of the two strings is emitted, never how many results there are.

use crate::KfstError;
use crate::flags::{self, FlagCheckResult, FlagStack};
use crate::symbols::{SymbolKind, Token};
use crate::transducer::Transducer;
use hashbrown::HashSet;

/// Options for [`Transducer::lookup`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookupOptions {
    /// State the search starts from.
    pub start_state: u32,
    /// Strip flag diacritic symbols from outputs. Turning this off keeps
    /// them verbatim, which helps when debugging a morphology.
    pub post_process: bool,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            start_state: 0,
            post_process: true,
        }
    }
}

/// Identity of a search configuration, used for cycle protection: state,
/// input position and a digest of the flag state.
type PathKey = (u32, usize, u64);

struct Frame {
    state: u32,
    pos: usize,
    /// Index of the next unexplored transition within the state's block.
    cursor: usize,
    /// Weight accumulated into this configuration.
    weight: f64,
    /// Derivation buffer length to restore when this frame pops.
    restore_raw: usize,
    /// Surface buffer length to restore when this frame pops.
    restore_surface: usize,
    /// Flag row depth to restore when this frame pops.
    restore_flags: usize,
    key: PathKey,
}

pub(crate) fn lookup(
    t: &Transducer,
    input: &str,
    options: LookupOptions,
) -> Result<Vec<(String, f64)>, KfstError> {
    let tokens = t.symbols().tokenize(input)?;
    if options.start_state >= t.state_count() {
        return Ok(Vec::new());
    }

    let mut results: Vec<(String, f64)> = Vec::new();
    let mut seen: HashSet<(String, u64)> = HashSet::new();
    // verbatim derivation, flag diacritic text included; dedup keys come
    // from this buffer so stripping cannot collapse distinct derivations
    let mut raw = String::new();
    // flag-stripped surface form
    let mut surface = String::new();
    let mut flag_stack = FlagStack::new(t.symbols().feature_count());
    let mut visited: HashSet<PathKey> = HashSet::new();
    let mut stack: Vec<Frame> = Vec::new();

    let start_key = (options.start_state, 0, flag_stack.fingerprint());
    visited.insert(start_key);
    if tokens.is_empty() {
        if let Some(final_weight) = t.final_weight(options.start_state) {
            record(&mut results, &mut seen, "", "", final_weight);
        }
    }
    stack.push(Frame {
        state: options.start_state,
        pos: 0,
        cursor: 0,
        weight: 0.0,
        restore_raw: 0,
        restore_surface: 0,
        restore_flags: 0,
        key: start_key,
    });

    while let Some(top) = stack.last_mut() {
        let arcs = t.transitions_from(top.state);
        if top.cursor >= arcs.len() {
            // configuration exhausted: undo its edge effects and backtrack
            visited.remove(&top.key);
            raw.truncate(top.restore_raw);
            surface.truncate(top.restore_surface);
            flag_stack.truncate(top.restore_flags);
            stack.pop();
            continue;
        }
        let arc = arcs[top.cursor];
        top.cursor += 1;
        let (state_pos, base_weight) = (top.pos, top.weight);

        let saved_raw = raw.len();
        let saved_surface = surface.len();
        let saved_flags = flag_stack.depth();

        // match the arc's input symbol against the next token
        let next_pos = match t.symbols().kind_of(arc.sym_in) {
            SymbolKind::Epsilon => state_pos,
            SymbolKind::Flag(fd) => {
                let current = flag_stack.current()[fd.feature as usize];
                match flags::check_flag(&fd, current) {
                    FlagCheckResult::Reject => continue,
                    FlagCheckResult::AcceptAndUpdate { feature, value } => {
                        flag_stack.push_copy();
                        flag_stack.set(feature, value);
                    }
                    FlagCheckResult::AcceptNoUpdate => {}
                }
                state_pos
            }
            SymbolKind::Regular => match tokens.get(state_pos) {
                Some(&Token::Symbol(id)) if id == arc.sym_in => state_pos + 1,
                _ => continue,
            },
            SymbolKind::Identity | SymbolKind::Unknown => match tokens.get(state_pos) {
                Some(&Token::Other(_)) => state_pos + 1,
                _ => continue,
            },
        };

        // append the arc's output
        match t.symbols().kind_of(arc.sym_out) {
            SymbolKind::Epsilon => {}
            SymbolKind::Flag(_) => {
                // part of the derivation, never of the surface form
                raw.push_str(t.symbols().text_of(arc.sym_out));
            }
            SymbolKind::Identity | SymbolKind::Unknown => {
                // copy the consumed token through
                if next_pos > state_pos {
                    match tokens[state_pos] {
                        Token::Symbol(id) => {
                            let text = t.symbols().text_of(id);
                            raw.push_str(text);
                            surface.push_str(text);
                        }
                        Token::Other(ch) => {
                            raw.push(ch);
                            surface.push(ch);
                        }
                    }
                }
            }
            SymbolKind::Regular => {
                let text = t.symbols().text_of(arc.sym_out);
                raw.push_str(text);
                surface.push_str(text);
            }
        }

        let next_weight = base_weight + arc.weight;
        let key = (arc.target, next_pos, flag_stack.fingerprint());
        if visited.contains(&key) {
            // the path would re-enter one of its own configurations without
            // consuming input: prune the cycle
            raw.truncate(saved_raw);
            surface.truncate(saved_surface);
            flag_stack.truncate(saved_flags);
            continue;
        }
        visited.insert(key);

        if next_pos == tokens.len() {
            if let Some(final_weight) = t.final_weight(arc.target) {
                let emitted = if options.post_process { &surface } else { &raw };
                record(&mut results, &mut seen, &raw, emitted, next_weight + final_weight);
            }
        }
        stack.push(Frame {
            state: arc.target,
            pos: next_pos,
            cursor: 0,
            weight: next_weight,
            restore_raw: saved_raw,
            restore_surface: saved_surface,
            restore_flags: saved_flags,
            key,
        });
    }

    // ascending by weight; the sort is stable, so equal weights keep their
    // first-encountered order
    results.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(results)
}

/// Record one analysis. `derivation` (the verbatim form) keys the
/// deduplication; `emitted` is what lands in the result list, so the two
/// post-processing modes always agree on how many results there are.
fn record(
    results: &mut Vec<(String, f64)>,
    seen: &mut HashSet<(String, u64)>,
    derivation: &str,
    emitted: &str,
    weight: f64,
) {
    if seen.insert((derivation.to_string(), weight.to_bits())) {
        results.push((emitted.to_string(), weight));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_att(att: &str) -> Transducer {
        Transducer::from_tabular(att.as_bytes()).unwrap()
    }

    fn analyses(t: &Transducer, input: &str) -> Vec<(String, f64)> {
        t.lookup(input, LookupOptions::default()).unwrap()
    }

    #[test]
    fn epsilon_input_produces_output_without_consuming() {
        let t = from_att("0\t1\t@0@\th\n1\t2\ta\ti\n2\n");
        assert_eq!(analyses(&t, "a"), vec![("hi".to_string(), 0.0)]);
    }

    #[test]
    fn epsilon_output_produces_nothing() {
        let t = from_att("0\t1\ta\t@0@\n1\n");
        assert_eq!(analyses(&t, "a"), vec![(String::new(), 0.0)]);
    }

    #[test]
    fn pure_epsilon_cycle_terminates() {
        let t = from_att("0\t0\t@0@\t@0@\n0\t1\ta\ta\n1\n");
        assert_eq!(analyses(&t, "a"), vec![("a".to_string(), 0.0)]);
    }

    #[test]
    fn epsilon_cycle_through_two_states_terminates() {
        let t = from_att("0\t1\t@0@\t@0@\n1\t0\t@0@\t@0@\n0\t2\ta\ta\n1\t2\ta\tb\n2\n");
        // depth-first order reaches state 1 through the epsilon arc before
        // trying state 0's own consuming arc; equal weights keep that order
        assert_eq!(
            analyses(&t, "a"),
            vec![("b".to_string(), 0.0), ("a".to_string(), 0.0)]
        );
    }

    #[test]
    fn consuming_loop_is_not_pruned() {
        let t = from_att("0\t0\ta\ta\n0\n");
        assert_eq!(analyses(&t, "aaa"), vec![("aaa".to_string(), 0.0)]);
    }

    #[test]
    fn flag_gate_reopens_after_backtrack() {
        // two branches set different values for the same feature; each
        // branch's requirement must see only its own value
        let att = "0\t1\t@P.K.A@\t@0@\n\
                   0\t2\t@P.K.B@\t@0@\n\
                   1\t3\ta\tx\n\
                   2\t3\ta\ty\n\
                   3\t4\t@R.K.A@\t@0@\n\
                   4\n";
        let t = from_att(att);
        assert_eq!(analyses(&t, "a"), vec![("x".to_string(), 0.0)]);
    }

    #[test]
    fn start_state_option() {
        let t = from_att("0\t1\ta\ta\n1\t2\tb\tb\n2\n");
        let opts = LookupOptions {
            start_state: 1,
            ..LookupOptions::default()
        };
        assert_eq!(
            t.lookup("b", opts).unwrap(),
            vec![("b".to_string(), 0.0)]
        );
        assert!(t.lookup("b", LookupOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn out_of_range_start_state_is_a_dead_end() {
        let t = from_att("0\t1\ta\ta\n1\n");
        let opts = LookupOptions {
            start_state: 10,
            ..LookupOptions::default()
        };
        assert!(t.lookup("a", opts).unwrap().is_empty());
    }

    #[test]
    fn duplicate_derivations_collapse() {
        // two distinct paths produce the same output and weight
        let att = "0\t1\ta\tx\n0\t2\ta\t@0@\n2\t1\t@0@\tx\n1\n";
        let t = from_att(att);
        assert_eq!(analyses(&t, "a"), vec![("x".to_string(), 0.0)]);
    }

    #[test]
    fn untokenizable_input_is_an_error() {
        let t = from_att("0\t1\ta\ta\n1\n");
        let err = t.lookup("q", LookupOptions::default()).unwrap_err();
        assert!(matches!(err, KfstError::UntokenizableInput { position: 0 }));
    }
}
