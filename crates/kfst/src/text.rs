// Tabular (ATT) format codec.
//
// Line-oriented, UTF-8, tab-separated. 1/2 columns describe a final state
// (`state` or `state \t weight`), 4/5 columns a transition
// (`src \t dst \t in \t out [\t weight]`). Blank lines separate transducers
// in a multi-transducer file; only the first transducer is kept, the rest
// are parsed for well-formedness and discarded.

use crate::KfstError;
use crate::symbols::SymbolTable;
use crate::transducer::{RawTransition, Transducer};
use std::io::{BufRead, Write};

fn parse_state(field: &str, line: &str) -> Result<u32, KfstError> {
    field
        .parse::<u32>()
        .map_err(|_| KfstError::MalformedRecord(line.to_string()))
}

fn parse_weight(field: &str, line: &str) -> Result<f64, KfstError> {
    field
        .parse::<f64>()
        .map_err(|_| KfstError::MalformedRecord(line.to_string()))
}

pub(crate) fn parse<R: BufRead>(reader: R) -> Result<Transducer, KfstError> {
    let mut symbols = SymbolTable::new();
    let mut raw: Vec<RawTransition> = Vec::new();
    let mut finals: Vec<(u32, f64)> = Vec::new();
    let mut max_state: u32 = 0;
    let mut weighted = false;
    // whether any record of the first transducer has been read (leading
    // blank lines do not start a new transducer)
    let mut seen_record = false;
    let mut in_first = true;

    for line in reader.lines() {
        let line = line?;
        let line = line.strip_suffix('\r').unwrap_or(&line);
        if line.is_empty() {
            if seen_record {
                in_first = false;
            }
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        match fields.len() {
            1 | 2 => {
                let state = parse_state(fields[0], line)?;
                let weight = match fields.get(1) {
                    Some(field) => Some(parse_weight(field, line)?),
                    None => None,
                };
                if in_first {
                    seen_record = true;
                    weighted |= weight.is_some();
                    max_state = max_state.max(state);
                    finals.push((state, weight.unwrap_or(0.0)));
                }
            }
            4 | 5 => {
                let src = parse_state(fields[0], line)?;
                let dst = parse_state(fields[1], line)?;
                let weight = match fields.get(4) {
                    Some(field) => Some(parse_weight(field, line)?),
                    None => None,
                };
                if in_first {
                    seen_record = true;
                    let sym_in = symbols.intern(fields[2])?;
                    let sym_out = symbols.intern(fields[3])?;
                    weighted |= weight.is_some();
                    max_state = max_state.max(src).max(dst);
                    raw.push(RawTransition {
                        src,
                        dst,
                        sym_in,
                        sym_out,
                        weight: weight.unwrap_or(0.0),
                    });
                }
            }
            _ => return Err(KfstError::MalformedRecord(line.to_string())),
        }
    }

    // max referenced id determines the state count; the start state always
    // exists even for an empty file
    Transducer::assemble(symbols, raw, finals, max_state + 1, weighted)
}

pub(crate) fn emit<W: Write>(t: &Transducer, mut writer: W) -> Result<(), KfstError> {
    for state in 0..t.state_count() {
        for arc in t.transitions_from(state) {
            let sym_in = t.symbols().text_of(arc.sym_in);
            let sym_out = t.symbols().text_of(arc.sym_out);
            if t.is_weighted() {
                writeln!(
                    writer,
                    "{state}\t{}\t{sym_in}\t{sym_out}\t{}",
                    arc.target, arc.weight
                )?;
            } else {
                writeln!(writer, "{state}\t{}\t{sym_in}\t{sym_out}", arc.target)?;
            }
        }
    }

    let mut finals: Vec<(u32, f64)> = t.final_states().collect();
    finals.sort_by_key(|&(state, _)| state);
    for (state, weight) in finals {
        if t.is_weighted() {
            writeln!(writer, "{state}\t{weight}")?;
        } else {
            writeln!(writer, "{state}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_att(att: &str) -> Transducer {
        Transducer::from_tabular(att.as_bytes()).unwrap()
    }

    #[test]
    fn parse_unweighted_acceptor() {
        let t = from_att("0\t1\ta\ta\n1\n");
        assert!(!t.is_weighted());
        assert_eq!(t.state_count(), 2);
        assert_eq!(t.transition_count(), 1);
        assert_eq!(t.final_weight(1), Some(0.0));

        let arc = t.transitions_from(0)[0];
        assert_eq!(arc.target, 1);
        assert_eq!(t.symbols().text_of(arc.sym_in), "a");
        assert_eq!(arc.weight, 0.0);
    }

    #[test]
    fn parse_weighted_records() {
        let t = from_att("0\t1\ta\tb\t1.5\n1\t0.25\n");
        assert!(t.is_weighted());
        assert_eq!(t.transitions_from(0)[0].weight, 1.5);
        assert_eq!(t.final_weight(1), Some(0.25));
    }

    #[test]
    fn mixed_records_default_missing_weights_to_zero() {
        let t = from_att("0\t1\ta\ta\n0\t2\tb\tb\t2\n1\n2\n");
        assert!(t.is_weighted());
        assert_eq!(t.transitions_from(0)[0].weight, 0.0);
        assert_eq!(t.transitions_from(0)[1].weight, 2.0);
        assert_eq!(t.final_weight(1), Some(0.0));
    }

    #[test]
    fn symbol_ids_assigned_in_first_appearance_order() {
        let t = from_att("0\t1\tb\ta\n1\t2\tc\tb\n2\n");
        let texts: Vec<&str> = t.symbols().iter().collect();
        assert_eq!(texts, vec!["@0@", "b", "a", "c"]);
    }

    #[test]
    fn epsilon_spellings_collapse_to_id_zero() {
        let t = from_att("0\t1\t@_EPSILON_SYMBOL_@\t@0@\n1\n");
        let arc = t.transitions_from(0)[0];
        assert_eq!(arc.sym_in, 0);
        assert_eq!(arc.sym_out, 0);
        assert_eq!(t.symbols().len(), 1);
    }

    #[test]
    fn only_first_transducer_is_kept() {
        let t = from_att("0\t1\ta\ta\n1\n\n0\t1\tz\tz\t3\n1\n");
        assert_eq!(t.state_count(), 2);
        assert_eq!(t.transition_count(), 1);
        assert!(!t.is_weighted());
        assert!(t.symbols().id_of("z").is_err());
    }

    #[test]
    fn trailing_transducers_must_still_parse() {
        let err = Transducer::from_tabular("0\t1\ta\ta\n1\n\n0\t1\tz\n".as_bytes()).unwrap_err();
        assert!(matches!(err, KfstError::MalformedRecord(_)));
    }

    #[test]
    fn leading_blank_lines_are_ignored() {
        let t = from_att("\n\n0\t1\ta\ta\n1\n");
        assert_eq!(t.transition_count(), 1);
    }

    #[test]
    fn crlf_line_endings() {
        let t = from_att("0\t1\ta\ta\r\n1\r\n");
        assert_eq!(t.transition_count(), 1);
        assert_eq!(t.final_weight(1), Some(0.0));
    }

    #[test]
    fn reject_wrong_column_count() {
        let err = Transducer::from_tabular("0\t1\ta\n".as_bytes()).unwrap_err();
        assert!(matches!(err, KfstError::MalformedRecord(_)));
    }

    #[test]
    fn reject_non_numeric_state() {
        let err = Transducer::from_tabular("x\t1\ta\ta\n".as_bytes()).unwrap_err();
        assert!(matches!(err, KfstError::MalformedRecord(_)));
    }

    #[test]
    fn reject_non_numeric_weight() {
        let err = Transducer::from_tabular("0\t1\ta\ta\theavy\n".as_bytes()).unwrap_err();
        assert!(matches!(err, KfstError::MalformedRecord(_)));
    }

    #[test]
    fn empty_input_yields_single_start_state() {
        let t = from_att("");
        assert_eq!(t.state_count(), 1);
        assert_eq!(t.transition_count(), 0);
        assert_eq!(t.final_weight(0), None);
    }

    #[test]
    fn emit_round_trips_through_parse() {
        let att = "0\t1\ta\tx\t1.5\n0\t2\ta\ty\t2\n1\t0\n2\t0.5\n";
        let t = from_att(att);
        let mut out = Vec::new();
        t.to_tabular(&mut out).unwrap();
        let reparsed = Transducer::from_tabular(out.as_slice()).unwrap();

        assert_eq!(reparsed.state_count(), t.state_count());
        assert_eq!(reparsed.transition_count(), t.transition_count());
        assert_eq!(reparsed.final_weight(1), Some(0.0));
        assert_eq!(reparsed.final_weight(2), Some(0.5));
        for state in 0..t.state_count() {
            assert_eq!(reparsed.transitions_from(state), t.transitions_from(state));
        }
    }
}
