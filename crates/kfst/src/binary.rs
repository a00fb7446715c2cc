// Binary (KFST) format codec.
//
// Layout, little-endian throughout:
//   bytes 0..4    magic "KFST"
//   bytes 4..6    version (u16, currently 0)
//   bytes 6..8    symbol count (u16)
//   bytes 8..12   state count (u32)
//   bytes 12..16  final state count (u32)
//   byte  16      weighted flag (0 or 1)
//   then          symbol count NUL-terminated UTF-8 strings, in id order
//   then          one LZMA stream: transitions, then final states
//
// A transition is `u32 src, u32 dst, u16 in, u16 out` plus `f64 weight` when
// weighted; a final state is `u32 state` plus `f64 weight` when weighted.
// The transition count is not stored: transitions fill whatever the payload
// holds before the final-state region.

use crate::KfstError;
use crate::symbols::{EPSILON_ALIAS, EPSILON_TEXT, SymbolTable};
use crate::transducer::{RawTransition, Transducer};
use std::io::{Read, Write};

pub(crate) const MAGIC: [u8; 4] = *b"KFST";
pub(crate) const VERSION: u16 = 0;
const HEADER_SIZE: usize = 17;

struct Header {
    symbol_count: u16,
    state_count: u32,
    final_count: u32,
    weighted: bool,
}

#[inline]
fn read_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

#[inline]
fn read_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

#[inline]
fn read_f64(data: &[u8], off: usize) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[off..off + 8]);
    f64::from_le_bytes(bytes)
}

fn parse_header(data: &[u8]) -> Result<Header, KfstError> {
    if data.len() < HEADER_SIZE {
        return Err(KfstError::Truncated {
            expected: HEADER_SIZE,
            actual: data.len(),
        });
    }
    if data[0..4] != MAGIC {
        return Err(KfstError::BadMagic);
    }
    let version = read_u16(data, 4);
    if version != VERSION {
        return Err(KfstError::UnsupportedVersion(version));
    }
    let weighted = match data[16] {
        0 => false,
        1 => true,
        other => {
            return Err(KfstError::MalformedRecord(format!(
                "weighted flag must be 0 or 1, got {other}"
            )));
        }
    };
    Ok(Header {
        symbol_count: read_u16(data, 6),
        state_count: read_u32(data, 8),
        final_count: read_u32(data, 12),
        weighted,
    })
}

pub(crate) fn parse<R: Read>(mut reader: R) -> Result<Transducer, KfstError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    let header = parse_header(&data)?;

    // Symbol section: NUL-terminated strings in id order. The table is
    // seeded with epsilon, so symbol 0 must be one of its spellings.
    let mut symbols = SymbolTable::new();
    let mut pos = HEADER_SIZE;
    for i in 0..header.symbol_count {
        let start = pos;
        while pos < data.len() && data[pos] != 0 {
            pos += 1;
        }
        if pos >= data.len() {
            return Err(KfstError::Truncated {
                expected: pos + 1,
                actual: data.len(),
            });
        }
        let text = std::str::from_utf8(&data[start..pos])
            .map_err(|_| KfstError::MalformedRecord(format!("symbol {i} is not valid UTF-8")))?;
        pos += 1;

        if i == 0 {
            if text != EPSILON_TEXT && text != EPSILON_ALIAS {
                return Err(KfstError::MalformedRecord(format!(
                    "symbol 0 must be epsilon, got {text:?}"
                )));
            }
        } else {
            let id = symbols.intern(text)?;
            if id != i {
                return Err(KfstError::MalformedRecord(format!(
                    "duplicate symbol {text:?} in symbol table"
                )));
            }
        }
    }

    let mut payload = Vec::new();
    lzma_rs::lzma_decompress(&mut &data[pos..], &mut payload)
        .map_err(|e| KfstError::InvalidPayload(format!("{e:?}")))?;

    let trans_size = if header.weighted { 20 } else { 12 };
    let final_size = if header.weighted { 12 } else { 4 };
    let finals_bytes = header.final_count as usize * final_size;
    if payload.len() < finals_bytes {
        return Err(KfstError::Truncated {
            expected: finals_bytes,
            actual: payload.len(),
        });
    }
    let trans_bytes = payload.len() - finals_bytes;
    if trans_bytes % trans_size != 0 {
        return Err(KfstError::Truncated {
            expected: finals_bytes + (trans_bytes / trans_size + 1) * trans_size,
            actual: payload.len(),
        });
    }

    let mut raw = Vec::with_capacity(trans_bytes / trans_size);
    let mut off = 0;
    while off < trans_bytes {
        raw.push(RawTransition {
            src: read_u32(&payload, off),
            dst: read_u32(&payload, off + 4),
            sym_in: read_u16(&payload, off + 8),
            sym_out: read_u16(&payload, off + 10),
            weight: if header.weighted {
                read_f64(&payload, off + 12)
            } else {
                0.0
            },
        });
        off += trans_size;
    }

    let mut finals = Vec::with_capacity(header.final_count as usize);
    for _ in 0..header.final_count {
        let state = read_u32(&payload, off);
        let weight = if header.weighted {
            read_f64(&payload, off + 4)
        } else {
            0.0
        };
        finals.push((state, weight));
        off += final_size;
    }

    Transducer::assemble(symbols, raw, finals, header.state_count, header.weighted)
}

pub(crate) fn emit<W: Write>(t: &Transducer, mut writer: W) -> Result<(), KfstError> {
    let mut finals: Vec<(u32, f64)> = t.final_states().collect();
    finals.sort_by_key(|&(state, _)| state);

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.extend_from_slice(&MAGIC);
    header.extend_from_slice(&VERSION.to_le_bytes());
    header.extend_from_slice(&(t.symbols().len() as u16).to_le_bytes());
    header.extend_from_slice(&t.state_count().to_le_bytes());
    header.extend_from_slice(&(finals.len() as u32).to_le_bytes());
    header.push(t.is_weighted() as u8);
    writer.write_all(&header)?;

    for text in t.symbols().iter() {
        writer.write_all(text.as_bytes())?;
        writer.write_all(&[0])?;
    }

    let mut payload = Vec::new();
    for state in 0..t.state_count() {
        for arc in t.transitions_from(state) {
            payload.extend_from_slice(&state.to_le_bytes());
            payload.extend_from_slice(&arc.target.to_le_bytes());
            payload.extend_from_slice(&arc.sym_in.to_le_bytes());
            payload.extend_from_slice(&arc.sym_out.to_le_bytes());
            if t.is_weighted() {
                payload.extend_from_slice(&arc.weight.to_le_bytes());
            }
        }
    }
    for (state, weight) in finals {
        payload.extend_from_slice(&state.to_le_bytes());
        if t.is_weighted() {
            payload.extend_from_slice(&weight.to_le_bytes());
        }
    }

    let mut input: &[u8] = &payload;
    lzma_rs::lzma_compress(&mut input, &mut writer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_att(att: &str) -> Transducer {
        Transducer::from_tabular(att.as_bytes()).unwrap()
    }

    fn to_bytes(t: &Transducer) -> Vec<u8> {
        let mut out = Vec::new();
        t.to_binary(&mut out).unwrap();
        out
    }

    #[test]
    fn header_layout() {
        let t = from_att("0\t1\ta\tb\t1\n1\t0.5\n");
        let bytes = to_bytes(&t);
        assert_eq!(&bytes[0..4], b"KFST");
        assert_eq!(read_u16(&bytes, 4), 0); // version
        assert_eq!(read_u16(&bytes, 6), 3); // @0@, a, b
        assert_eq!(read_u32(&bytes, 8), 2); // states
        assert_eq!(read_u32(&bytes, 12), 1); // finals
        assert_eq!(bytes[16], 1); // weighted
        assert_eq!(&bytes[17..21], b"@0@\0");
    }

    #[test]
    fn round_trip_weighted() {
        let t = from_att("0\t1\ta\tx\t1.5\n0\t2\ta\ty\t-2\n1\t0\n2\t0.25\n");
        let back = Transducer::from_binary(to_bytes(&t).as_slice()).unwrap();

        assert_eq!(back.state_count(), t.state_count());
        assert_eq!(back.transition_count(), t.transition_count());
        assert!(back.is_weighted());
        let texts: Vec<&str> = back.symbols().iter().collect();
        assert_eq!(texts, t.symbols().iter().collect::<Vec<_>>());
        for state in 0..t.state_count() {
            assert_eq!(back.transitions_from(state), t.transitions_from(state));
        }
        assert_eq!(back.final_weight(1), Some(0.0));
        assert_eq!(back.final_weight(2), Some(0.25));
    }

    #[test]
    fn round_trip_unweighted() {
        let t = from_att("0\t1\ta\ta\n1\t2\tb\tb\n2\n");
        let back = Transducer::from_binary(to_bytes(&t).as_slice()).unwrap();
        assert!(!back.is_weighted());
        assert_eq!(back.transition_count(), 2);
        assert_eq!(back.final_weight(2), Some(0.0));
        for state in 0..t.state_count() {
            assert_eq!(back.transitions_from(state), t.transitions_from(state));
        }
    }

    #[test]
    fn round_trip_flag_diacritics() {
        let t = from_att("0\t1\t@P.K.V@\t@0@\n1\t2\t@R.K.V@\t+N\n2\n");
        let back = Transducer::from_binary(to_bytes(&t).as_slice()).unwrap();
        assert_eq!(back.symbols().feature_count(), 1);
        let texts: Vec<&str> = back.symbols().iter().collect();
        assert_eq!(texts, vec!["@0@", "@P.K.V@", "@R.K.V@", "+N"]);
    }

    #[test]
    fn reject_bad_magic() {
        let t = from_att("0\n");
        let mut bytes = to_bytes(&t);
        bytes[0] = b'X';
        let err = Transducer::from_binary(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, KfstError::BadMagic));
    }

    #[test]
    fn reject_unsupported_version() {
        let t = from_att("0\n");
        let mut bytes = to_bytes(&t);
        bytes[4] = 9;
        let err = Transducer::from_binary(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, KfstError::UnsupportedVersion(9)));
    }

    #[test]
    fn reject_short_header() {
        let err = Transducer::from_binary(&b"KFST"[..]).unwrap_err();
        assert!(matches!(err, KfstError::Truncated { expected: 17, .. }));
    }

    #[test]
    fn reject_unterminated_symbol_section() {
        let t = from_att("0\t1\ta\ta\n1\n");
        let bytes = to_bytes(&t);
        // cut inside the symbol strings
        let err = Transducer::from_binary(&bytes[..19]).unwrap_err();
        assert!(matches!(err, KfstError::Truncated { .. }));
    }

    #[test]
    fn reject_corrupt_payload() {
        let t = from_att("0\t1\ta\ta\n1\n");
        let mut bytes = to_bytes(&t);
        let len = bytes.len();
        bytes.truncate(len - 4);
        let err = Transducer::from_binary(bytes.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            KfstError::InvalidPayload(_) | KfstError::Truncated { .. }
        ));
    }

    #[test]
    fn reject_bad_weighted_flag() {
        let t = from_att("0\n");
        let mut bytes = to_bytes(&t);
        bytes[16] = 7;
        let err = Transducer::from_binary(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, KfstError::MalformedRecord(_)));
    }

    #[test]
    fn reject_non_epsilon_first_symbol() {
        let t = from_att("0\t1\ta\ta\n1\n");
        let mut bytes = to_bytes(&t);
        // overwrite "@0@" with an equally long regular symbol
        bytes[17..20].copy_from_slice(b"abc");
        let err = Transducer::from_binary(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, KfstError::MalformedRecord(_)));
    }
}
