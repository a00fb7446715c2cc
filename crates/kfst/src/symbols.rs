// Symbol table: text-to-id interning, classification, input tokenization.

use crate::KfstError;
use crate::flags::{FlagDiacritic, FlagRegistry};
use hashbrown::HashMap;

/// Symbol id of epsilon. The table is seeded so this always holds.
pub const EPSILON: u16 = 0;

/// Canonical textual form of epsilon.
pub const EPSILON_TEXT: &str = "@0@";

/// Alternate textual form of epsilon accepted on input.
pub const EPSILON_ALIAS: &str = "@_EPSILON_SYMBOL_@";

const IDENTITY_TEXT: &str = "@_IDENTITY_SYMBOL_@";
const UNKNOWN_TEXT: &str = "@_UNKNOWN_SYMBOL_@";

/// Classification of a symbol, computed once when it is interned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// The empty symbol: consumes no input, produces no output.
    Epsilon,
    /// An ordinary token, possibly multi-character (`a`, `+Noun`).
    Regular,
    /// A flag diacritic such as `@P.CASE.NOM@`.
    Flag(FlagDiacritic),
    /// Matches any input character absent from the table; copies it through
    /// as output.
    Identity,
    /// Same matching behavior as [`SymbolKind::Identity`].
    Unknown,
}

/// One unit of tokenized input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// A regular symbol from the table.
    Symbol(u16),
    /// A character with no symbol of its own, matchable only by
    /// identity/unknown transitions.
    Other(char),
}

/// Bidirectional mapping between symbol text and dense `u16` ids.
///
/// Ids are assigned in insertion order; id 0 is always epsilon (the table is
/// seeded with it before any file content is interned). Classification is
/// computed at insertion by pattern-matching the `@...@` envelopes, so flag
/// diacritic syntax errors surface at load time, not during lookup.
pub struct SymbolTable {
    texts: Vec<String>,
    kinds: Vec<SymbolKind>,
    ids: HashMap<String, u16>,
    registry: FlagRegistry,
    /// Longest regular symbol in characters, bounding the tokenizer's
    /// greedy match.
    longest_regular: usize,
    /// Whether an identity or unknown symbol is present, enabling
    /// pass-through tokens.
    has_passthrough: bool,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Create a table containing only epsilon (id 0).
    pub fn new() -> Self {
        let mut ids = HashMap::new();
        ids.insert(EPSILON_TEXT.to_string(), EPSILON);
        ids.insert(EPSILON_ALIAS.to_string(), EPSILON);
        Self {
            texts: vec![EPSILON_TEXT.to_string()],
            kinds: vec![SymbolKind::Epsilon],
            ids,
            registry: FlagRegistry::new(),
            longest_regular: 0,
            has_passthrough: false,
        }
    }

    /// Number of symbols in the table.
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    /// Id of an existing symbol, or a freshly assigned id for a new one.
    ///
    /// Both epsilon spellings resolve to id 0. Returns
    /// `MalformedFlagDiacritic` for broken flag syntax.
    pub fn intern(&mut self, text: &str) -> Result<u16, KfstError> {
        if let Some(&id) = self.ids.get(text) {
            return Ok(id);
        }
        if text.is_empty() {
            return Err(KfstError::MalformedRecord("empty symbol".to_string()));
        }
        if self.texts.len() >= u16::MAX as usize {
            return Err(KfstError::MalformedRecord(format!(
                "symbol table overflow at {text:?}"
            )));
        }

        let kind = if text == IDENTITY_TEXT {
            self.has_passthrough = true;
            SymbolKind::Identity
        } else if text == UNKNOWN_TEXT {
            self.has_passthrough = true;
            SymbolKind::Unknown
        } else if FlagRegistry::looks_like_flag(text) {
            SymbolKind::Flag(self.registry.parse(text)?)
        } else {
            self.longest_regular = self.longest_regular.max(text.chars().count());
            SymbolKind::Regular
        };

        let id = self.texts.len() as u16;
        self.texts.push(text.to_string());
        self.kinds.push(kind);
        self.ids.insert(text.to_string(), id);
        Ok(id)
    }

    /// Id of a symbol already in the table.
    pub fn id_of(&self, text: &str) -> Result<u16, KfstError> {
        self.ids
            .get(text)
            .copied()
            .ok_or_else(|| KfstError::UnknownSymbol(text.to_string()))
    }

    /// Canonical text of a symbol id. Ids come from this table, so the id is
    /// expected to be in range.
    pub fn text_of(&self, id: u16) -> &str {
        &self.texts[id as usize]
    }

    /// Classification of a symbol id.
    pub fn kind_of(&self, id: u16) -> SymbolKind {
        self.kinds[id as usize]
    }

    /// Symbol texts in id order, as stored in the binary format.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.texts.iter().map(String::as_str)
    }

    /// Number of distinct flag diacritic features.
    pub fn feature_count(&self) -> u16 {
        self.registry.feature_count()
    }

    /// Segment an input string into symbol ids by longest-match greedy
    /// tokenization.
    ///
    /// At each position the longest prefix equal to some regular symbol is
    /// consumed. A character with no matching prefix becomes
    /// [`Token::Other`] when the table has an identity or unknown symbol;
    /// otherwise tokenization fails with `UntokenizableInput` carrying the
    /// character position.
    pub fn tokenize(&self, input: &str) -> Result<Vec<Token>, KfstError> {
        let chars: Vec<(usize, char)> = input.char_indices().collect();
        let n = chars.len();
        let offset_of = |k: usize| {
            if k < n {
                chars[k].0
            } else {
                input.len()
            }
        };

        let mut tokens = Vec::with_capacity(n);
        let mut pos = 0;
        while pos < n {
            let start = chars[pos].0;
            let limit = (pos + self.longest_regular).min(n);
            let mut matched = None;
            for end in (pos + 1..=limit).rev() {
                let candidate = &input[start..offset_of(end)];
                if let Some(&id) = self.ids.get(candidate) {
                    if self.kinds[id as usize] == SymbolKind::Regular {
                        matched = Some((id, end));
                        break;
                    }
                }
            }
            match matched {
                Some((id, end)) => {
                    tokens.push(Token::Symbol(id));
                    pos = end;
                }
                None if self.has_passthrough => {
                    tokens.push(Token::Other(chars[pos].1));
                    pos += 1;
                }
                None => return Err(KfstError::UntokenizableInput { position: pos }),
            }
        }
        Ok(tokens)
    }
}

impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolTable")
            .field("symbol_count", &self.texts.len())
            .field("feature_count", &self.registry.feature_count())
            .field("longest_regular", &self.longest_regular)
            .field("has_passthrough", &self.has_passthrough)
            .finish()
    }
}
