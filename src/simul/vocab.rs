//! Token dictionaries and text rendering.
//!
//! Rendering is applied per token and only the very first leading space is
//! trimmed, so the text of a token prefix is always a prefix of the text of the
//! whole sequence. Delta computation relies on that.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::text::{BOS_SYMBOL, BOW_PREFIX, EOS_SYMBOL, PAD_SYMBOL, UNK_SYMBOL};
use crate::error::{ErrorContext, Result};
use crate::types::TokenId;

/// How a track's tokens become text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextStyle {
    /// Sentencepiece pieces: markers stripped, word boundaries become spaces.
    #[default]
    Subword,
    /// Discrete units: symbols joined by single spaces.
    Units,
}

/// Represents the vocabulary for token decoding.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    /// Symbols indexed by token id
    symbols: Vec<String>,
}

impl Vocabulary {
    /// Build a vocabulary with the fairseq special symbols followed by `symbols`.
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all: Vec<String> = [BOS_SYMBOL, PAD_SYMBOL, EOS_SYMBOL, UNK_SYMBOL]
            .iter()
            .map(|s| s.to_string())
            .collect();
        all.extend(symbols.into_iter().map(Into::into));
        Self { symbols: all }
    }

    /// Load a fairseq `dict.txt`.
    ///
    /// Each line is `<symbol> <count>`; ids start after the four special symbols.
    /// Blank lines are skipped and a line without a count is taken whole.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading dictionary {}", path.display()))?;

        let symbols = content.lines().filter_map(|line| {
            let line = line.trim_end();
            if line.trim().is_empty() {
                return None;
            }
            match line.rsplit_once(' ') {
                Some((symbol, count)) if count.parse::<i64>().is_ok() => Some(symbol.to_string()),
                _ => Some(line.to_string()),
            }
        });
        let vocabulary = Self::from_symbols(symbols);

        debug!("Loaded vocabulary with {} tokens", vocabulary.len());
        Ok(vocabulary)
    }

    /// Get the symbol for a given ID, or None if not found.
    pub fn symbol(&self, id: TokenId) -> Option<&str> {
        self.symbols.get(id.index()).map(|s| s.as_str())
    }

    /// Look up the id of a symbol.
    pub fn id_of(&self, symbol: &str) -> Option<TokenId> {
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .map(|idx| TokenId(idx as u32))
    }

    /// Get the number of tokens in the vocabulary.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Check if the vocabulary is empty.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Whether every token id is present.
    pub fn contains_all(&self, tokens: &[TokenId]) -> bool {
        tokens.iter().all(|t| t.index() < self.symbols.len())
    }

    /// Render tokens to text in the given style.
    ///
    /// Unknown ids render as the unknown-token marker.
    pub fn render(&self, tokens: &[TokenId], style: TextStyle) -> String {
        match style {
            TextStyle::Subword => {
                let mut text = String::new();
                for &token in tokens {
                    text.push_str(&normalize_piece(self.symbol(token).unwrap_or(UNK_SYMBOL)));
                }
                match text.strip_prefix(' ') {
                    Some(rest) => rest.to_string(),
                    None => text,
                }
            }
            TextStyle::Units => {
                let mut text = String::new();
                for &token in tokens {
                    if token == TokenId::BOS || token == TokenId::EOS || token == TokenId::PAD {
                        continue;
                    }
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(self.symbol(token).unwrap_or(UNK_SYMBOL));
                }
                text
            }
        }
    }
}

/// Normalize one sentencepiece symbol.
fn normalize_piece(piece: &str) -> String {
    match piece {
        BOS_SYMBOL | EOS_SYMBOL | PAD_SYMBOL => String::new(),
        UNK_SYMBOL => " ".to_string(),
        _ => piece.replace(BOW_PREFIX, " ").replace('_', " "),
    }
}
