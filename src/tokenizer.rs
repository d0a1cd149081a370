// tokenizer.rs
// Description: Whitespace token set used by the playground plus an approximate
//              token count estimator for large input warnings.
//              - TokenSet is the plain whitespace split, immutable once built.
//              - The estimator reuses the ASCII whitespace and punctuation
//                pre-tokenization and charges long word pieces as several sub tokens.
// History:
// - 2026-10-12: Replace BPE training with whitespace tokens and estimator.
// - 2026-10-13: Fall back to the word count for non ASCII input.

use serde::{Deserialize, Serialize};

use crate::utils;

// Average characters per sub token used by the estimator.
const CHARS_PER_SUBTOKEN: usize = 4;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    v_tokens: Vec<String>,
}

impl TokenSet {
    pub fn from_text(s_text: &str) -> Self {
        Self {
            v_tokens: s_text.split_whitespace().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.v_tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v_tokens.is_empty()
    }

    pub fn get(&self, i_index: usize) -> Option<&str> {
        self.v_tokens.get(i_index).map(|s| s.as_str())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.v_tokens
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.v_tokens.iter().map(|s| s.as_str())
    }
}

fn is_split_punct(ch: char) -> bool {
    matches!(
        ch,
        '.' | ',' | ':' | ';' | '!' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '"' | '\''
    )
}

fn pre_tokenize_ascii_ws_punct(s_text: &str) -> Vec<String> {
    let mut v_out: Vec<String> = Vec::new();
    let s_norm = utils::normalize_text_ascii(s_text);

    for s_piece in s_norm.split_whitespace() {
        let mut s_buf = String::new();
        for ch in s_piece.chars() {
            if is_split_punct(ch) {
                if !s_buf.is_empty() {
                    v_out.push(std::mem::take(&mut s_buf));
                }
                v_out.push(ch.to_string());
            } else {
                s_buf.push(ch);
            }
        }
        if !s_buf.is_empty() {
            v_out.push(s_buf);
        }
    }

    v_out
}

/// Approximate number of model tokens in `s_text`.
///
/// Only used to warn on large inputs, never on the playback path.
pub fn estimate_token_count(s_text: &str) -> usize {
    if !s_text.is_ascii() {
        return s_text.split_whitespace().count();
    }

    pre_tokenize_ascii_ws_punct(s_text)
        .iter()
        .map(|s_piece| {
            if s_piece.len() == 1 && s_piece.chars().all(is_split_punct) {
                1
            } else {
                s_piece.len().div_ceil(CHARS_PER_SUBTOKEN)
            }
        })
        .sum()
}
