//! Synthetic identity generation
//!
//! Names are drawn uniformly from fixed character or word sets with a
//! `ChaCha8Rng`. Seeding the generator makes the sequence reproducible, which
//! is what tests rely on.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters used by the suffix style
pub const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Adjectives used by the composite style
pub const ADJECTIVES: &[&str] = &[
    "Cool", "Epic", "Pro", "Super", "Mega", "Ultra", "Dark", "Shadow", "Fire", "Ice", "Thunder",
    "Storm", "Swift", "Silent", "Golden", "Silver", "Wild", "Crazy", "Fast", "Strong", "Brave",
    "Bold", "Quick", "Bright",
];

/// Nouns used by the composite style
pub const NOUNS: &[&str] = &[
    "Gamer", "Player", "Warrior", "Hunter", "Miner", "Builder", "Crafter", "Knight", "Dragon",
    "Wolf", "Tiger", "Eagle", "Falcon", "Phoenix", "Ninja", "Samurai", "Wizard", "Rogue", "Archer",
    "Hero", "Legend",
];

/// Upper bound (exclusive) of the composite style's number
pub const COMPOSITE_NUMBER_MAX: u32 = 9999;

/// How synthetic names are composed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameStyle {
    /// Fixed prefix plus random alphanumerics, e.g. `AFK_hY7tP9`
    #[default]
    Suffix,
    /// Adjective + noun + number, e.g. `SwiftFalcon412`
    Composite,
}

impl fmt::Display for NameStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suffix => write!(f, "suffix"),
            Self::Composite => write!(f, "composite"),
        }
    }
}

/// Seedable generator of pseudo-random identities
#[derive(Debug, Clone)]
pub struct NameGenerator {
    style: NameStyle,
    rng: ChaCha8Rng,
    prefix: String,
    suffix_len: usize,
    max_len: usize,
    charset: Vec<u8>,
    adjectives: Vec<String>,
    nouns: Vec<String>,
}

impl NameGenerator {
    /// Create a generator with a fixed seed
    pub fn seeded(style: NameStyle, seed: u64) -> Self {
        Self::with_rng(style, ChaCha8Rng::seed_from_u64(seed))
    }

    /// Create a generator seeded from the OS
    pub fn from_entropy(style: NameStyle) -> Self {
        Self::with_rng(style, ChaCha8Rng::from_entropy())
    }

    /// Create a generator around an existing RNG
    pub fn with_rng(style: NameStyle, rng: ChaCha8Rng) -> Self {
        Self {
            style,
            rng,
            prefix: String::from("AFK_"),
            suffix_len: 6,
            max_len: 16,
            charset: SUFFIX_CHARSET.to_vec(),
            adjectives: ADJECTIVES.iter().map(|s| s.to_string()).collect(),
            nouns: NOUNS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Set the suffix-style prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the number of random suffix characters
    pub fn with_suffix_len(mut self, len: usize) -> Self {
        self.suffix_len = len.max(1);
        self
    }

    /// Set the maximum name length
    pub fn with_max_len(mut self, len: usize) -> Self {
        self.max_len = len.max(1);
        self
    }

    /// Replace the suffix character set; an empty set is ignored
    pub fn with_charset(mut self, charset: &[u8]) -> Self {
        if !charset.is_empty() {
            self.charset = charset.to_vec();
        }
        self
    }

    /// Replace the composite word lists; empty lists are ignored
    pub fn with_words(mut self, adjectives: &[&str], nouns: &[&str]) -> Self {
        if !adjectives.is_empty() {
            self.adjectives = adjectives.iter().map(|s| s.to_string()).collect();
        }
        if !nouns.is_empty() {
            self.nouns = nouns.iter().map(|s| s.to_string()).collect();
        }
        self
    }

    /// Naming style
    pub fn style(&self) -> NameStyle {
        self.style
    }

    /// Produce the next name
    ///
    /// At most `max_len` characters. The random part is kept whole and the
    /// fixed part (prefix or words) is shortened to make room for it.
    pub fn generate(&mut self) -> String {
        let mut name = match self.style {
            NameStyle::Suffix => {
                let random_len = self.suffix_len.min(self.max_len);
                let random: String = (0..random_len)
                    .map(|_| char::from(self.charset[self.rng.gen_range(0..self.charset.len())]))
                    .collect();
                let mut prefix = self.prefix.clone();
                truncate_chars(&mut prefix, self.max_len - random_len);
                prefix + &random
            }
            NameStyle::Composite => {
                let adjective = self
                    .adjectives
                    .choose(&mut self.rng)
                    .map(String::as_str)
                    .unwrap_or("Idle");
                let noun = self
                    .nouns
                    .choose(&mut self.rng)
                    .map(String::as_str)
                    .unwrap_or("Player");
                let number = self.rng.gen_range(0..COMPOSITE_NUMBER_MAX).to_string();
                let mut words = format!("{adjective}{noun}");
                truncate_chars(&mut words, self.max_len.saturating_sub(number.len()));
                words + &number
            }
        };

        // Only reached when max_len is shorter than the number itself
        truncate_chars(&mut name, self.max_len);
        name
    }
}

fn truncate_chars(name: &mut String, max_len: usize) {
    if let Some((byte_idx, _)) = name.char_indices().nth(max_len) {
        name.truncate(byte_idx);
    }
}
