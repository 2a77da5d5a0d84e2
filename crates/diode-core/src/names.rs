use rand::distributions::{Distribution, Uniform};
use std::str::FromStr;

use crate::HarnessError;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const MIXED: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LetterCase {
    #[default]
    Mixed,
    Lower,
    Upper,
}

impl LetterCase {
    fn alphabet(self) -> &'static [u8] {
        match self {
            Self::Mixed => MIXED,
            Self::Lower => LOWER,
            Self::Upper => UPPER,
        }
    }
}

impl FromStr for LetterCase {
    type Err = HarnessError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "mixed" => Ok(Self::Mixed),
            "lower" => Ok(Self::Lower),
            "upper" => Ok(Self::Upper),
            other => Err(HarnessError::InvalidArgument(format!(
                "invalid string mode '{}', expected mixed, lower or upper",
                other
            ))),
        }
    }
}

pub fn random_string(len: usize, case: LetterCase) -> String {
    let alphabet = case.alphabet();
    let between = Uniform::from(0..alphabet.len());
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[between.sample(&mut rng)] as char)
        .collect()
}

/// `prefix` followed by `len` random mixed-case letters.
pub fn prefixed_name(prefix: &str, len: usize) -> String {
    format!("{}{}", prefix, random_string(len, LetterCase::Mixed))
}
