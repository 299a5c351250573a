use ring::rand::{SecureRandom, SystemRandom};

use crate::error::PromoError;

const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const DEFAULT_CODE_LENGTH: usize = 12;
pub const DEFAULT_DISCOUNT_MIN: i16 = 10;
pub const DEFAULT_DISCOUNT_MAX: i16 = 20;

/// Source of candidate codes for minting
pub trait CodeSource: Send + Sync {
    fn next_code(&self) -> Result<String, PromoError>;

    fn next_discount(&self) -> Result<i16, PromoError>;
}

/// Draws codes and discounts from the operating system CSPRNG.
pub struct RandomCodeSource {
    rng: SystemRandom,
    length: usize,
    discount_min: i16,
    discount_max: i16,
}

impl RandomCodeSource {
    /// Fails unless `length` is positive and `discount_min..=discount_max` is
    /// a non-empty range within 1..=100.
    pub fn new(length: usize, discount_min: i16, discount_max: i16) -> Result<Self, PromoError> {
        if length == 0 {
            return Err(PromoError::InvalidCodeSettings(
                "code length must be positive".to_string(),
            ));
        }
        if discount_min < 1 || discount_max > 100 || discount_min > discount_max {
            return Err(PromoError::InvalidCodeSettings(format!(
                "discount range {}..={} must lie within 1..=100",
                discount_min, discount_max
            )));
        }

        Ok(Self {
            rng: SystemRandom::new(),
            length,
            discount_min,
            discount_max,
        })
    }

    /// Uniform value in `0..bound` using rejection sampling on single bytes.
    fn uniform_below(&self, bound: u8) -> Result<u8, PromoError> {
        let limit = u8::MAX - (u8::MAX % bound);
        loop {
            let mut byte = [0u8; 1];
            self.rng.fill(&mut byte).map_err(|_| PromoError::Random)?;
            if byte[0] < limit {
                return Ok(byte[0] % bound);
            }
        }
    }
}

impl Default for RandomCodeSource {
    fn default() -> Self {
        Self {
            rng: SystemRandom::new(),
            length: DEFAULT_CODE_LENGTH,
            discount_min: DEFAULT_DISCOUNT_MIN,
            discount_max: DEFAULT_DISCOUNT_MAX,
        }
    }
}

impl CodeSource for RandomCodeSource {
    fn next_code(&self) -> Result<String, PromoError> {
        let bound = ALPHABET.len() as u8;
        (0..self.length)
            .map(|_| self.uniform_below(bound).map(|i| ALPHABET[i as usize] as char))
            .collect()
    }

    fn next_discount(&self) -> Result<i16, PromoError> {
        let span = (self.discount_max - self.discount_min + 1) as u8;
        Ok(self.discount_min + self.uniform_below(span)? as i16)
    }
}
