//! Run-length encoding for bloom filter transfer.
//!
//! A run of `n` identical symbols is written as the symbol followed by the
//! decimal digits of `n`, or as the bare symbol when `n == 1`. Tokens are
//! concatenated without delimiters, so symbols must never be decimal digits.

use thiserror::Error;

/// Errors produced while encoding or decoding a run-length token stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RleError {
    #[error("digit at position {position} where a run symbol was expected")]
    UnexpectedDigit { position: usize },
    #[error("run at position {position} has a count of zero")]
    ZeroCount { position: usize },
    #[error("run count at position {position} has a leading zero")]
    LeadingZero { position: usize },
    #[error("run count at position {position} does not fit in usize")]
    CountOverflow { position: usize },
    #[error("input symbol at position {position} is a decimal digit")]
    DigitSymbol { position: usize },
    #[error("decoded output would exceed {limit} symbols")]
    LimitExceeded { limit: usize },
}

/// Encodes `input` into run-length tokens.
///
/// Fails with [`RleError::DigitSymbol`] if the input contains a decimal
/// digit, since the result could not be decoded unambiguously.
pub fn encode(input: &str) -> Result<String, RleError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.char_indices();

    let Some((position, mut current)) = chars.next() else {
        return Ok(output);
    };
    if current.is_ascii_digit() {
        return Err(RleError::DigitSymbol { position });
    }
    let mut count = 1usize;

    for (position, symbol) in chars {
        if symbol.is_ascii_digit() {
            return Err(RleError::DigitSymbol { position });
        }
        if symbol == current {
            count += 1;
        } else {
            output = write_output(output, current, count);
            current = symbol;
            count = 1;
        }
    }

    Ok(write_output(output, current, count))
}

/// Appends one token for `count` repetitions of `symbol` to `output`.
pub fn write_output(mut output: String, symbol: char, count: usize) -> String {
    output.push(symbol);
    if count != 1 {
        output.push_str(&count.to_string());
    }
    output
}

/// Expands a run-length token stream back into the original symbols.
pub fn decode(encoded: &str) -> Result<String, RleError> {
    decode_with_limit(encoded, usize::MAX)
}

/// Like [`decode`], but refuses to produce more than `limit` symbols.
///
/// Peers use this with the advertised filter size so a hostile count such
/// as `a99999999999` is rejected before anything is allocated for it.
pub fn decode_with_limit(encoded: &str, limit: usize) -> Result<String, RleError> {
    let mut output = String::new();
    let mut produced = 0usize;
    let mut chars = encoded.char_indices().peekable();

    while let Some((position, symbol)) = chars.next() {
        if symbol.is_ascii_digit() {
            return Err(RleError::UnexpectedDigit { position });
        }

        let count_start = position + symbol.len_utf8();
        let mut count: Option<usize> = None;
        while let Some(&(digit_position, digit)) = chars.peek() {
            let Some(value) = digit.to_digit(10) else {
                break;
            };
            if count == Some(0) {
                return Err(RleError::LeadingZero { position: count_start });
            }
            count = count
                .unwrap_or(0)
                .checked_mul(10)
                .and_then(|c| c.checked_add(value as usize))
                .map(Some)
                .ok_or(RleError::CountOverflow { position: digit_position })?;
            chars.next();
        }

        let count = count.unwrap_or(1);
        if count == 0 {
            return Err(RleError::ZeroCount { position: count_start });
        }

        produced = produced
            .checked_add(count)
            .filter(|total| *total <= limit)
            .ok_or(RleError::LimitExceeded { limit })?;
        output.extend(std::iter::repeat(symbol).take(count));
    }

    Ok(output)
}
