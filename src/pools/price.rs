use std::cmp::Ordering;

use alloy_primitives::U160;
use malachite::{
    num::{
        arithmetic::traits::{Pow, PowerOf2},
        basic::traits::Zero,
        conversion::traits::RoundingFrom,
    },
    rounding_modes::RoundingMode,
    Natural, Rational,
};

use super::DecodeMode;
use crate::{errors::DecodeError, utils::u160_to_natural};

/// Converts a pool's `sqrtPriceX96` into the price of token0 in whole units
/// of token1:
///
/// `price = sqrtPriceX96^2 / 2^192 / 10^(decimals1 - decimals0)`
///
/// The difference in decimals may be negative, the rescale is always done as
/// an exact rational. A zero `sqrtPriceX96` decodes to `0.0`.
pub fn decode_price(
    sqrt_price_x96: U160,
    decimals0: u8,
    decimals1: u8,
    mode: DecodeMode,
) -> Result<f32, DecodeError> {
    let sqrt_price = u160_to_natural(sqrt_price_x96);
    let price_x192 = &sqrt_price * &sqrt_price;
    let q192 = Natural::power_of_2(192u64);

    let raw_price = match mode {
        DecodeMode::Exact => Rational::from_naturals(price_x192, q192),
        DecodeMode::TruncateFirst => Rational::from(price_x192 / q192),
    };

    to_f32(raw_price * decimals_factor(decimals0, decimals1))
}

/// `10^decimals0 / 10^decimals1`
fn decimals_factor(decimals0: u8, decimals1: u8) -> Rational {
    Rational::from_naturals(
        Natural::from(10u8).pow(decimals0 as u64),
        Natural::from(10u8).pow(decimals1 as u64),
    )
}

fn to_f32(price: Rational) -> Result<f32, DecodeError> {
    if price == Rational::ZERO {
        return Ok(0.0);
    }

    // rounding saturates at f32::MAX instead of going to infinity
    let (value, ordering) = f32::rounding_from(price, RoundingMode::Nearest);

    if !value.is_finite() || (value == f32::MAX && ordering == Ordering::Less) {
        Err(DecodeError::Overflow)
    } else if value == 0.0 {
        Err(DecodeError::Underflow)
    } else {
        Ok(value)
    }
}
