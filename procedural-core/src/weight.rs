//! Weight vectors - multi-axis balance scores for generated content.
//!
//! Every monster, treasure, shrine and merchant carries a `WeightVector`
//! describing how it shifts the player's odds. Vectors are immutable values:
//! addition, negation and scaling always return a new vector.
//!
//! Two scalars are derived from a vector:
//! - [`WeightVector::balance`] - signed net balance (sum of all axes). Positive
//!   favours the player (rewards), negative favours the dungeon (danger). This
//!   is the scalar clamped to `[-cluster_weight_range, cluster_weight_range]`.
//! - [`WeightVector::norm`] - Euclidean magnitude, used to measure how far a
//!   running total is from its budget.

use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, Mul, Neg, Sub};

/// Number of balance axes carried by every weight vector
pub const AXIS_COUNT: usize = 14;

/// Named balance axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightAxis {
    HealthRatio,
    Attack,
    CriticalChance,
    CriticalDamage,
    Dodge,
    Accuracy,
    Defense,
    GoldBonus,
    ExperienceBonus,
    Mana,
    MagicAttack,
    MagicDefense,
    ElementalDamage,
    Regeneration,
}

impl WeightAxis {
    pub const ALL: [WeightAxis; AXIS_COUNT] = [
        WeightAxis::HealthRatio,
        WeightAxis::Attack,
        WeightAxis::CriticalChance,
        WeightAxis::CriticalDamage,
        WeightAxis::Dodge,
        WeightAxis::Accuracy,
        WeightAxis::Defense,
        WeightAxis::GoldBonus,
        WeightAxis::ExperienceBonus,
        WeightAxis::Mana,
        WeightAxis::MagicAttack,
        WeightAxis::MagicDefense,
        WeightAxis::ElementalDamage,
        WeightAxis::Regeneration,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WeightAxis::HealthRatio => "health_ratio",
            WeightAxis::Attack => "attack",
            WeightAxis::CriticalChance => "critical_chance",
            WeightAxis::CriticalDamage => "critical_damage",
            WeightAxis::Dodge => "dodge",
            WeightAxis::Accuracy => "accuracy",
            WeightAxis::Defense => "defense",
            WeightAxis::GoldBonus => "gold_bonus",
            WeightAxis::ExperienceBonus => "experience_bonus",
            WeightAxis::Mana => "mana",
            WeightAxis::MagicAttack => "magic_attack",
            WeightAxis::MagicDefense => "magic_defense",
            WeightAxis::ElementalDamage => "elemental_damage",
            WeightAxis::Regeneration => "regeneration",
        }
    }
}

/// Fixed-dimension balance vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WeightVector {
    axes: [f64; AXIS_COUNT],
}

impl WeightVector {
    pub const ZERO: WeightVector = WeightVector {
        axes: [0.0; AXIS_COUNT],
    };

    pub fn new(axes: [f64; AXIS_COUNT]) -> Self {
        Self { axes }
    }

    /// Build a vector from `(axis, value)` pairs; unnamed axes are zero
    pub fn from_pairs(pairs: &[(WeightAxis, f64)]) -> Self {
        let mut axes = [0.0; AXIS_COUNT];
        for (axis, value) in pairs {
            axes[axis.index()] += value;
        }
        Self { axes }
    }

    /// Vector spread evenly across all axes whose `balance()` equals `value`
    pub fn with_balance(value: f64) -> Self {
        Self {
            axes: [value / AXIS_COUNT as f64; AXIS_COUNT],
        }
    }

    pub fn get(&self, axis: WeightAxis) -> f64 {
        self.axes[axis.index()]
    }

    /// Copy of this vector with one axis replaced
    pub fn with(&self, axis: WeightAxis, value: f64) -> Self {
        let mut axes = self.axes;
        axes[axis.index()] = value;
        Self { axes }
    }

    pub fn axes(&self) -> &[f64; AXIS_COUNT] {
        &self.axes
    }

    /// Signed net balance (sum of all axes)
    pub fn balance(&self) -> f64 {
        self.axes.iter().sum()
    }

    /// Euclidean magnitude
    pub fn norm(&self) -> f64 {
        self.axes.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Magnitude of what is left between this running total and `budget`
    pub fn remaining(&self, budget: &WeightVector) -> f64 {
        (*budget - *self).norm()
    }

    pub fn scale(&self, factor: f64) -> Self {
        *self * factor
    }

    pub fn negate(&self) -> Self {
        -*self
    }

    pub fn is_zero(&self) -> bool {
        self.axes.iter().all(|v| v.abs() < f64::EPSILON)
    }

    pub fn is_finite(&self) -> bool {
        self.axes.iter().all(|v| v.is_finite())
    }
}

impl Add for WeightVector {
    type Output = WeightVector;

    fn add(self, rhs: WeightVector) -> WeightVector {
        let mut axes = self.axes;
        for (a, b) in axes.iter_mut().zip(rhs.axes.iter()) {
            *a += b;
        }
        WeightVector { axes }
    }
}

impl Sub for WeightVector {
    type Output = WeightVector;

    fn sub(self, rhs: WeightVector) -> WeightVector {
        self + (-rhs)
    }
}

impl Neg for WeightVector {
    type Output = WeightVector;

    fn neg(self) -> WeightVector {
        let mut axes = self.axes;
        for a in axes.iter_mut() {
            *a = -*a;
        }
        WeightVector { axes }
    }
}

impl Mul<f64> for WeightVector {
    type Output = WeightVector;

    fn mul(self, factor: f64) -> WeightVector {
        let mut axes = self.axes;
        for a in axes.iter_mut() {
            *a *= factor;
        }
        WeightVector { axes }
    }
}

impl Sum for WeightVector {
    fn sum<I: Iterator<Item = WeightVector>>(iter: I) -> Self {
        iter.fold(WeightVector::ZERO, |acc, w| acc + w)
    }
}

impl<'a> Sum<&'a WeightVector> for WeightVector {
    fn sum<I: Iterator<Item = &'a WeightVector>>(iter: I) -> Self {
        iter.fold(WeightVector::ZERO, |acc, w| acc + *w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WeightVector {
        WeightVector::from_pairs(&[
            (WeightAxis::HealthRatio, -12.0),
            (WeightAxis::Attack, -8.0),
            (WeightAxis::GoldBonus, 4.0),
        ])
    }

    #[test]
    fn test_balance_is_signed_sum() {
        assert!((sample().balance() - -16.0).abs() < 1e-9);
        assert_eq!(WeightVector::ZERO.balance(), 0.0);
    }

    #[test]
    fn test_with_balance_roundtrip() {
        for value in [-250.0, -3.5, 0.0, 17.0, 200.0] {
            let v = WeightVector::with_balance(value);
            assert!((v.balance() - value).abs() < 1e-9, "balance({value})");
        }
    }

    #[test]
    fn test_operations_are_pure() {
        let a = sample();
        let b = WeightVector::from_pairs(&[(WeightAxis::GoldBonus, 10.0)]);
        let sum = a + b;
        assert_eq!(a, sample(), "add must not mutate lhs");
        assert!((sum.get(WeightAxis::GoldBonus) - 14.0).abs() < 1e-9);
        assert_eq!(a.negate().negate(), a);
        assert!((a.scale(2.0).balance() - -32.0).abs() < 1e-9);
        assert!((a - a).is_zero());
    }

    #[test]
    fn test_balance_is_additive() {
        let a = sample();
        let b = WeightVector::from_pairs(&[(WeightAxis::Mana, 3.0), (WeightAxis::Dodge, -1.0)]);
        assert!(((a + b).balance() - (a.balance() + b.balance())).abs() < 1e-9);
    }

    #[test]
    fn test_norm_and_remaining() {
        let v = WeightVector::from_pairs(&[(WeightAxis::Attack, 3.0), (WeightAxis::Defense, 4.0)]);
        assert!((v.norm() - 5.0).abs() < 1e-9);
        assert!((WeightVector::ZERO.remaining(&v) - 5.0).abs() < 1e-9);
        assert!(v.remaining(&v) < 1e-9);
    }

    #[test]
    fn test_sum_iterator() {
        let parts = vec![sample(), sample(), sample()];
        let total: WeightVector = parts.iter().sum();
        assert!((total.balance() - -48.0).abs() < 1e-9);
    }

    #[test]
    fn test_axis_indices_are_dense() {
        for (i, axis) in WeightAxis::ALL.iter().enumerate() {
            assert_eq!(axis.index(), i, "{} out of order", axis.as_str());
        }
    }
}
