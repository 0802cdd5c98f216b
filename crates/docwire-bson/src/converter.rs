//! 数值表示转换
//!
//! 逻辑类型与线上表示之间的数值映射。默认策略是严格的：任何改变数值的转换都视为数据丢失并报错。
//! `allow_overflow` 允许按补码截位回绕，`allow_truncation` 允许浮点小数部分向零截断。

use crate::{BsonError, BsonResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepresentationConverter {
    pub allow_overflow: bool,
    pub allow_truncation: bool,
}

impl RepresentationConverter {
    pub const STRICT: Self = Self {
        allow_overflow: false,
        allow_truncation: false,
    };

    pub fn new(allow_overflow: bool, allow_truncation: bool) -> Self {
        Self {
            allow_overflow,
            allow_truncation,
        }
    }

    pub fn u32_to_f64(&self, v: u32) -> f64 {
        v as f64
    }

    pub fn u32_to_i32(&self, v: u32) -> BsonResult<i32> {
        if v > i32::MAX as u32 && !self.allow_overflow {
            return Err(overflow(v, "Int32"));
        }
        Ok(v as i32)
    }

    pub fn u32_to_i64(&self, v: u32) -> i64 {
        v as i64
    }

    pub fn f64_to_u32(&self, v: f64) -> BsonResult<u32> {
        let in_range = v >= 0.0 && v <= u32::MAX as f64;
        if !in_range {
            if !self.allow_overflow || v.is_nan() {
                return Err(overflow(v, "UInt32"));
            }
            return Ok((v as i64) as u32);
        }
        if v.fract() != 0.0 && !self.allow_truncation {
            return Err(BsonError::Representation(format!(
                "Truncation resulted in data loss converting {} to UInt32",
                v
            )));
        }
        Ok(v as u32)
    }

    pub fn i32_to_u32(&self, v: i32) -> BsonResult<u32> {
        if v < 0 && !self.allow_overflow {
            return Err(overflow(v, "UInt32"));
        }
        Ok(v as u32)
    }

    pub fn i64_to_u32(&self, v: i64) -> BsonResult<u32> {
        if !(0..=u32::MAX as i64).contains(&v) && !self.allow_overflow {
            return Err(overflow(v, "UInt32"));
        }
        Ok(v as u32)
    }
}

fn overflow(v: impl std::fmt::Display, target: &str) -> BsonError {
    BsonError::Representation(format!(
        "Arithmetic overflow converting {} to {}",
        v, target
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strict_by_default() {
        let c = RepresentationConverter::default();
        assert_eq!(c, RepresentationConverter::STRICT);
        assert!(c.u32_to_i32(u32::MAX).unwrap_err().is_representation());
        assert!(c.i32_to_u32(-1).is_err());
        assert!(c.i64_to_u32(1 << 40).is_err());
        assert!(c.f64_to_u32(1.5).is_err());
        assert!(c.f64_to_u32(-1.0).is_err());
        assert!(c.f64_to_u32(f64::NAN).is_err());
    }

    #[test]
    fn test_overflow_wraps() {
        let c = RepresentationConverter::new(true, false);
        assert_eq!(c.u32_to_i32(u32::MAX).unwrap(), -1);
        assert_eq!(c.i32_to_u32(-1).unwrap(), u32::MAX);
        assert_eq!(c.f64_to_u32(-1.0).unwrap(), u32::MAX);
        assert!(c.f64_to_u32(2.5).is_err());
    }

    #[test]
    fn test_truncation() {
        let c = RepresentationConverter::new(false, true);
        assert_eq!(c.f64_to_u32(2.9).unwrap(), 2);
        assert!(c.f64_to_u32(-0.5).is_err());
    }

    #[test]
    fn test_boundaries() {
        let c = RepresentationConverter::STRICT;
        assert_eq!(c.f64_to_u32(c.u32_to_f64(u32::MAX)).unwrap(), u32::MAX);
        assert_eq!(c.i64_to_u32(c.u32_to_i64(u32::MAX)).unwrap(), u32::MAX);
        assert_eq!(c.i32_to_u32(c.u32_to_i32(i32::MAX as u32).unwrap()).unwrap(), i32::MAX as u32);
        assert_eq!(c.f64_to_u32(0.0).unwrap(), 0);
    }

    proptest! {
        #[test]
        fn prop_wrapping_is_lossless(v in any::<u32>()) {
            let c = RepresentationConverter::new(true, false);
            prop_assert_eq!(c.i32_to_u32(c.u32_to_i32(v).unwrap()).unwrap(), v);
        }

        #[test]
        fn prop_double_is_exact(v in any::<u32>()) {
            let c = RepresentationConverter::STRICT;
            prop_assert_eq!(c.f64_to_u32(c.u32_to_f64(v)).unwrap(), v);
        }
    }
}
