use super::ReduceOp;
use crate::{args_not_support, NegotiationError};
use digit_layout::{types, DigitLayout};
use half::{bf16, f16};
use rayon::prelude::*;
use std::mem::size_of;

/// 超过这个字节数的规约并行执行。
const PAR_THRESHOLD: usize = 1 << 16;

/// 将 `src` 按元素合并进 `dst`。
pub(crate) fn reduce(
    dt: DigitLayout,
    op: ReduceOp,
    dst: &mut [u8],
    src: &[u8],
) -> Result<(), NegotiationError> {
    macro_rules! dispatch {
        ($( $dt:ident => $ty:ty )+) => {
            match dt {
                $( types::$dt => reduce_as::<$ty>(op, dst, src), )+
                _ => Err(args_not_support(format!("reduce on {dt:?}"))),
            }
        };
    }
    dispatch! {
        Bool => u8
        U8   => u8
        I8   => i8
        U16  => u16
        I16  => i16
        U32  => u32
        I32  => i32
        U64  => u64
        I64  => i64
        F16  => f16
        BF16 => bf16
        F32  => f32
        F64  => f64
    }
}

trait Element: Copy + Send + Sync + 'static {
    const SIZE: usize;
    const LOGICAL: bool;
    fn load(bytes: &[u8]) -> Self;
    fn store(self, bytes: &mut [u8]);
    fn combine(op: ReduceOp, a: Self, b: Self) -> Self;
}

macro_rules! integer {
    ($( $ty:ty )+) => {
        $(
            impl Element for $ty {
                const SIZE: usize = size_of::<$ty>();
                const LOGICAL: bool = true;
                #[inline]
                fn load(bytes: &[u8]) -> Self {
                    let mut buf = [0; size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    Self::from_ne_bytes(buf)
                }
                #[inline]
                fn store(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_ne_bytes())
                }
                #[inline]
                fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
                    match op {
                        ReduceOp::Sum => a.wrapping_add(b),
                        ReduceOp::Prod => a.wrapping_mul(b),
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                        ReduceOp::LogicalAnd => (a != 0 && b != 0) as _,
                        ReduceOp::LogicalOr => (a != 0 || b != 0) as _,
                    }
                }
            }
        )+
    };
}

macro_rules! float {
    ($( $ty:ty )+) => {
        $(
            impl Element for $ty {
                const SIZE: usize = size_of::<$ty>();
                const LOGICAL: bool = false;
                #[inline]
                fn load(bytes: &[u8]) -> Self {
                    let mut buf = [0; size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    Self::from_ne_bytes(buf)
                }
                #[inline]
                fn store(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_ne_bytes())
                }
                #[inline]
                fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Prod => a * b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                        ReduceOp::LogicalAnd | ReduceOp::LogicalOr => {
                            unreachable!("logical reduce on float")
                        }
                    }
                }
            }
        )+
    };
}

integer!(u8 i8 u16 i16 u32 i32 u64 i64);
float!(f16 bf16 f32 f64);

fn reduce_as<T: Element>(op: ReduceOp, dst: &mut [u8], src: &[u8]) -> Result<(), NegotiationError> {
    if op.is_logical() && !T::LOGICAL {
        return Err(args_not_support(format!("{op:?} on floating point")));
    }
    if dst.len() != src.len() || dst.len() % T::SIZE != 0 {
        return Err(args_not_support(format!(
            "reduce {} bytes into {} bytes",
            src.len(),
            dst.len()
        )));
    }

    let f = |(d, s): (&mut [u8], &[u8])| T::combine(op, T::load(d), T::load(s)).store(d);
    if dst.len() >= PAR_THRESHOLD {
        dst.par_chunks_mut(T::SIZE)
            .zip(src.par_chunks(T::SIZE))
            .for_each(f)
    } else {
        dst.chunks_mut(T::SIZE).zip(src.chunks(T::SIZE)).for_each(f)
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn bytes<T: Element>(vals: &[T]) -> Vec<u8> {
        let mut ans = vec![0; vals.len() * T::SIZE];
        for (v, b) in vals.iter().zip(ans.chunks_mut(T::SIZE)) {
            v.store(b)
        }
        ans
    }

    fn values<T: Element>(bytes: &[u8]) -> Vec<T> {
        bytes.chunks(T::SIZE).map(T::load).collect()
    }

    #[test]
    fn test_integer_ops() {
        let a = [3i32, -1, 0, 7];
        let b = [4i32, 5, 2, 0];
        let run = |op| {
            let mut dst = bytes(&a);
            reduce(types::I32, op, &mut dst, &bytes(&b)).unwrap();
            values::<i32>(&dst)
        };
        assert_eq!(run(ReduceOp::Sum), [7, 4, 2, 7]);
        assert_eq!(run(ReduceOp::Prod), [12, -5, 0, 0]);
        assert_eq!(run(ReduceOp::Min), [3, -1, 0, 0]);
        assert_eq!(run(ReduceOp::Max), [4, 5, 2, 7]);
        assert_eq!(run(ReduceOp::LogicalAnd), [1, 1, 0, 0]);
        assert_eq!(run(ReduceOp::LogicalOr), [1, 1, 1, 1]);
    }

    #[test]
    fn test_half() {
        let mut dst = bytes(&[f16::from_f32(1.5), f16::from_f32(-2.)]);
        let src = bytes(&[f16::from_f32(0.5), f16::from_f32(3.)]);
        reduce(types::F16, ReduceOp::Max, &mut dst, &src).unwrap();
        assert_eq!(
            values::<f16>(&dst),
            [f16::from_f32(1.5), f16::from_f32(3.)]
        );
    }

    #[test]
    fn test_parallel() {
        let n = PAR_THRESHOLD / 4 * 3;
        let mut dst = bytes(&vec![1.0f32; n]);
        let src = bytes(&vec![2.0f32; n]);
        reduce(types::F32, ReduceOp::Sum, &mut dst, &src).unwrap();
        assert!(values::<f32>(&dst).iter().all(|&x| x == 3.));
    }

    #[test]
    fn test_rejected() {
        let mut dst = bytes(&[1.0f64]);
        let src = bytes(&[1.0f64]);
        assert!(reduce(types::F64, ReduceOp::LogicalAnd, &mut dst, &src).is_err());
        assert!(reduce(types::F64, ReduceOp::Sum, &mut dst, &src[..4]).is_err());
    }
}
