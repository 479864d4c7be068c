//! Argument marshaling for remote function calls.
//!
//! Every argument ends up as one pointer-width value on the wire.
//! Scalars widen by their own signedness: unsigned zero-extends,
//! signed sign-extends, and a 64-bit unsigned value is reinterpreted
//! bit-for-bit rather than range-checked. A sequence is only legal as
//! the sole argument, in which case it expands to one positional
//! argument per element.

use marionette_proto::Pointer;

use crate::error::{ClientError, Result};

/// One argument to [`call_function`](crate::Client::call_function).
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Bool(bool),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Ptr(Pointer),
    /// A homogeneous sequence; legal only as the sole argument.
    Seq(Vec<CallArg>),
}

impl CallArg {
    fn to_pointer(&self) -> Result<Pointer> {
        let raw = match *self {
            CallArg::Bool(v) => u64::from(v),
            CallArg::U8(v) => u64::from(v),
            CallArg::U16(v) => u64::from(v),
            CallArg::U32(v) => u64::from(v),
            CallArg::I16(v) => v as i64 as u64,
            CallArg::I32(v) => v as i64 as u64,
            CallArg::I64(v) => v as u64,
            CallArg::U64(v) => v,
            CallArg::Ptr(ptr) => return Ok(ptr),
            CallArg::Seq(_) => {
                return Err(ClientError::UnsupportedArgument(
                    "a sequence is only legal as the sole argument",
                ))
            }
        };
        Ok(Pointer::new(raw))
    }
}

/// Lower a caller-supplied argument list to wire pointers.
///
/// Performed entirely before any transport call; a marshaling error
/// means nothing was sent.
pub fn lower_args(args: &[CallArg]) -> Result<Vec<Pointer>> {
    if let [CallArg::Seq(elements)] = args {
        return elements.iter().map(CallArg::to_pointer).collect();
    }
    args.iter().map(CallArg::to_pointer).collect()
}

impl From<bool> for CallArg {
    fn from(v: bool) -> Self {
        CallArg::Bool(v)
    }
}

impl From<u8> for CallArg {
    fn from(v: u8) -> Self {
        CallArg::U8(v)
    }
}

impl From<i16> for CallArg {
    fn from(v: i16) -> Self {
        CallArg::I16(v)
    }
}

impl From<u16> for CallArg {
    fn from(v: u16) -> Self {
        CallArg::U16(v)
    }
}

impl From<i32> for CallArg {
    fn from(v: i32) -> Self {
        CallArg::I32(v)
    }
}

impl From<u32> for CallArg {
    fn from(v: u32) -> Self {
        CallArg::U32(v)
    }
}

impl From<i64> for CallArg {
    fn from(v: i64) -> Self {
        CallArg::I64(v)
    }
}

impl From<u64> for CallArg {
    fn from(v: u64) -> Self {
        CallArg::U64(v)
    }
}

impl From<Pointer> for CallArg {
    fn from(ptr: Pointer) -> Self {
        CallArg::Ptr(ptr)
    }
}

impl<T: Into<CallArg>> From<Vec<T>> for CallArg {
    fn from(values: Vec<T>) -> Self {
        CallArg::Seq(values.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_widening() {
        assert_eq!(
            lower_args(&[CallArg::Bool(true)]).unwrap(),
            vec![Pointer::new(1)]
        );
        assert_eq!(
            lower_args(&[CallArg::Bool(false)]).unwrap(),
            vec![Pointer::NULL]
        );
        assert_eq!(
            lower_args(&[CallArg::U8(200)]).unwrap(),
            vec![Pointer::new(200)]
        );
        assert_eq!(
            lower_args(&[CallArg::U32(4_294_967_295)]).unwrap(),
            vec![Pointer::new(4_294_967_295)]
        );
    }

    #[test]
    fn signed_values_sign_extend() {
        assert_eq!(
            lower_args(&[CallArg::I32(-1)]).unwrap(),
            vec![Pointer::new(u64::MAX)]
        );
        assert_eq!(
            lower_args(&[CallArg::I16(-2)]).unwrap(),
            vec![Pointer::new(u64::MAX - 1)]
        );
        assert_eq!(
            lower_args(&[CallArg::I64(-1)]).unwrap(),
            vec![Pointer::new(u64::MAX)]
        );
    }

    #[test]
    fn u64_reinterprets_bit_pattern() {
        assert_eq!(
            lower_args(&[CallArg::U64(u64::MAX)]).unwrap(),
            vec![Pointer::new(u64::MAX)]
        );
    }

    #[test]
    fn pointer_passes_through() {
        let ptr = Pointer::new(0xDEAD_BEEF);
        assert_eq!(lower_args(&[CallArg::Ptr(ptr)]).unwrap(), vec![ptr]);
    }

    #[test]
    fn sole_sequence_expands_positionally() {
        let args = [CallArg::from(vec![1u32, 2, 3])];
        assert_eq!(
            lower_args(&args).unwrap(),
            vec![Pointer::new(1), Pointer::new(2), Pointer::new(3)]
        );
    }

    #[test]
    fn empty_sequence_expands_to_nothing() {
        let args = [CallArg::Seq(Vec::new())];
        assert_eq!(lower_args(&args).unwrap(), Vec::<Pointer>::new());
    }

    #[test]
    fn sequence_beside_other_args_is_rejected() {
        let args = [CallArg::U32(1), CallArg::from(vec![2u32])];
        assert!(matches!(
            lower_args(&args),
            Err(ClientError::UnsupportedArgument(_))
        ));
    }

    #[test]
    fn nested_sequence_is_rejected() {
        let args = [CallArg::Seq(vec![CallArg::Seq(vec![CallArg::U8(1)])])];
        assert!(matches!(
            lower_args(&args),
            Err(ClientError::UnsupportedArgument(_))
        ));
    }
}
