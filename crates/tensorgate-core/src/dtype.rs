use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The closed set of scalar datatypes a tensor may carry. The names follow
/// the KServe v2 wire spelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Bool,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Fp16,
    Fp32,
    Fp64,
    String,
}

impl DataType {
    /// Byte width of one element. Strings are variable-length and
    /// null-terminated, so they report the width of one byte.
    pub const fn size(&self) -> usize {
        match self {
            DataType::Bool => 1,
            DataType::Uint8 => 1,
            DataType::Uint16 => 2,
            DataType::Uint32 => 4,
            DataType::Uint64 => 8,
            DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 => 4,
            DataType::Int64 => 8,
            DataType::Fp16 => 2,
            DataType::Fp32 => 4,
            DataType::Fp64 => 8,
            DataType::String => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "BOOL",
            DataType::Uint8 => "UINT8",
            DataType::Uint16 => "UINT16",
            DataType::Uint32 => "UINT32",
            DataType::Uint64 => "UINT64",
            DataType::Int8 => "INT8",
            DataType::Int16 => "INT16",
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::Fp16 => "FP16",
            DataType::Fp32 => "FP32",
            DataType::Fp64 => "FP64",
            DataType::String => "STRING",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "BOOL" => DataType::Bool,
            "UINT8" => DataType::Uint8,
            "UINT16" => DataType::Uint16,
            "UINT32" => DataType::Uint32,
            "UINT64" => DataType::Uint64,
            "INT8" => DataType::Int8,
            "INT16" => DataType::Int16,
            "INT32" => DataType::Int32,
            "INT64" => DataType::Int64,
            "FP16" => DataType::Fp16,
            "FP32" => DataType::Fp32,
            "FP64" => DataType::Fp64,
            "STRING" => DataType::String,
            other => return Err(Error::invalid_argument(format!("unknown datatype: {other}"))),
        })
    }
}

/// A scalar codec moves `n` elements between native values and their
/// little-endian byte representation. Each supported datatype maps to one
/// concrete codec type through [`with_scalar`].
pub trait ScalarCodec: Copy + Default {
    const DATATYPE: DataType;
    const WIDTH: usize;

    fn encode(src: &[Self], dst: &mut [u8]);
    fn decode(src: &[u8], dst: &mut [Self]);
}

macro_rules! impl_scalar_codec {
    ($ty:ty, $dtype:expr) => {
        impl ScalarCodec for $ty {
            const DATATYPE: DataType = $dtype;
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn encode(src: &[Self], dst: &mut [u8]) {
                for (value, chunk) in src.iter().zip(dst.chunks_exact_mut(Self::WIDTH)) {
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
            }

            fn decode(src: &[u8], dst: &mut [Self]) {
                for (chunk, value) in src.chunks_exact(Self::WIDTH).zip(dst.iter_mut()) {
                    let mut raw = [0u8; Self::WIDTH];
                    raw.copy_from_slice(chunk);
                    *value = <$ty>::from_le_bytes(raw);
                }
            }
        }
    };
}

impl_scalar_codec!(u8, DataType::Uint8);
impl_scalar_codec!(u16, DataType::Uint16);
impl_scalar_codec!(u32, DataType::Uint32);
impl_scalar_codec!(u64, DataType::Uint64);
impl_scalar_codec!(i8, DataType::Int8);
impl_scalar_codec!(i16, DataType::Int16);
impl_scalar_codec!(i32, DataType::Int32);
impl_scalar_codec!(i64, DataType::Int64);
impl_scalar_codec!(f32, DataType::Fp32);
impl_scalar_codec!(f64, DataType::Fp64);

/// Dispatch on a [`DataType`] once and run `$body` with `$T` bound to the
/// matching codec type. `Bool` shares the `u8` codec and `Fp16` the raw
/// `u16` one; `String` is not dispatchable and must be handled by the
/// caller beforehand.
#[macro_export]
macro_rules! with_scalar {
    ($dtype:expr, $T:ident => $body:expr) => {
        match $dtype {
            $crate::DataType::Bool | $crate::DataType::Uint8 => {
                type $T = u8;
                $body
            }
            $crate::DataType::Uint16 | $crate::DataType::Fp16 => {
                type $T = u16;
                $body
            }
            $crate::DataType::Uint32 => {
                type $T = u32;
                $body
            }
            $crate::DataType::Uint64 => {
                type $T = u64;
                $body
            }
            $crate::DataType::Int8 => {
                type $T = i8;
                $body
            }
            $crate::DataType::Int16 => {
                type $T = i16;
                $body
            }
            $crate::DataType::Int32 => {
                type $T = i32;
                $body
            }
            $crate::DataType::Int64 => {
                type $T = i64;
                $body
            }
            $crate::DataType::Fp32 => {
                type $T = f32;
                $body
            }
            $crate::DataType::Fp64 => {
                type $T = f64;
                $body
            }
            $crate::DataType::String => {
                panic!("string tensors have no scalar codec")
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_are_fixed() {
        assert_eq!(DataType::Bool.size(), 1);
        assert_eq!(DataType::Uint32.size(), 4);
        assert_eq!(DataType::Fp16.size(), 2);
        assert_eq!(DataType::Fp64.size(), 8);
        assert_eq!(DataType::String.size(), 1);
    }

    #[test]
    fn parse_round_trip() {
        for s in ["BOOL", "UINT32", "INT64", "FP32", "STRING"] {
            let dtype: DataType = s.parse().unwrap();
            assert_eq!(dtype.as_str(), s);
        }
        assert!("FLOAT".parse::<DataType>().is_err());
    }

    #[test]
    fn codec_round_trip() {
        let values = [7u32, 8, 9];
        let mut raw = vec![0u8; 12];
        u32::encode(&values, &mut raw);
        let mut back = [0u32; 3];
        u32::decode(&raw, &mut back);
        assert_eq!(back, values);
    }

    #[test]
    fn dispatch_selects_codec() {
        let width = with_scalar!(DataType::Int16, T => T::WIDTH);
        assert_eq!(width, 2);
    }
}
