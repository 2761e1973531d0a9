use baa::{BitVecOps, BitVecValue};
use itertools::Itertools;

/// The type of an IR value. Types are structural: two types are the same
/// iff they compare equal.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    /// A fixed-width bit vector. Width zero is allowed and carries no
    /// information.
    Bits(u64),
    /// An ordered product of element types.
    Tuple(Vec<Type>),
    /// A homogeneous array.
    Array { element: Box<Type>, size: u64 },
    /// An ordering-only value occupying zero bits.
    Token,
}

impl Type {
    pub fn array_of(element: Type, size: u64) -> Self {
        Type::Array {
            element: Box::new(element),
            size,
        }
    }

    /// Total number of bits in a flattened representation of this type.
    pub fn flat_bit_count(&self) -> u64 {
        match self {
            Type::Bits(width) => *width,
            Type::Tuple(elements) => {
                elements.iter().map(Type::flat_bit_count).sum()
            }
            Type::Array { element, size } => element.flat_bit_count() * size,
            Type::Token => 0,
        }
    }

    pub fn is_bits(&self) -> bool {
        matches!(self, Type::Bits(_))
    }

    pub fn is_token(&self) -> bool {
        matches!(self, Type::Token)
    }

    /// The width of a `bits` type. `None` for aggregates and tokens.
    pub fn bit_count(&self) -> Option<u64> {
        match self {
            Type::Bits(width) => Some(*width),
            _ => None,
        }
    }

    /// The all-zeros value of this type.
    pub fn zero_value(&self) -> Value {
        match self {
            Type::Bits(width) => {
                Value::Bits(BitVecValue::zero(*width as baa::WidthInt))
            }
            Type::Tuple(elements) => {
                Value::Tuple(elements.iter().map(Type::zero_value).collect())
            }
            Type::Array { element, size } => Value::Array(
                std::iter::repeat_with(|| element.zero_value())
                    .take(*size as usize)
                    .collect(),
            ),
            Type::Token => Value::Token,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Bits(width) => write!(f, "bits[{}]", width),
            Type::Tuple(elements) => {
                write!(f, "({})", elements.iter().format(", "))
            }
            Type::Array { element, size } => {
                write!(f, "{}[{}]", element, size)
            }
            Type::Token => write!(f, "token"),
        }
    }
}

/// A typed constant: literal payloads and proc state initial values.
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    Bits(BitVecValue),
    Tuple(Vec<Value>),
    Array(Vec<Value>),
    Token,
}

impl Value {
    /// Convenience constructor for a bits value from a `u64`.
    pub fn bits_from_u64(value: u64, width: u64) -> Self {
        Value::Bits(BitVecValue::from_u64(value, width as baa::WidthInt))
    }

    /// The type of this value. Empty arrays report a zero-width element.
    pub fn ty(&self) -> Type {
        match self {
            Value::Bits(bits) => Type::Bits(bits.width() as u64),
            Value::Tuple(elements) => {
                Type::Tuple(elements.iter().map(Value::ty).collect())
            }
            Value::Array(elements) => Type::Array {
                element: Box::new(
                    elements.first().map_or(Type::Bits(0), Value::ty),
                ),
                size: elements.len() as u64,
            },
            Value::Token => Type::Token,
        }
    }

    pub fn flat_bit_count(&self) -> u64 {
        self.ty().flat_bit_count()
    }

    pub fn as_bits(&self) -> Option<&BitVecValue> {
        match self {
            Value::Bits(bits) => Some(bits),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_bit_counts() {
        assert_eq!(Type::Bits(8).flat_bit_count(), 8);
        assert_eq!(Type::Bits(0).flat_bit_count(), 0);
        assert_eq!(Type::Token.flat_bit_count(), 0);
        let tup = Type::Tuple(vec![Type::Bits(3), Type::Token, Type::Bits(5)]);
        assert_eq!(tup.flat_bit_count(), 8);
        let arr = Type::array_of(Type::Bits(4), 6);
        assert_eq!(arr.flat_bit_count(), 24);
    }

    #[test]
    fn zero_values_are_typed() {
        let ty = Type::Tuple(vec![
            Type::Bits(2),
            Type::array_of(Type::Bits(3), 2),
            Type::Token,
        ]);
        let zero = ty.zero_value();
        assert_eq!(zero.ty(), ty);
        assert_eq!(zero.flat_bit_count(), 8);
    }

    #[test]
    fn display() {
        assert_eq!(Type::Bits(12).to_string(), "bits[12]");
        assert_eq!(
            Type::Tuple(vec![Type::Bits(1), Type::Token]).to_string(),
            "(bits[1], token)"
        );
        assert_eq!(
            Type::array_of(Type::Bits(8), 4).to_string(),
            "bits[8][4]"
        );
    }
}
