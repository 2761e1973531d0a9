/// A lightweight trait for typed indices into arena-style storage.
pub trait IndexRef: Copy + Eq {
    fn index(&self) -> usize;
    fn new(input: usize) -> Self;
}

/// Implements [`IndexRef`](crate::IndexRef) for a tuple struct wrapping a
/// `u32`.
#[macro_export]
macro_rules! impl_index {
    ($struct_name: ident) => {
        impl $crate::IndexRef for $struct_name {
            fn index(&self) -> usize {
                self.0 as usize
            }

            fn new(input: usize) -> Self {
                Self(input as u32)
            }
        }

        impl From<usize> for $struct_name {
            fn from(input: usize) -> Self {
                $crate::IndexRef::new(input)
            }
        }
    };
}
