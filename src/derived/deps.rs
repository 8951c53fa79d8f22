use crate::cell::CellHandle;
use crate::runtime::{cloned, Value};

mod sealed {
    pub trait Sealed {}
}

/// A set of cells a derived value depends on.
///
/// Implemented for a single [`CellHandle`], tuples of up to four handles,
/// fixed-size arrays and `Vec`s of handles. The derive function receives
/// [`Values`](Dependencies::Values), a clone of each source value in the same
/// shape as the handles.
pub trait Dependencies: sealed::Sealed {
    /// Current values of the sources, handed to the derive function.
    type Values;

    #[doc(hidden)]
    fn cells(&self) -> Vec<(u64, usize)>;

    #[doc(hidden)]
    fn extract(values: &[Value]) -> Option<Self::Values>;
}

impl<T> sealed::Sealed for CellHandle<T> {}

impl<T: Clone + Send + Sync + 'static> Dependencies for CellHandle<T> {
    type Values = T;

    fn cells(&self) -> Vec<(u64, usize)> {
        vec![(self.store, self.index)]
    }

    fn extract(values: &[Value]) -> Option<T> {
        cloned(values.first()?)
    }
}

impl<T> sealed::Sealed for Vec<CellHandle<T>> {}

impl<T: Clone + Send + Sync + 'static> Dependencies for Vec<CellHandle<T>> {
    type Values = Vec<T>;

    fn cells(&self) -> Vec<(u64, usize)> {
        self.iter().map(|cell| (cell.store, cell.index)).collect()
    }

    fn extract(values: &[Value]) -> Option<Vec<T>> {
        values.iter().map(cloned::<T>).collect()
    }
}

impl<T, const N: usize> sealed::Sealed for [CellHandle<T>; N] {}

impl<T: Clone + Send + Sync + 'static, const N: usize> Dependencies for [CellHandle<T>; N] {
    type Values = [T; N];

    fn cells(&self) -> Vec<(u64, usize)> {
        self.iter().map(|cell| (cell.store, cell.index)).collect()
    }

    fn extract(values: &[Value]) -> Option<[T; N]> {
        let values: Vec<T> = values.iter().map(cloned::<T>).collect::<Option<_>>()?;
        values.try_into().ok()
    }
}

macro_rules! tuple_dependencies {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name),+> sealed::Sealed for ($(CellHandle<$name>,)+) {}

        impl<$($name: Clone + Send + Sync + 'static),+> Dependencies for ($(CellHandle<$name>,)+) {
            type Values = ($($name,)+);

            fn cells(&self) -> Vec<(u64, usize)> {
                vec![$((self.$idx.store, self.$idx.index)),+]
            }

            fn extract(values: &[Value]) -> Option<Self::Values> {
                Some(($(cloned::<$name>(values.get($idx)?)?,)+))
            }
        }
    };
}

tuple_dependencies!(A: 0);
tuple_dependencies!(A: 0, B: 1);
tuple_dependencies!(A: 0, B: 1, C: 2);
tuple_dependencies!(A: 0, B: 1, C: 2, D: 3);
