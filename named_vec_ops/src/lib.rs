
/// A struct of named scalar fields that can be viewed as a fixed-size vector.
///
/// The field order of the struct is the element order of the vector, so
/// `NAMES[i]` is the field stored at index `i` of `to_svector()`.
///
/// The derive also implements `+`, `-`, `+=`, `-=` and scaling by `T`.
pub trait NamedVecOps<T, const N: usize>: Copy + Clone {
    const NAMES: [&'static str; N];

    fn to_svector(&self) -> nalgebra::SVector<T, N>;
    fn from_svector(v: &nalgebra::SVector<T, N>) -> Self;
}
