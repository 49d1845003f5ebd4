//! Static types that know their own schema.

use serde_json::Value;

use crate::schema::Schema;

/// A Rust type with a canonical [`Schema`].
///
/// Implement this for request types so a procedure's validated shape and its
/// deserialized type cannot drift apart.
pub trait Shape {
    fn schema() -> Schema;
}

impl Shape for String {
    fn schema() -> Schema {
        Schema::string().into()
    }
}

impl Shape for bool {
    fn schema() -> Schema {
        Schema::boolean()
    }
}

impl Shape for f64 {
    fn schema() -> Schema {
        Schema::number().into()
    }
}

macro_rules! integer_shape {
    ($($ty:ty),*) => {
        $(
            impl Shape for $ty {
                fn schema() -> Schema {
                    Schema::integer().min(<$ty>::MIN as f64).max(<$ty>::MAX as f64).into()
                }
            }
        )*
    };
}

integer_shape!(i32, i64, u32, u64);

impl Shape for () {
    fn schema() -> Schema {
        Schema::optional(Schema::Any)
    }
}

impl Shape for Value {
    fn schema() -> Schema {
        Schema::Any
    }
}

impl<T: Shape> Shape for Option<T> {
    fn schema() -> Schema {
        Schema::optional(T::schema())
    }
}

impl<T: Shape> Shape for Vec<T> {
    fn schema() -> Schema {
        Schema::array(T::schema()).into()
    }
}
