//! Payload Narrowing
//!
//! Filtered reads rebuild a block's payload from the positions the filter
//! matched. [`Filterable`] is the typed seam for that: sequence payloads keep
//! only the listed positions (in the order given), scalar payloads pass
//! through untouched.
//!
//! Implement it for custom payload types; the blanket `Vec` impl covers the
//! common "payload is an array of entries" shape.

pub trait Filterable: Sized {
    /// Rebuild the payload keeping only `positions`, in the given order.
    /// Out-of-range positions are dropped.
    fn retain_positions(self, positions: &[u16]) -> Self;
}

impl<T> Filterable for Vec<T> {
    fn retain_positions(self, positions: &[u16]) -> Self {
        let mut slots: Vec<Option<T>> = self.into_iter().map(Some).collect();
        positions
            .iter()
            .filter_map(|&position| slots.get_mut(position as usize).and_then(Option::take))
            .collect()
    }
}

macro_rules! passthrough_filterable {
    ($($ty:ty),* $(,)?) => {
        $(impl Filterable for $ty {
            fn retain_positions(self, _positions: &[u16]) -> Self {
                self
            }
        })*
    };
}

passthrough_filterable!(u8, u16, u32, u64, i8, i16, i32, i64, bool, String);
