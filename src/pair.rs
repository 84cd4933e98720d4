use crate::{AnyValue, Error};

/// Two values of independent types, the result of
/// [`await_pair`](crate::await_pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pair<A, B> {
    first: A,
    second: B,
}

impl<A, B> Pair<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    pub fn first(&self) -> &A {
        &self.first
    }

    pub fn second(&self) -> &B {
        &self.second
    }

    pub fn into_inner(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A, B> From<(A, B)> for Pair<A, B> {
    fn from((first, second): (A, B)) -> Self {
        Self::new(first, second)
    }
}

impl<A, B> TryFrom<&[AnyValue]> for Pair<A, B>
where
    A: Clone + 'static,
    B: Clone + 'static,
{
    type Error = Error;

    /// Re-types a two-slot fan-in result.
    fn try_from(values: &[AnyValue]) -> Result<Self, Self::Error> {
        let [first, second] = values else {
            return Err(Error::Arity {
                expected: 2,
                actual: values.len(),
            });
        };
        Ok(Self::new(slot(first, 0)?, slot(second, 1)?))
    }
}

fn slot<T: Clone + 'static>(value: &AnyValue, index: usize) -> Result<T, Error> {
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or(Error::SlotType { index })
}
