//! A type-indexed blackboard for render-graph jobs.

use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Shared state that render-graph jobs use to communicate with each other and
/// with the code that drives the graph.
///
/// The context stores at most one value per type. Jobs receive it mutably and
/// may read values left by earlier nodes or publish values for later ones;
/// the RHI itself never inspects the contents.
#[derive(Default)]
pub struct Context {
    values: HashMap<TypeId, Box<dyn Any>>,
}

impl Context {
    pub fn new() -> Self {
        Default::default()
    }

    /// Stores `value`, replacing and returning any previous value of the same
    /// type.
    pub fn insert<T: 'static>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .map(|previous| *previous.downcast::<T>().expect("type keyed by TypeId"))
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .map(|value| *value.downcast::<T>().expect("type keyed by TypeId"))
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_one_value_per_type() {
        let mut context = Context::new();

        assert_eq!(context.insert(17u32), None);
        assert_eq!(context.insert(4u32), Some(17));
        context.insert("frame data");

        assert_eq!(context.get::<u32>(), Some(&4));
        assert_eq!(context.get::<&str>(), Some(&"frame data"));
        assert_eq!(context.remove::<u32>(), Some(4));
        assert!(!context.contains::<u32>());
    }
}
