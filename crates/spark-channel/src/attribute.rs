use std::{any::Any, marker::PhantomData, sync::Arc};

use dashmap::DashMap;

/// 带类型的通道属性键。
///
/// 键以名称区分；同名键若声明了不同的值类型，读取时类型不匹配会返回 `None`。
pub struct AttributeKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

/// 通道上的并发属性表。
#[derive(Default)]
pub struct AttributeMap {
    entries: DashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Any + Send + Sync>(&self, key: AttributeKey<T>) -> Option<Arc<T>> {
        let value = self.entries.get(key.name)?.value().clone();
        value.downcast::<T>().ok()
    }

    /// 写入属性并返回旧值（若旧值类型一致）。
    pub fn set<T: Any + Send + Sync>(&self, key: AttributeKey<T>, value: T) -> Option<Arc<T>> {
        self.entries
            .insert(key.name, Arc::new(value))
            .and_then(|old| old.downcast::<T>().ok())
    }

    pub fn has<T>(&self, key: AttributeKey<T>) -> bool {
        self.entries.contains_key(key.name)
    }

    pub fn remove<T: Any + Send + Sync>(&self, key: AttributeKey<T>) -> Option<Arc<T>> {
        self.entries
            .remove(key.name)
            .and_then(|(_, old)| old.downcast::<T>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: AttributeKey<String> = AttributeKey::new("peer");

    #[test]
    fn typed_round_trip_and_replace() {
        let attrs = AttributeMap::new();
        assert!(!attrs.has(PEER));
        assert!(attrs.set(PEER, "a".to_owned()).is_none());
        let previous = attrs.set(PEER, "b".to_owned()).expect("old value");
        assert_eq!(previous.as_str(), "a");
        assert_eq!(attrs.get(PEER).as_deref().map(String::as_str), Some("b"));
    }

    #[test]
    fn mismatched_type_reads_none() {
        let attrs = AttributeMap::new();
        attrs.set(AttributeKey::<u32>::new("peer"), 7);
        assert!(attrs.has(PEER));
        assert!(attrs.get(PEER).is_none());
    }
}
