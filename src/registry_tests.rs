//! Unit tests for the handle registry

use super::*;
use crate::handle::{BufferHandle, ProgramHandle, ShaderHandle};

// ============================================================================
// INSERT / LOOKUP
// ============================================================================

#[test]
fn test_insert_yields_distinct_increasing_handles() {
    let mut registry: Registry<ShaderHandle, &str> = Registry::new();

    let handles: Vec<ShaderHandle> = ["a", "b", "c", "d", "e"]
        .into_iter()
        .map(|name| registry.insert(name).unwrap())
        .collect();

    assert!(handles.windows(2).all(|w| w[0].index() < w[1].index()));
    assert!(handles.iter().all(|h| *h != ShaderHandle::NULL));
    assert_eq!(registry.len(), 5);
    assert_eq!(registry.get(handles[2]), Some(&"c"));
}

#[test]
fn test_null_handle_never_resolves() {
    let mut registry: Registry<BufferHandle, u32> = Registry::new();
    registry.insert(7).unwrap();

    assert!(registry.get(BufferHandle::NULL).is_none());
    assert!(registry.get_mut(BufferHandle::NULL).is_none());
    assert!(!registry.contains(BufferHandle::NULL));
}

#[test]
fn test_get_mut_updates_in_place() {
    let mut registry: Registry<BufferHandle, u32> = Registry::new();
    let h = registry.insert(1).unwrap();

    *registry.get_mut(h).unwrap() += 41;

    assert_eq!(registry.get(h), Some(&42));
}

// ============================================================================
// RELEASE
// ============================================================================

#[test]
fn test_removed_handle_is_not_reissued() {
    let mut registry: Registry<ShaderHandle, u8> = Registry::new();
    let first = registry.insert(1).unwrap();

    assert_eq!(registry.remove(first), Some(1));
    assert!(registry.get(first).is_none());

    let second = registry.insert(2).unwrap();
    assert_ne!(first, second);
    assert!(second.index() > first.index());
}

#[test]
fn test_drain_returns_newest_first_and_empties() {
    let mut registry: Registry<ShaderHandle, u8> = Registry::new();
    let a = registry.insert(10).unwrap();
    let b = registry.insert(20).unwrap();

    let drained = registry.drain();

    assert_eq!(drained, vec![(b, 20), (a, 10)]);
    assert!(registry.is_empty());
}

#[test]
fn test_iter_is_in_creation_order() {
    let mut registry: Registry<BufferHandle, char> = Registry::new();
    for c in ['x', 'y', 'z'] {
        registry.insert(c).unwrap();
    }

    let order: Vec<char> = registry.iter().map(|(_, c)| *c).collect();
    assert_eq!(order, vec!['x', 'y', 'z']);
}

#[test]
fn test_exhausted_family_hands_value_back() {
    let mut registry: Registry<ShaderHandle, u8> = Registry::new();
    registry.allocator = HandleAllocator::new();
    while registry.allocator.allocate().is_some() {}

    assert_eq!(registry.insert(9), Err(9));
    assert!(registry.is_empty());
}

// ============================================================================
// RESERVE / FILL
// ============================================================================

#[test]
fn test_reserved_handle_resolves_only_after_fill() {
    let mut registry: Registry<ProgramHandle, &str> = Registry::new();

    let handle = registry.reserve().unwrap();
    assert!(registry.get(handle).is_none());

    registry.fill(handle, "linked");
    assert_eq!(registry.get(handle), Some(&"linked"));
}

#[test]
fn test_abandoned_reservation_is_not_reissued() {
    let mut registry: Registry<ProgramHandle, u8> = Registry::new();

    let abandoned = registry.reserve().unwrap();
    let next = registry.insert(1).unwrap();

    assert!(next.index() > abandoned.index());
    assert!(registry.get(abandoned).is_none());
}

#[test]
fn test_exhausted_family_refuses_reservation() {
    let mut registry: Registry<ProgramHandle, u8> = Registry::new();
    while registry.allocator.allocate().is_some() {}

    assert!(registry.reserve().is_none());
    assert!(registry.is_empty());
}
