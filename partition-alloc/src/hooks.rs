//! Process-global allocation hook registry (spec §4.7, §6, §9 "Global
//! mutable state").
//!
//! Observer hooks run *after* alloc/free/realloc for tracing; override
//! hooks run *before*, to interpose the operation entirely (test
//! instrumentation). A single atomic bool gates the fast path so the common
//! case of "no hooks installed" costs one relaxed load.
//!
//! Registration takes a dedicated lock distinct from any `PartitionRoot`
//! lock (spec §5: "Hooks execute outside the root lock but inside a
//! separate hook-registry lock used only during registration") and refuses
//! to overwrite an already-registered non-null hook — `PA_CHECK` fatal in
//! the original (`partition_alloc.cc`), a `panic!` here (spec §4.9).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use partition_alloc_support::RootLock;

pub type AllocHook = fn(ptr: *const u8, size: usize, type_name: &'static str);
pub type FreeHook = fn(ptr: *const u8);
pub type ReallocHook = fn(old_ptr: *const u8, new_ptr: *const u8, size: usize);

/// Override hooks additionally report whether they handled the call; when
/// `Some`, the core skips its own path entirely.
pub type AllocOverrideHook = fn(size: usize, type_name: &'static str) -> Option<*mut u8>;
pub type FreeOverrideHook = fn(ptr: *const u8) -> bool;
pub type ReallocOverrideHook = fn(ptr: *const u8, size: usize) -> Option<*mut u8>;

#[derive(Default)]
struct HookSlots {
    observer_alloc: Option<AllocHook>,
    observer_free: Option<FreeHook>,
    observer_realloc: Option<ReallocHook>,
    override_alloc: Option<AllocOverrideHook>,
    override_free: Option<FreeOverrideHook>,
    override_realloc: Option<ReallocOverrideHook>,
}

/// `AreHooksEnabled()` queries this lock-free; everything else goes through
/// `REGISTRY_LOCK`.
static HOOKS_ENABLED: AtomicBool = AtomicBool::new(false);
static HOOK_GENERATION: AtomicUsize = AtomicUsize::new(0);

static REGISTRY: RootLock<HookSlots> = RootLock::new(HookSlots {
    observer_alloc: None,
    observer_free: None,
    observer_realloc: None,
    override_alloc: None,
    override_free: None,
    override_realloc: None,
});

#[inline]
pub fn hooks_enabled() -> bool {
    HOOKS_ENABLED.load(Ordering::Acquire)
}

fn recompute_enabled(slots: &HookSlots) {
    let any = slots.observer_alloc.is_some()
        || slots.observer_free.is_some()
        || slots.observer_realloc.is_some()
        || slots.override_alloc.is_some()
        || slots.override_free.is_some()
        || slots.override_realloc.is_some();
    HOOKS_ENABLED.store(any, Ordering::Release);
    HOOK_GENERATION.fetch_add(1, Ordering::AcqRel);
}

/// Install observer hooks. Passing `None` for a slot clears it; passing
/// `Some` over an already-`Some` slot is fatal (spec §4.7, §4.9).
pub fn set_observer_hooks(alloc: Option<AllocHook>, free: Option<FreeHook>) {
    let mut slots = REGISTRY.lock();
    if alloc.is_some() && slots.observer_alloc.is_some() {
        panic!("partition-alloc: overwriting already set observer alloc hook");
    }
    if free.is_some() && slots.observer_free.is_some() {
        panic!("partition-alloc: overwriting already set observer free hook");
    }
    slots.observer_alloc = alloc;
    slots.observer_free = free;
    recompute_enabled(&slots);
}

pub fn set_observer_realloc_hook(realloc: Option<ReallocHook>) {
    let mut slots = REGISTRY.lock();
    if realloc.is_some() && slots.observer_realloc.is_some() {
        panic!("partition-alloc: overwriting already set observer realloc hook");
    }
    slots.observer_realloc = realloc;
    recompute_enabled(&slots);
}

/// Install override hooks. Same no-chaining contract as observer hooks.
///
/// Per spec §9's documented open question: override hooks must be
/// registered before any allocation they are meant to observe, since a
/// realloc that cached `actual_old_size` from a hook installed afterward
/// produces undefined behavior if the hook and the core ever disagree.
pub fn set_override_hooks(
    alloc: Option<AllocOverrideHook>,
    free: Option<FreeOverrideHook>,
    realloc: Option<ReallocOverrideHook>,
) {
    let mut slots = REGISTRY.lock();
    if alloc.is_some() && slots.override_alloc.is_some() {
        panic!("partition-alloc: overwriting already set override alloc hook");
    }
    if free.is_some() && slots.override_free.is_some() {
        panic!("partition-alloc: overwriting already set override free hook");
    }
    if realloc.is_some() && slots.override_realloc.is_some() {
        panic!("partition-alloc: overwriting already set override realloc hook");
    }
    slots.override_alloc = alloc;
    slots.override_free = free;
    slots.override_realloc = realloc;
    recompute_enabled(&slots);
}

pub fn clear_all_hooks_for_testing() {
    let mut slots = REGISTRY.lock();
    *slots = HookSlots::default();
    recompute_enabled(&slots);
}

pub(crate) fn try_override_alloc(size: usize, type_name: &'static str) -> Option<*mut u8> {
    if !hooks_enabled() {
        return None;
    }
    REGISTRY.lock().override_alloc.and_then(|f| f(size, type_name))
}

pub(crate) fn try_override_free(ptr: *const u8) -> bool {
    if !hooks_enabled() {
        return false;
    }
    REGISTRY.lock().override_free.is_some_and(|f| f(ptr))
}

pub(crate) fn try_override_realloc(ptr: *const u8, size: usize) -> Option<*mut u8> {
    if !hooks_enabled() {
        return None;
    }
    REGISTRY.lock().override_realloc.and_then(|f| f(ptr, size))
}

pub(crate) fn notify_alloc(ptr: *const u8, size: usize, type_name: &'static str) {
    if !hooks_enabled() {
        return;
    }
    if let Some(hook) = REGISTRY.lock().observer_alloc {
        hook(ptr, size, type_name);
    }
}

pub(crate) fn notify_free(ptr: *const u8) {
    if !hooks_enabled() {
        return;
    }
    if let Some(hook) = REGISTRY.lock().observer_free {
        hook(ptr);
    }
}

pub(crate) fn notify_realloc(old_ptr: *const u8, new_ptr: *const u8, size: usize) {
    if !hooks_enabled() {
        return;
    }
    if let Some(hook) = REGISTRY.lock().observer_realloc {
        hook(old_ptr, new_ptr, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    static ALLOC_CALLS: StdAtomicUsize = StdAtomicUsize::new(0);

    fn observe_alloc(_ptr: *const u8, _size: usize, _type_name: &'static str) {
        ALLOC_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn double_registration_of_observer_hook_panics() {
        clear_all_hooks_for_testing();
        set_observer_hooks(Some(observe_alloc), None);
        let result = std::panic::catch_unwind(|| {
            set_observer_hooks(Some(observe_alloc), None);
        });
        assert!(result.is_err());
        clear_all_hooks_for_testing();
    }

    #[test]
    fn clearing_with_none_does_not_panic() {
        clear_all_hooks_for_testing();
        set_observer_hooks(Some(observe_alloc), None);
        set_observer_hooks(None, None);
        assert!(!hooks_enabled());
    }
}
