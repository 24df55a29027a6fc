//! Fixed-capacity indexed slot table with name index, used-flag and
//! set/remove/get/overview event dispatch (spec §4.2).
//!
//! `EventAccessArray<E, R, N>` is generic over the persisted entity type
//! `E` (e.g. [`crate::config::DeviceConfig`]) and a runtime companion `R`
//! that exists only for initialized slots (e.g. a boxed driver). The
//! registry (§4.3) is the sole consumer today; the type stays generic so a
//! future settings sub-store can reuse it.

use crate::error::{CoreError, CoreResult};
use heapless::String as HString;

/// Maximum length of a slot's human-readable name.
pub const MAX_SLOT_NAME_LEN: usize = 32;

type SlotName = HString<MAX_SLOT_NAME_LEN>;

/// A trivially-copyable image of the table's persisted state — what
/// [`EventAccessArray::assign`] consumes and every mutating dispatch
/// returns for the event store to persist.
#[derive(Debug, Clone)]
pub struct Snapshot<E: Clone, const N: usize> {
    /// Per-slot entity data.
    pub entities: [E; N],
    /// Per-slot initialized flag.
    pub initialized: [bool; N],
    /// Per-slot human-readable name (empty when uninitialized).
    pub names: [SlotName; N],
}

impl<E: Clone + Default, const N: usize> Default for Snapshot<E, N> {
    fn default() -> Self {
        Snapshot {
            entities: core::array::from_fn(|_| E::default()),
            initialized: [false; N],
            names: core::array::from_fn(|_| SlotName::new()),
        }
    }
}

/// Locates a slot either by explicit index or by name among initialized
/// slots used by `SetValue`/`RemoveValue`/`GetValue`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Locator<'a> {
    /// Explicit slot index, if known.
    pub index: Option<usize>,
    /// Slot name to search for among initialized slots.
    pub name: Option<&'a str>,
}

/// Outcome of a dispatch that could mutate the table.
#[derive(Debug)]
pub struct DispatchResult<E: Clone, const N: usize> {
    /// The table's state after the dispatch (unchanged if it failed).
    pub snapshot: Snapshot<E, N>,
    /// The slot the dispatch resolved to.
    pub index: usize,
    /// Whether the mutation (if any) succeeded.
    pub success: bool,
}

/// Fixed-capacity `N` table of entities, each with an initialized flag, a
/// name, and — for initialized slots — a runtime companion.
pub struct EventAccessArray<E: Clone + Default, R, const N: usize> {
    entities: [E; N],
    initialized: [bool; N],
    names: [SlotName; N],
    runtime: [Option<R>; N],
}

impl<E: Clone + Default, R, const N: usize> EventAccessArray<E, R, N> {
    /// Creates an empty table: every slot uninitialized, no runtime
    /// instances.
    pub fn new() -> Self {
        EventAccessArray {
            entities: core::array::from_fn(|_| E::default()),
            initialized: [false; N],
            names: core::array::from_fn(|_| SlotName::new()),
            runtime: core::array::from_fn(|_| None),
        }
    }

    /// Table capacity.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Replaces this table's data from `snapshot`. For each initialized
    /// slot, `rebuild_fn(&entity, &mut runtime_slot)` is invoked to
    /// reconstruct the runtime companion; if it returns `false`, this
    /// implementation clears the slot's `initialized` flag (see DESIGN.md
    /// for why this differs from the source's "leave it set" behavior —
    /// spec §9 Open Questions explicitly leaves the choice to the
    /// implementer).
    pub fn assign<F>(&mut self, snapshot: &Snapshot<E, N>, mut rebuild_fn: F)
    where
        F: FnMut(&E, &mut Option<R>) -> bool,
    {
        for i in 0..N {
            self.entities[i] = snapshot.entities[i].clone();
            self.names[i] = snapshot.names[i].clone();
            self.runtime[i] = None;
            if snapshot.initialized[i] {
                let ok = rebuild_fn(&self.entities[i], &mut self.runtime[i]);
                self.initialized[i] = ok;
                if !ok {
                    self.runtime[i] = None;
                }
            } else {
                self.initialized[i] = false;
            }
        }
    }

    /// A copy of the table's current state, suitable for persistence or
    /// for a later [`EventAccessArray::assign`].
    pub fn snapshot_for_persistence(&self) -> Snapshot<E, N> {
        Snapshot {
            entities: self.entities.clone(),
            initialized: self.initialized,
            names: self.names.clone(),
        }
    }

    /// Resolution used by `SetValue`: an explicit in-range index wins;
    /// otherwise a name match among initialized slots; otherwise any free
    /// slot; otherwise the table is full.
    fn resolve_for_set(&self, locator: Locator<'_>) -> CoreResult<usize> {
        if let Some(index) = locator.index {
            if index < N {
                return Ok(index);
            }
        }
        if let Some(name) = locator.name {
            if let Some(idx) = self.find_by_name(name) {
                return Ok(idx);
            }
        }
        self.initialized
            .iter()
            .position(|&used| !used)
            .ok_or(CoreError::CollectionFull)
    }

    /// Resolution used by `RemoveValue`/`GetValue`: must land on an
    /// already-initialized slot.
    fn resolve_existing(&self, locator: Locator<'_>) -> CoreResult<usize> {
        if let Some(index) = locator.index {
            if index < N && self.initialized[index] {
                return Ok(index);
            }
            return Err(CoreError::IndexInvalid);
        }
        if let Some(name) = locator.name {
            return self.find_by_name(name).ok_or(CoreError::IndexInvalid);
        }
        Err(CoreError::IndexInvalid)
    }

    fn find_by_name(&self, name: &str) -> Option<usize> {
        (0..N).find(|&i| self.initialized[i] && self.names[i].as_str() == name)
    }

    /// Dispatches a `SetValue` event: resolves a slot per [`resolve_for_set`],
    /// then calls `update_fn(runtime, entity, payload)`. On success the
    /// slot is marked initialized and its name updated (if `name` was
    /// given); on failure the slot's data is left untouched.
    pub fn dispatch_set<P, F>(
        &mut self,
        locator: Locator<'_>,
        payload: P,
        update_fn: F,
    ) -> CoreResult<DispatchResult<E, N>>
    where
        F: FnOnce(&mut Option<R>, &mut E, P) -> bool,
    {
        let index = self.resolve_for_set(locator)?;
        if !self.initialized[index] && locator.name.is_none() {
            return Err(CoreError::MalformedInput {
                reason: "a name is required to initialize a new slot".into(),
            });
        }

        let ok = update_fn(&mut self.runtime[index], &mut self.entities[index], payload);
        if ok {
            self.initialized[index] = true;
            if let Some(name) = locator.name {
                self.names[index] = HString::try_from(name).unwrap_or_default();
            }
        } else if self.runtime[index].is_none() {
            // update_fn failed before installing a runtime on a previously
            // uninitialized slot: nothing to roll back, the slot simply
            // stays uninitialized.
        }

        Ok(DispatchResult {
            snapshot: self.snapshot_for_persistence(),
            index,
            success: ok,
        })
    }

    /// Dispatches a `RemoveValue` event: clears the entity, name and
    /// runtime of the resolved slot.
    pub fn dispatch_remove(&mut self, locator: Locator<'_>) -> CoreResult<DispatchResult<E, N>> {
        let index = self.resolve_existing(locator)?;
        self.entities[index] = E::default();
        self.names[index] = SlotName::new();
        self.initialized[index] = false;
        self.runtime[index] = None;
        Ok(DispatchResult {
            snapshot: self.snapshot_for_persistence(),
            index,
            success: true,
        })
    }

    /// Dispatches a `GetValue` event: returns a copy of the resolved slot's
    /// entity. Non-mutating.
    pub fn dispatch_get(&self, locator: Locator<'_>) -> CoreResult<(usize, E)> {
        let index = self.resolve_existing(locator)?;
        Ok((index, self.entities[index].clone()))
    }

    /// Dispatches a `GetValueOverview` event: walks initialized slots
    /// starting at `start_index` (default `0`), invoking
    /// `format_fn(out, name, entity, index, is_first)` for each and joining
    /// them with `,` inside a JSON array. Non-mutating.
    pub fn dispatch_overview<F>(&self, start_index: Option<usize>, mut format_fn: F) -> String
    where
        F: FnMut(&mut String, &str, &E, usize),
    {
        let mut out = String::from("[");
        let mut first = true;
        for i in start_index.unwrap_or(0)..N {
            if !self.initialized[i] {
                continue;
            }
            if !first {
                out.push(',');
            }
            first = false;
            format_fn(&mut out, self.names[i].as_str(), &self.entities[i], i);
        }
        out.push(']');
        out
    }

    /// Invokes `f` on the runtime companion at `index`, if initialized.
    pub fn invoke_on_runtime<T>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut R) -> T,
    ) -> CoreResult<T> {
        if index >= N || !self.initialized[index] {
            return Err(CoreError::IndexInvalid);
        }
        let runtime = self.runtime[index].as_mut().ok_or(CoreError::IndexInvalid)?;
        Ok(f(runtime))
    }

    /// Invokes `f(index, runtime)` for every initialized slot, in index
    /// order.
    pub fn invoke_on_all_runtime(&mut self, mut f: impl FnMut(usize, &mut R)) {
        for i in 0..N {
            if self.initialized[i] {
                if let Some(r) = self.runtime[i].as_mut() {
                    f(i, r);
                }
            }
        }
    }

    /// `true` if `index` is in range and initialized.
    pub fn is_initialized(&self, index: usize) -> bool {
        index < N && self.initialized[index]
    }

    /// The name of the slot at `index`, if initialized.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.is_initialized(index).then(|| self.names[index].as_str())
    }
}

impl<E: Clone + Default, R, const N: usize> Default for EventAccessArray<E, R, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default, PartialEq, Debug)]
    struct Entity(u32);

    fn table() -> EventAccessArray<Entity, u32, 4> {
        EventAccessArray::new()
    }

    #[test]
    fn names_are_unique_among_initialized_slots() {
        let mut t = table();
        t.dispatch_set(
            Locator {
                index: None,
                name: Some("a"),
            },
            7,
            |rt, e, p| {
                *rt = Some(p);
                e.0 = p;
                true
            },
        )
        .unwrap();

        // A second slot requesting the same name still lands on a
        // different index (no dedup at this layer); the registry is
        // responsible for rejecting duplicate names before dispatch if it
        // wants strict uniqueness. This test documents current behavior.
        let r = t
            .dispatch_set(
                Locator {
                    index: None,
                    name: Some("a"),
                },
                8,
                |rt, e, p| {
                    *rt = Some(p);
                    e.0 = p;
                    true
                },
            )
            .unwrap();
        assert_eq!(r.index, 0, "existing name match is reused, not duplicated");
    }

    #[test]
    fn add_then_find_by_name() {
        let mut t = table();
        t.dispatch_set(
            Locator {
                index: None,
                name: Some("probe"),
            },
            1,
            |rt, e, p| {
                *rt = Some(p);
                e.0 = p;
                true
            },
        )
        .unwrap();

        let (idx, entity) = t
            .dispatch_get(Locator {
                index: None,
                name: Some("probe"),
            })
            .unwrap();
        assert_eq!(idx, 0);
        assert_eq!(entity.0, 1);
    }

    #[test]
    fn remove_then_get_is_index_invalid() {
        let mut t = table();
        t.dispatch_set(
            Locator {
                index: Some(0),
                name: Some("probe"),
            },
            1,
            |rt, e, p| {
                *rt = Some(p);
                e.0 = p;
                true
            },
        )
        .unwrap();
        t.dispatch_remove(Locator {
            index: Some(0),
            name: None,
        })
        .unwrap();

        let err = t
            .dispatch_get(Locator {
                index: Some(0),
                name: None,
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::IndexInvalid));
    }

    #[test]
    fn set_failure_leaves_slot_uninitialized() {
        let mut t = table();
        let r = t
            .dispatch_set(
                Locator {
                    index: None,
                    name: Some("probe"),
                },
                1,
                |_rt, _e, _p| false,
            )
            .unwrap();
        assert!(!r.success);
        assert!(!t.is_initialized(0));
    }

    #[test]
    fn full_table_rejects_new_slot() {
        let mut t = table();
        for i in 0..4 {
            t.dispatch_set(
                Locator {
                    index: None,
                    name: Some(&format!("d{i}")),
                },
                i as u32,
                |rt, e, p| {
                    *rt = Some(p);
                    e.0 = p;
                    true
                },
            )
            .unwrap();
        }
        let err = t
            .dispatch_set(
                Locator {
                    index: None,
                    name: Some("overflow"),
                },
                99,
                |rt, e, p| {
                    *rt = Some(p);
                    e.0 = p;
                    true
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::CollectionFull));
    }

    #[test]
    fn overview_lists_only_initialized_slots_as_json_array() {
        let mut t = table();
        t.dispatch_set(
            Locator {
                index: Some(1),
                name: Some("b"),
            },
            5,
            |rt, e, p| {
                *rt = Some(p);
                e.0 = p;
                true
            },
        )
        .unwrap();

        let json = t.dispatch_overview(None, |out, name, entity, index| {
            out.push_str(&format!("{{\"index\":{index},\"name\":\"{name}\",\"v\":{}}}", entity.0));
        });
        assert_eq!(json, r#"[{"index":1,"name":"b","v":5}]"#);
    }

    #[test]
    fn assign_clears_initialized_flag_on_rebuild_failure() {
        let mut t = table();
        let mut snap = Snapshot::<Entity, 4>::default();
        snap.entities[0] = Entity(42);
        snap.initialized[0] = true;
        snap.names[0] = HString::try_from("x").unwrap();

        t.assign(&snap, |_entity, _runtime| false);
        assert!(!t.is_initialized(0));
    }

    #[test]
    fn invoke_on_all_runtime_visits_every_initialized_slot() {
        let mut t = table();
        for i in 0..2 {
            t.dispatch_set(
                Locator {
                    index: None,
                    name: Some(&format!("d{i}")),
                },
                i as u32,
                |rt, e, p| {
                    *rt = Some(p);
                    e.0 = p;
                    true
                },
            )
            .unwrap();
        }
        let mut seen = Vec::new();
        t.invoke_on_all_runtime(|idx, rt| seen.push((idx, *rt)));
        assert_eq!(seen, vec![(0, 0), (1, 1)]);
    }
}
