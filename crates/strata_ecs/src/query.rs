use std::marker::PhantomData;

use crate::archetype::Archetype;
use crate::component::{Component, Components};
use crate::entity::Entity;
use crate::mask::ComponentMask;

/// Compiled required/forbidden/any-of masks an archetype's own mask is matched against.
///
/// `any_of` is only enforced when non-empty: a query with no "any of" term matches on
/// `required`/`forbidden` alone.
#[derive(Clone, Copy, Default)]
pub struct QueryMask {
    pub required: ComponentMask,
    pub forbidden: ComponentMask,
    pub any_of: ComponentMask,
}

impl QueryMask {
    pub fn matches(&self, archetype_mask: ComponentMask) -> bool {
        archetype_mask.has_all(&self.required)
            && !archetype_mask.intersects(&self.forbidden)
            && (self.any_of.is_empty() || archetype_mask.intersects(&self.any_of))
    }
}

/// One item fetched per matching entity by a [`View`]. Implemented for `&T`, `&mut T`, `Entity`,
/// [`Not<T>`], [`Opt<T>`], and tuples of up to four of the above.
///
/// # Safety
/// `matches`/`add_to_mask` must describe exactly the component access `fetch` performs; a
/// mismatch would let `fetch` hand out a reference to a component the archetype doesn't carry.
pub unsafe trait Fetch {
    type Item<'a>;

    fn add_to_mask(mask: &mut QueryMask, components: &mut Components);

    /// # Safety
    /// The archetype at `chunk_idx` must satisfy the mask contributed by `add_to_mask`, and no
    /// other live `Fetch::Item` may alias the same component mutably for `'a`.
    unsafe fn fetch<'a>(archetype: &'a Archetype, chunk_idx: usize, components: &Components) -> Self::Item<'a>;
}

unsafe impl Fetch for Entity {
    type Item<'a> = &'a [Entity];

    fn add_to_mask(_mask: &mut QueryMask, _components: &mut Components) {}

    unsafe fn fetch<'a>(archetype: &'a Archetype, chunk_idx: usize, _components: &Components) -> Self::Item<'a> {
        archetype.chunk_entities(chunk_idx)
    }
}

unsafe impl<T: Component> Fetch for &T {
    type Item<'a> = &'a [T];

    fn add_to_mask(mask: &mut QueryMask, components: &mut Components) {
        let id = components.register::<T>().expect("component limit exceeded");
        mask.required.set(id);
    }

    unsafe fn fetch<'a>(archetype: &'a Archetype, chunk_idx: usize, components: &Components) -> Self::Item<'a> {
        let id = components
            .component_id::<T>()
            .expect("registered during add_to_mask");
        archetype
            .component_slice::<T>(chunk_idx, id)
            .expect("required component missing from a matched archetype")
    }
}

unsafe impl<T: Component> Fetch for &mut T {
    type Item<'a> = &'a mut [T];

    fn add_to_mask(mask: &mut QueryMask, components: &mut Components) {
        let id = components.register::<T>().expect("component limit exceeded");
        mask.required.set(id);
    }

    unsafe fn fetch<'a>(archetype: &'a Archetype, chunk_idx: usize, components: &Components) -> Self::Item<'a> {
        let id = components
            .component_id::<T>()
            .expect("registered during add_to_mask");
        let slice = archetype
            .component_slice::<T>(chunk_idx, id)
            .expect("required component missing from a matched archetype");
        // SAFETY: the caller of `Fetch::fetch` (`View::for_each_chunk`) is required to hold the
        // only live view over this archetype's data for the fetched lifetime whenever a query
        // mentions `&mut T`; there is no runtime borrow tracker here (see `DESIGN.md`).
        unsafe { std::slice::from_raw_parts_mut(slice.as_ptr().cast_mut(), slice.len()) }
    }
}

/// Excludes archetypes carrying `T`. Fetches nothing.
pub struct Not<T>(PhantomData<T>);

unsafe impl<T: Component> Fetch for Not<T> {
    type Item<'a> = ();

    fn add_to_mask(mask: &mut QueryMask, components: &mut Components) {
        let id = components.register::<T>().expect("component limit exceeded");
        mask.forbidden.set(id);
    }

    unsafe fn fetch<'a>(_archetype: &'a Archetype, _chunk_idx: usize, _components: &Components) -> Self::Item<'a> {}
}

/// Fetches `T` if the matched archetype happens to carry it, `None` otherwise. Does not
/// constrain which archetypes match.
pub struct Opt<T>(PhantomData<T>);

unsafe impl<T: Component> Fetch for Opt<T> {
    type Item<'a> = Option<&'a [T]>;

    fn add_to_mask(_mask: &mut QueryMask, components: &mut Components) {
        let _ = components.register::<T>();
    }

    unsafe fn fetch<'a>(archetype: &'a Archetype, chunk_idx: usize, components: &Components) -> Self::Item<'a> {
        let id = components.component_id::<T>()?;
        archetype.component_slice::<T>(chunk_idx, id)
    }
}

macro_rules! impl_fetch_tuple {
    ($($name:ident),+) => {
        unsafe impl<$($name: Fetch),+> Fetch for ($($name,)+) {
            type Item<'a> = ($($name::Item<'a>,)+);

            fn add_to_mask(mask: &mut QueryMask, components: &mut Components) {
                $($name::add_to_mask(mask, components);)+
            }

            unsafe fn fetch<'a>(archetype: &'a Archetype, chunk_idx: usize, components: &Components) -> Self::Item<'a> {
                // SAFETY: forwarded from the caller of the tuple's own `fetch`.
                ($(unsafe { $name::fetch(archetype, chunk_idx, components) },)+)
            }
        }
    };
}

impl_fetch_tuple!(A);
impl_fetch_tuple!(A, B);
impl_fetch_tuple!(A, B, C);
impl_fetch_tuple!(A, B, C, D);

/// A compiled, reusable query over archetypes. Build once (typically held on `World` or cached by
/// a caller), matched against the current archetype set on every [`View::for_each`]/`iter` call —
/// archetypes created after the query was built are picked up automatically since matching is
/// mask-based rather than archetype-list-based.
pub struct Query<Q: Fetch> {
    mask: QueryMask,
    _marker: PhantomData<fn() -> Q>,
}

impl<Q: Fetch> Query<Q> {
    pub fn new(components: &mut Components) -> Self {
        let mut mask = QueryMask::default();
        Q::add_to_mask(&mut mask, components);
        Self {
            mask,
            _marker: PhantomData,
        }
    }

    pub fn mask(&self) -> &QueryMask {
        &self.mask
    }
}

/// A read over the archetypes currently matching a [`Query`]'s compiled mask.
pub struct View<'w, Q: Fetch> {
    query: &'w Query<Q>,
    archetypes: &'w [Archetype],
    components: &'w Components,
}

impl<'w, Q: Fetch> View<'w, Q> {
    pub fn new(query: &'w Query<Q>, archetypes: &'w [Archetype], components: &'w Components) -> Self {
        Self {
            query,
            archetypes,
            components,
        }
    }

    /// Calls `f` once per matching chunk with `(entities, fetched_items)`.
    pub fn for_each_chunk<'a>(&'a self, mut f: impl FnMut(&'a [Entity], Q::Item<'a>)) {
        for archetype in self.archetypes {
            if !self.query.mask.matches(archetype.mask()) {
                continue;
            }
            for chunk_idx in 0..archetype.chunk_count() {
                let entities = archetype.chunk_entities(chunk_idx);
                if entities.is_empty() {
                    continue;
                }
                // SAFETY: `archetype.mask()` satisfies `self.query.mask` by the check above.
                let items = unsafe { Q::fetch(archetype, chunk_idx, self.components) };
                f(entities, items);
            }
        }
    }

    pub fn matched_archetype_count(&self) -> usize {
        self.archetypes
            .iter()
            .filter(|a| self.query.mask.matches(a.mask()))
            .count()
    }

    /// Total live entities across every matching archetype.
    ///
    /// This sums `Archetype::len()` rather than fetching `Q::Item` at all, so it's cheap even for
    /// queries over `&mut T` that `for_each_chunk` would otherwise need exclusive access for.
    pub fn count(&self) -> usize {
        self.archetypes
            .iter()
            .filter(|a| self.query.mask.matches(a.mask()))
            .map(|a| a.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes
            .iter()
            .filter(|a| self.query.mask.matches(a.mask()))
            .all(|a| a.is_empty())
    }

    /// The first matching entity in archetype order, or `None` if nothing matches. Does not fetch
    /// `Q::Item` — use `for_each_chunk` if the caller also needs the matched components.
    pub fn first(&self) -> Option<Entity> {
        self.archetypes
            .iter()
            .filter(|a| self.query.mask.matches(a.mask()))
            .find_map(|a| (0..a.chunk_count()).find_map(|i| a.chunk_entities(i).first().copied()))
    }
}
