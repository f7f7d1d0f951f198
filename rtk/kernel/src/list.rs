//! Index-linked lists used for every kernel collection
//!
//! All lists and list items live in one fixed arena. A list is a circular
//! chain anchored at an implicit end marker that carries the maximum key; an
//! item records the list that currently holds it, so removal is O(1) and
//! never needs to know where the item was put.
//!
//! Each list also keeps a roaming cursor. [`ListArena::next_owner`] advances
//! it, which is how tasks of equal priority take turns.

use core::fmt;

/// Ordering key stored in every item
pub type ItemValue = u32;

/// Largest key; items carrying it always sort last
pub const MAX_ITEM_VALUE: ItemValue = ItemValue::MAX;

/// Index of a list in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListId(pub(crate) u16);

impl ListId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u16)
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an item in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId(pub(crate) u16);

impl ItemId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u16)
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item{}", self.0)
    }
}

/// What a list item stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Owner {
    #[default]
    None,
    /// Task control block slot
    Task(usize),
    /// Queue slot (mutex held-list entries)
    Queue(usize),
    /// Software timer slot
    Timer(usize),
    /// Event poll object slot
    Poll(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    End,
    Item(ItemId),
}

#[derive(Debug, Clone, Copy)]
struct ListHead {
    first: Link,
    last: Link,
    cursor: Link,
    len: usize,
}

impl ListHead {
    const EMPTY: Self = Self {
        first: Link::End,
        last: Link::End,
        cursor: Link::End,
        len: 0,
    };
}

#[derive(Debug, Clone, Copy)]
struct ItemSlot {
    value: ItemValue,
    owner: Owner,
    container: Option<ListId>,
    next: Link,
    prev: Link,
}

impl ItemSlot {
    const DETACHED: Self = Self {
        value: 0,
        owner: Owner::None,
        container: None,
        next: Link::End,
        prev: Link::End,
    };
}

/// Fixed arena of `L` lists and `I` items.
pub struct ListArena<const L: usize, const I: usize> {
    lists: [ListHead; L],
    items: [ItemSlot; I],
}

impl<const L: usize, const I: usize> ListArena<L, I> {
    /// Create an arena where every list is empty and every item detached
    pub const fn new() -> Self {
        Self {
            lists: [ListHead::EMPTY; L],
            items: [ItemSlot::DETACHED; I],
        }
    }

    /// Resets a list to empty. Items still pointing at it are not touched.
    pub fn init_list(&mut self, list: ListId) {
        self.lists[list.index()] = ListHead::EMPTY;
    }

    /// Detaches an item and clears its key and owner.
    pub fn init_item(&mut self, item: ItemId) {
        self.items[item.index()] = ItemSlot::DETACHED;
    }

    pub fn value(&self, item: ItemId) -> ItemValue {
        self.items[item.index()].value
    }

    pub fn set_value(&mut self, item: ItemId, value: ItemValue) {
        self.items[item.index()].value = value;
    }

    pub fn owner(&self, item: ItemId) -> Owner {
        self.items[item.index()].owner
    }

    pub fn set_owner(&mut self, item: ItemId, owner: Owner) {
        self.items[item.index()].owner = owner;
    }

    /// List currently holding `item`, if any
    pub fn container(&self, item: ItemId) -> Option<ListId> {
        self.items[item.index()].container
    }

    pub fn is_contained_within(&self, list: ListId, item: ItemId) -> bool {
        self.container(item) == Some(list)
    }

    pub fn len(&self, list: ListId) -> usize {
        self.lists[list.index()].len
    }

    pub fn is_empty(&self, list: ListId) -> bool {
        self.len(list) == 0
    }

    /// First item in list order
    pub fn head(&self, list: ListId) -> Option<ItemId> {
        match self.lists[list.index()].first {
            Link::Item(item) => Some(item),
            Link::End => None,
        }
    }

    /// Key of the first item
    pub fn head_value(&self, list: ListId) -> Option<ItemValue> {
        self.head(list).map(|item| self.value(item))
    }

    /// Owner of the first item
    pub fn head_owner(&self, list: ListId) -> Option<Owner> {
        self.head(list).map(|item| self.owner(item))
    }

    /// Item following `item` in its list, stopping at the end marker
    pub fn next_item(&self, item: ItemId) -> Option<ItemId> {
        match self.items[item.index()].next {
            Link::Item(next) if self.items[item.index()].container.is_some() => Some(next),
            _ => None,
        }
    }

    /// Iterates the items of `list` from head to tail.
    pub fn iter(&self, list: ListId) -> Iter<'_, L, I> {
        Iter {
            arena: self,
            at: self.lists[list.index()].first,
        }
    }

    /// Inserts `item` so it is the last one [`ListArena::next_owner`] reaches.
    pub fn insert_end(&mut self, list: ListId, item: ItemId) {
        let index = self.lists[list.index()].cursor;
        let prev = self.prev_of(list, index);

        let slot = &mut self.items[item.index()];
        slot.next = index;
        slot.prev = prev;
        slot.container = Some(list);

        self.set_next(list, prev, Link::Item(item));
        self.set_prev(list, index, Link::Item(item));
        self.lists[list.index()].len += 1;
    }

    /// Inserts `item` in ascending key order, after existing equal keys.
    pub fn insert(&mut self, list: ListId, item: ItemId) {
        let value = self.value(item);

        let after = if value == MAX_ITEM_VALUE {
            self.lists[list.index()].last
        } else {
            let mut at = Link::End;
            while let Link::Item(next) = self.next_of(list, at) {
                if self.items[next.index()].value > value {
                    break;
                }
                at = Link::Item(next);
            }
            at
        };

        let next = self.next_of(list, after);
        let slot = &mut self.items[item.index()];
        slot.next = next;
        slot.prev = after;
        slot.container = Some(list);

        self.set_prev(list, next, Link::Item(item));
        self.set_next(list, after, Link::Item(item));
        self.lists[list.index()].len += 1;
    }

    /// Unlinks `item` and returns how many items remain in its list.
    ///
    /// Removing a detached item is a no-op that returns 0.
    pub fn remove(&mut self, item: ItemId) -> usize {
        let Some(list) = self.container(item) else {
            return 0;
        };
        let ItemSlot { next, prev, .. } = self.items[item.index()];

        self.set_prev(list, next, prev);
        self.set_next(list, prev, next);

        let head = &mut self.lists[list.index()];
        if head.cursor == Link::Item(item) {
            head.cursor = prev;
        }
        head.len -= 1;
        let remaining = head.len;

        let slot = &mut self.items[item.index()];
        slot.container = None;
        slot.next = Link::End;
        slot.prev = Link::End;
        remaining
    }

    /// Changes the key of `item` and restores its sorted position.
    pub fn relocate(&mut self, item: ItemId, value: ItemValue) {
        match self.container(item) {
            Some(list) => {
                self.remove(item);
                self.set_value(item, value);
                self.insert(list, item);
            }
            None => self.set_value(item, value),
        }
    }

    /// Advances the roaming cursor and returns the owner it lands on.
    pub fn next_owner(&mut self, list: ListId) -> Option<Owner> {
        if self.is_empty(list) {
            return None;
        }
        let mut cursor = self.next_of(list, self.lists[list.index()].cursor);
        if cursor == Link::End {
            cursor = self.next_of(list, Link::End);
        }
        self.lists[list.index()].cursor = cursor;
        match cursor {
            Link::Item(item) => Some(self.owner(item)),
            Link::End => None,
        }
    }

    fn next_of(&self, list: ListId, link: Link) -> Link {
        match link {
            Link::End => self.lists[list.index()].first,
            Link::Item(item) => self.items[item.index()].next,
        }
    }

    fn prev_of(&self, list: ListId, link: Link) -> Link {
        match link {
            Link::End => self.lists[list.index()].last,
            Link::Item(item) => self.items[item.index()].prev,
        }
    }

    fn set_next(&mut self, list: ListId, link: Link, to: Link) {
        match link {
            Link::End => self.lists[list.index()].first = to,
            Link::Item(item) => self.items[item.index()].next = to,
        }
    }

    fn set_prev(&mut self, list: ListId, link: Link, to: Link) {
        match link {
            Link::End => self.lists[list.index()].last = to,
            Link::Item(item) => self.items[item.index()].prev = to,
        }
    }
}

impl<const L: usize, const I: usize> Default for ListArena<L, I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Head-to-tail iterator over one list.
pub struct Iter<'a, const L: usize, const I: usize> {
    arena: &'a ListArena<L, I>,
    at: Link,
}

impl<'a, const L: usize, const I: usize> Iterator for Iter<'a, L, I> {
    type Item = ItemId;

    fn next(&mut self) -> Option<ItemId> {
        match self.at {
            Link::End => None,
            Link::Item(item) => {
                self.at = self.arena.items[item.index()].next;
                Some(item)
            }
        }
    }
}
