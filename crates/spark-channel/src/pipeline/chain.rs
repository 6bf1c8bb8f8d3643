//! 以代际句柄寻址的双向链 arena。
//!
//! 节点所有权全部归 arena 所有，前驱/后继只是 [`Handle`]，因此链本身不构成引用环；
//! 槽位复用时代际号递增，过期句柄永远不会误指向新节点。

use std::{collections::HashMap, sync::Arc};

use crate::error::ChannelError;

pub(crate) const HEAD_NAME: &str = "head";
pub(crate) const TAIL_NAME: &str = "tail";

/// 链上位置的代际句柄。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub(crate) const HEAD: Handle = Handle {
        index: 0,
        generation: 0,
    };
    pub(crate) const TAIL: Handle = Handle {
        index: 1,
        generation: 0,
    };

    pub(crate) fn is_sentinel(self) -> bool {
        self == Self::HEAD || self == Self::TAIL
    }
}

struct Link<N> {
    node: Arc<N>,
    name: String,
    prev: Handle,
    next: Handle,
}

struct Slot<N> {
    generation: u32,
    link: Option<Link<N>>,
}

/// 摘除后的节点及其摘除时的邻居。
pub(crate) struct Unlinked<N> {
    pub(crate) node: Arc<N>,
    pub(crate) name: String,
    pub(crate) prev: Handle,
    pub(crate) next: Handle,
}

pub(crate) struct Chain<N> {
    slots: Vec<Slot<N>>,
    free: Vec<u32>,
    names: HashMap<String, Handle>,
}

impl<N> Chain<N> {
    /// 以固定的 head/tail 哨兵建链。
    pub(crate) fn new(
        head: impl FnOnce(Handle) -> Arc<N>,
        tail: impl FnOnce(Handle) -> Arc<N>,
    ) -> Self {
        let slots = vec![
            Slot {
                generation: 0,
                link: Some(Link {
                    node: head(Handle::HEAD),
                    name: HEAD_NAME.to_owned(),
                    prev: Handle::HEAD,
                    next: Handle::TAIL,
                }),
            },
            Slot {
                generation: 0,
                link: Some(Link {
                    node: tail(Handle::TAIL),
                    name: TAIL_NAME.to_owned(),
                    prev: Handle::HEAD,
                    next: Handle::TAIL,
                }),
            },
        ];
        let names = HashMap::from([
            (HEAD_NAME.to_owned(), Handle::HEAD),
            (TAIL_NAME.to_owned(), Handle::TAIL),
        ]);
        Self {
            slots,
            free: Vec::new(),
            names,
        }
    }

    fn link(&self, handle: Handle) -> Option<&Link<N>> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.link.as_ref()
    }

    fn link_mut(&mut self, handle: Handle) -> Option<&mut Link<N>> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.link.as_mut()
    }

    pub(crate) fn get(&self, handle: Handle) -> Option<&Arc<N>> {
        self.link(handle).map(|link| &link.node)
    }

    pub(crate) fn handle_of(&self, name: &str) -> Option<Handle> {
        self.names.get(name).copied()
    }

    pub(crate) fn contains_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// 后继句柄；`handle` 已过期或为 tail 时返回 `None`。
    pub(crate) fn next(&self, handle: Handle) -> Option<Handle> {
        if handle == Handle::TAIL {
            return None;
        }
        self.link(handle).map(|link| link.next)
    }

    /// 前驱句柄；`handle` 已过期或为 head 时返回 `None`。
    pub(crate) fn prev(&self, handle: Handle) -> Option<Handle> {
        if handle == Handle::HEAD {
            return None;
        }
        self.link(handle).map(|link| link.prev)
    }

    /// 用户节点数量（不含哨兵）。
    pub(crate) fn len(&self) -> usize {
        self.names.len() - 2
    }

    fn vacant(&self) -> Handle {
        match self.free.last() {
            Some(&index) => Handle {
                index,
                generation: self.slots[index as usize].generation,
            },
            None => Handle {
                index: self.slots.len() as u32,
                generation: 0,
            },
        }
    }

    pub(crate) fn insert_after(
        &mut self,
        anchor: Handle,
        name: String,
        build: impl FnOnce(Handle) -> Arc<N>,
    ) -> Result<Arc<N>, ChannelError> {
        if anchor == Handle::TAIL {
            return Err(ChannelError::Sentinel(TAIL_NAME));
        }
        let next = self
            .next(anchor)
            .ok_or_else(|| ChannelError::NoSuchHandler(name.clone()))?;
        self.link_between(anchor, next, name, build)
    }

    pub(crate) fn insert_before(
        &mut self,
        anchor: Handle,
        name: String,
        build: impl FnOnce(Handle) -> Arc<N>,
    ) -> Result<Arc<N>, ChannelError> {
        if anchor == Handle::HEAD {
            return Err(ChannelError::Sentinel(HEAD_NAME));
        }
        let prev = self
            .prev(anchor)
            .ok_or_else(|| ChannelError::NoSuchHandler(name.clone()))?;
        self.link_between(prev, anchor, name, build)
    }

    fn link_between(
        &mut self,
        prev: Handle,
        next: Handle,
        name: String,
        build: impl FnOnce(Handle) -> Arc<N>,
    ) -> Result<Arc<N>, ChannelError> {
        if name.is_empty() {
            return Err(ChannelError::InvalidName);
        }
        if self.names.contains_key(&name) {
            return Err(ChannelError::DuplicateName(name));
        }
        let handle = self.vacant();
        let node = build(handle);
        let link = Link {
            node: Arc::clone(&node),
            name: name.clone(),
            prev,
            next,
        };
        if handle.index as usize == self.slots.len() {
            self.slots.push(Slot {
                generation: 0,
                link: Some(link),
            });
        } else {
            self.free.pop();
            self.slots[handle.index as usize].link = Some(link);
        }
        if let Some(prev_link) = self.link_mut(prev) {
            prev_link.next = handle;
        }
        if let Some(next_link) = self.link_mut(next) {
            next_link.prev = handle;
        }
        self.names.insert(name, handle);
        Ok(node)
    }

    /// 摘除用户节点；哨兵与过期句柄返回 `None`。
    pub(crate) fn unlink(&mut self, handle: Handle) -> Option<Unlinked<N>> {
        if handle.is_sentinel() {
            return None;
        }
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let link = slot.link.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        if let Some(prev_link) = self.link_mut(link.prev) {
            prev_link.next = link.next;
        }
        if let Some(next_link) = self.link_mut(link.next) {
            next_link.prev = link.prev;
        }
        self.names.remove(&link.name);
        Some(Unlinked {
            node: link.node,
            name: link.name,
            prev: link.prev,
            next: link.next,
        })
    }

    /// 在 `handle` 原位置换入新节点，返回旧节点与新节点。
    pub(crate) fn replace(
        &mut self,
        handle: Handle,
        name: String,
        build: impl FnOnce(Handle) -> Arc<N>,
    ) -> Result<(Unlinked<N>, Arc<N>), ChannelError> {
        if handle.is_sentinel() {
            return Err(ChannelError::Sentinel(if handle == Handle::HEAD {
                HEAD_NAME
            } else {
                TAIL_NAME
            }));
        }
        let old_name = match self.link(handle) {
            Some(link) => link.name.as_str(),
            None => return Err(ChannelError::NoSuchHandler(name)),
        };
        if name.is_empty() {
            return Err(ChannelError::InvalidName);
        }
        if name != old_name && self.names.contains_key(&name) {
            return Err(ChannelError::DuplicateName(name));
        }
        let old = self
            .unlink(handle)
            .ok_or_else(|| ChannelError::NoSuchHandler(name.clone()))?;
        let new = self.link_between(old.prev, old.next, name, build)?;
        Ok((old, new))
    }

    /// 自 head 至 tail 的遍历（含两端哨兵）。
    pub(crate) fn iter(&self) -> Iter<'_, N> {
        Iter {
            chain: self,
            cursor: Some(Handle::HEAD),
        }
    }

    /// 校验链的结构不变量：唯一的 head/tail、单一路径、双向链接一致、名称表与槽位一致。
    pub(crate) fn check_links(&self) -> Result<(), String> {
        let live = self.slots.iter().filter(|s| s.link.is_some()).count();
        if self.names.len() != live {
            return Err(format!("{} names for {live} live slots", self.names.len()));
        }
        let mut cursor = Handle::HEAD;
        let mut visited = 1usize;
        while cursor != Handle::TAIL {
            let link = self
                .link(cursor)
                .ok_or_else(|| format!("dangling handle {cursor:?}"))?;
            let next = self
                .link(link.next)
                .ok_or_else(|| format!("dangling next of {}", link.name))?;
            if next.prev != cursor {
                return Err(format!("{}.next.prev does not point back", link.name));
            }
            if self.names.get(&link.name) != Some(&cursor) {
                return Err(format!("name table disagrees for {}", link.name));
            }
            cursor = link.next;
            visited += 1;
            if visited > live {
                return Err("cycle detected".to_owned());
            }
        }
        if visited != live {
            return Err(format!("{visited} reachable of {live} live nodes"));
        }
        Ok(())
    }
}

pub(crate) struct Iter<'a, N> {
    chain: &'a Chain<N>,
    cursor: Option<Handle>,
}

impl<'a, N> Iterator for Iter<'a, N> {
    type Item = (Handle, &'a str, &'a Arc<N>);

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.cursor?;
        let link = self.chain.link(handle)?;
        self.cursor = (handle != Handle::TAIL).then_some(link.next);
        Some((handle, link.name.as_str(), &link.node))
    }
}
