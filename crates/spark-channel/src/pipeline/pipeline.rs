use std::{
    any::type_name,
    collections::VecDeque,
    fmt,
    net::SocketAddr,
    sync::{Arc, Weak},
};

use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, warn};

use super::{
    ChannelHandler, ChannelHandlerContext, EventMask,
    chain::{Chain, HEAD_NAME, Handle, TAIL_NAME},
    context::{ContextNode, Direction, Inbound, NodeSpec, invoke_inbound},
    mask::mask_of,
    sentinel::{HeadHandler, TailHandler},
};
use crate::{
    channel::{Channel, ChannelId, ChannelInner},
    error::ChannelError,
    message::PipelineMessage,
    promise::{ChannelFuture, ChannelPromise},
    runtime::EventLoop,
};

/// 首次注册前登记的生命周期回调，注册时按登记顺序在事件循环上执行。
enum PendingCallback {
    Added(Arc<ContextNode>),
    Removed(Arc<ContextNode>),
}

struct PipelineState {
    chain: Chain<ContextNode>,
    /// 首次注册已发生；此后不再回落。
    registered: bool,
    pending: VecDeque<PendingCallback>,
}

/// 回调的执行方式，在链写锁内决定、锁外执行。
enum Schedule {
    Deferred,
    Inline,
    Remote(Arc<dyn EventLoop>),
}

enum Position<'a> {
    First,
    Last,
    Before(&'a str),
    After(&'a str),
}

/// 通道的处理器链。
///
/// # 教案式说明
/// - **意图（Why）**：把“有序的 Handler 列表”与“线程亲和的事件调度”收敛到一个容器里，
///   任意外部线程都可以安全地增删 Handler 或注入事件。
/// - **逻辑（How）**：
///   1. 链结构由 `parking_lot::RwLock` 保护，遍历取读锁，增删取写锁；Handler 回调从不在锁内执行；
///   2. 增删采用两阶段协议：链接/摘除在锁内完成，`handler_added`/`handler_removed` 在节点的事件循环上执行；
///      调用方已在该循环线程时内联执行，否则节点先进入 `AddPending` 并投递任务；
///   3. 通道首次注册前的增删只登记回调，注册时在事件循环上按顺序补齐。
/// - **契约（What）**：
///   - head/tail 哨兵永远存在，名称唯一，重名返回 [`ChannelError::DuplicateName`]；
///   - 入站 `fire_*` 从 head 开始，出站操作从 tail 开始并返回 [`ChannelFuture`]；
///   - `handler_added` 失败的节点会被移除，并以 [`ChannelError::HandlerAdded`] 触发 `exception_caught`。
pub struct ChannelPipeline {
    channel: Weak<ChannelInner>,
    channel_id: ChannelId,
    head: Arc<ContextNode>,
    tail: Arc<ContextNode>,
    state: RwLock<PipelineState>,
    /// 绑定事件循环之前的内联调度锁。
    unbound: ReentrantMutex<()>,
}

impl ChannelPipeline {
    pub(crate) fn new(channel: Weak<ChannelInner>, channel_id: ChannelId) -> Self {
        let sentinel = |handle, name: &str, handler: Arc<dyn ChannelHandler>, ty| {
            let node = ContextNode::new(
                handle,
                NodeSpec {
                    name: name.to_owned(),
                    type_name: ty,
                    handler,
                    mask: EventMask::all(),
                    executor: None,
                },
                channel.clone(),
                channel_id,
            );
            node.set_add_complete();
            node
        };
        let head = sentinel(
            Handle::HEAD,
            HEAD_NAME,
            Arc::new(HeadHandler),
            type_name::<HeadHandler>(),
        );
        let tail = sentinel(
            Handle::TAIL,
            TAIL_NAME,
            Arc::new(TailHandler),
            type_name::<TailHandler>(),
        );
        let chain = Chain::new(|_| Arc::clone(&head), |_| Arc::clone(&tail));
        Self {
            channel,
            channel_id,
            head,
            tail,
            state: RwLock::new(PipelineState {
                chain,
                registered: false,
                pending: VecDeque::new(),
            }),
            unbound: ReentrantMutex::new(()),
        }
    }

    pub fn channel(&self) -> Option<Channel> {
        self.channel.upgrade().map(Channel::from_inner)
    }

    pub fn add_first<H: ChannelHandler>(
        &self,
        name: &str,
        handler: H,
    ) -> Result<&Self, ChannelError> {
        self.add(Position::First, name, None, handler)
    }

    pub fn add_last<H: ChannelHandler>(
        &self,
        name: &str,
        handler: H,
    ) -> Result<&Self, ChannelError> {
        self.add(Position::Last, name, None, handler)
    }

    pub fn add_before<H: ChannelHandler>(
        &self,
        base: &str,
        name: &str,
        handler: H,
    ) -> Result<&Self, ChannelError> {
        self.add(Position::Before(base), name, None, handler)
    }

    pub fn add_after<H: ChannelHandler>(
        &self,
        base: &str,
        name: &str,
        handler: H,
    ) -> Result<&Self, ChannelError> {
        self.add(Position::After(base), name, None, handler)
    }

    /// 以专属执行器添加；该节点的全部回调都在 `executor` 上运行。
    pub fn add_first_on<H: ChannelHandler>(
        &self,
        executor: Arc<dyn EventLoop>,
        name: &str,
        handler: H,
    ) -> Result<&Self, ChannelError> {
        self.add(Position::First, name, Some(executor), handler)
    }

    pub fn add_last_on<H: ChannelHandler>(
        &self,
        executor: Arc<dyn EventLoop>,
        name: &str,
        handler: H,
    ) -> Result<&Self, ChannelError> {
        self.add(Position::Last, name, Some(executor), handler)
    }

    pub fn add_before_on<H: ChannelHandler>(
        &self,
        executor: Arc<dyn EventLoop>,
        base: &str,
        name: &str,
        handler: H,
    ) -> Result<&Self, ChannelError> {
        self.add(Position::Before(base), name, Some(executor), handler)
    }

    pub fn add_after_on<H: ChannelHandler>(
        &self,
        executor: Arc<dyn EventLoop>,
        base: &str,
        name: &str,
        handler: H,
    ) -> Result<&Self, ChannelError> {
        self.add(Position::After(base), name, Some(executor), handler)
    }

    fn spec<H: ChannelHandler>(
        name: &str,
        executor: Option<Arc<dyn EventLoop>>,
        handler: H,
    ) -> NodeSpec {
        NodeSpec {
            name: name.to_owned(),
            type_name: type_name::<H>(),
            handler: Arc::new(handler),
            mask: mask_of::<H>(),
            executor,
        }
    }

    fn build(&self, spec: NodeSpec) -> impl FnOnce(Handle) -> Arc<ContextNode> + '_ {
        move |handle| ContextNode::new(handle, spec, self.channel.clone(), self.channel_id)
    }

    fn add<H: ChannelHandler>(
        &self,
        position: Position<'_>,
        name: &str,
        executor: Option<Arc<dyn EventLoop>>,
        handler: H,
    ) -> Result<&Self, ChannelError> {
        let spec = Self::spec(name, executor, handler);
        let (node, schedule) = {
            let mut state = self.state.write();
            let chain = &mut state.chain;
            let node = match position {
                Position::First => chain.insert_after(Handle::HEAD, name.to_owned(), self.build(spec))?,
                Position::Last => chain.insert_before(Handle::TAIL, name.to_owned(), self.build(spec))?,
                Position::Before(base) => {
                    let anchor = Self::locate(chain, base)?;
                    chain.insert_before(anchor, name.to_owned(), self.build(spec))?
                }
                Position::After(base) => {
                    let anchor = Self::locate(chain, base)?;
                    chain.insert_after(anchor, name.to_owned(), self.build(spec))?
                }
            };
            let schedule = if !state.registered {
                node.set_add_pending();
                state
                    .pending
                    .push_back(PendingCallback::Added(Arc::clone(&node)));
                Schedule::Deferred
            } else {
                Self::schedule_for(&node)
            };
            (node, schedule)
        };
        debug!(channel = %self.channel_id, handler = %name, kind = node.type_name, "handler linked into pipeline");

        match schedule {
            Schedule::Deferred => {}
            Schedule::Inline => finish_addition(&ChannelHandlerContext::new(node)),
            Schedule::Remote(executor) => self.submit_addition(&executor, node),
        }
        Ok(self)
    }

    fn locate(chain: &Chain<ContextNode>, name: &str) -> Result<Handle, ChannelError> {
        chain
            .handle_of(name)
            .ok_or_else(|| ChannelError::NoSuchHandler(name.to_owned()))
    }

    /// 在写锁内决定回调的执行方式；需要跨线程时节点先进入 `AddPending`。
    fn schedule_for(node: &Arc<ContextNode>) -> Schedule {
        match node.resolve_executor() {
            Some(executor) if !executor.in_event_loop() => {
                node.set_add_pending();
                Schedule::Remote(executor)
            }
            _ => Schedule::Inline,
        }
    }

    fn submit_addition(&self, executor: &Arc<dyn EventLoop>, node: Arc<ContextNode>) {
        let ctx = ChannelHandlerContext::new(Arc::clone(&node));
        if let Err(rejected) = executor.execute(Box::new(move || finish_addition(&ctx))) {
            warn!(
                channel = %self.channel_id,
                handler = %node.name,
                event_loop = executor.name(),
                %rejected,
                "cannot invoke handler_added because the executor rejected it; removing the handler"
            );
            self.unlink_node(&node);
            node.set_removed();
        }
    }

    fn submit_removal(&self, node: Arc<ContextNode>) {
        let ctx = ChannelHandlerContext::new(Arc::clone(&node));
        match node.resolve_executor() {
            Some(executor) if !executor.in_event_loop() => {
                if let Err(rejected) = executor.execute(Box::new(move || finish_removal(&ctx))) {
                    warn!(
                        channel = %self.channel_id,
                        handler = %node.name,
                        event_loop = executor.name(),
                        %rejected,
                        "cannot invoke handler_removed because the executor rejected it"
                    );
                    node.set_removed();
                }
            }
            _ => finish_removal(&ctx),
        }
    }

    /// 在链写锁内摘除节点并记录其邻居。
    fn unlink_locked(chain: &mut Chain<ContextNode>, handle: Handle) -> Option<Arc<ContextNode>> {
        let unlinked = chain.unlink(handle)?;
        if let (Some(prev), Some(next)) = (chain.get(unlinked.prev), chain.get(unlinked.next)) {
            unlinked.node.retire(Arc::clone(prev), Arc::clone(next));
        }
        Some(unlinked.node)
    }

    /// 若 `node` 仍在链上则摘除，返回是否由本次调用摘除。
    pub(crate) fn unlink_node(&self, node: &Arc<ContextNode>) -> bool {
        let mut state = self.state.write();
        let live = state
            .chain
            .get(node.handle)
            .is_some_and(|current| Arc::ptr_eq(current, node));
        live && Self::unlink_locked(&mut state.chain, node.handle).is_some()
    }

    fn sentinel_error(handle: Handle) -> ChannelError {
        ChannelError::Sentinel(if handle == Handle::HEAD {
            HEAD_NAME
        } else {
            TAIL_NAME
        })
    }

    /// 按名称移除 Handler，返回被移除节点的上下文。
    pub fn remove(&self, name: &str) -> Result<ChannelHandlerContext, ChannelError> {
        self.remove_where(|chain| Self::locate(chain, name))
    }

    /// 移除 head 之后的第一个 Handler。
    pub fn remove_first(&self) -> Result<ChannelHandlerContext, ChannelError> {
        self.remove_where(|chain| match chain.next(Handle::HEAD) {
            Some(handle) if handle != Handle::TAIL => Ok(handle),
            _ => Err(ChannelError::EmptyPipeline),
        })
    }

    /// 移除 tail 之前的最后一个 Handler。
    pub fn remove_last(&self) -> Result<ChannelHandlerContext, ChannelError> {
        self.remove_where(|chain| match chain.prev(Handle::TAIL) {
            Some(handle) if handle != Handle::HEAD => Ok(handle),
            _ => Err(ChannelError::EmptyPipeline),
        })
    }

    fn remove_where(
        &self,
        locate: impl FnOnce(&Chain<ContextNode>) -> Result<Handle, ChannelError>,
    ) -> Result<ChannelHandlerContext, ChannelError> {
        let node = {
            let mut state = self.state.write();
            let handle = locate(&state.chain)?;
            if handle.is_sentinel() {
                return Err(Self::sentinel_error(handle));
            }
            let node = Self::unlink_locked(&mut state.chain, handle)
                .ok_or_else(|| ChannelError::NoSuchHandler(format!("{handle:?}")))?;
            debug!(channel = %self.channel_id, handler = %node.name, "handler unlinked from pipeline");
            if !state.registered {
                state
                    .pending
                    .push_back(PendingCallback::Removed(Arc::clone(&node)));
                return Ok(ChannelHandlerContext::new(node));
            }
            node
        };
        self.submit_removal(Arc::clone(&node));
        Ok(ChannelHandlerContext::new(node))
    }

    /// 以新 Handler 原位替换 `old`；先完成新节点的 `handler_added`，再调用旧节点的 `handler_removed`。
    ///
    /// 返回被替换节点的上下文；经由它继续转发的事件会进入新节点。
    pub fn replace<H: ChannelHandler>(
        &self,
        old: &str,
        new_name: &str,
        handler: H,
    ) -> Result<ChannelHandlerContext, ChannelError> {
        let spec = Self::spec(new_name, None, handler);
        let (old_node, new_node, schedule) = {
            let mut state = self.state.write();
            let handle = Self::locate(&state.chain, old)?;
            if handle.is_sentinel() {
                return Err(Self::sentinel_error(handle));
            }
            let (unlinked, new_node) =
                state
                    .chain
                    .replace(handle, new_name.to_owned(), self.build(spec))?;
            let old_node = unlinked.node;
            old_node.retire(Arc::clone(&new_node), Arc::clone(&new_node));
            let schedule = if !state.registered {
                new_node.set_add_pending();
                state
                    .pending
                    .push_back(PendingCallback::Added(Arc::clone(&new_node)));
                state
                    .pending
                    .push_back(PendingCallback::Removed(Arc::clone(&old_node)));
                Schedule::Deferred
            } else {
                Self::schedule_for(&new_node)
            };
            (old_node, new_node, schedule)
        };
        debug!(channel = %self.channel_id, old = %old, new = %new_name, "handler replaced");

        let old_ctx = ChannelHandlerContext::new(Arc::clone(&old_node));
        let new_ctx = ChannelHandlerContext::new(Arc::clone(&new_node));
        match schedule {
            Schedule::Deferred => {}
            Schedule::Inline => {
                finish_addition(&new_ctx);
                finish_removal(&old_ctx);
            }
            Schedule::Remote(executor) => {
                let task_old = old_ctx.clone();
                let submitted = executor.execute(Box::new(move || {
                    finish_addition(&new_ctx);
                    finish_removal(&task_old);
                }));
                if let Err(rejected) = submitted {
                    warn!(
                        channel = %self.channel_id,
                        handler = %new_node.name,
                        %rejected,
                        "cannot invoke replace callbacks because the executor rejected them"
                    );
                    self.unlink_node(&new_node);
                    new_node.set_removed();
                    old_node.set_removed();
                }
            }
        }
        Ok(old_ctx)
    }

    /// 首次注册时在事件循环线程上补齐登记的回调。
    /// 串行执行尚无执行器可用的调度；同一线程内的嵌套传播可重入。
    pub(crate) fn serialize_unbound<R>(&self, dispatch: impl FnOnce() -> R) -> R {
        let _serial = self.unbound.lock();
        dispatch()
    }

    pub(crate) fn run_pending_callbacks(&self) {
        let pending = {
            let mut state = self.state.write();
            if state.registered {
                return;
            }
            state.registered = true;
            std::mem::take(&mut state.pending)
        };
        for callback in pending {
            match callback {
                PendingCallback::Added(node) => match node.resolve_executor() {
                    Some(executor) if !executor.in_event_loop() => {
                        self.submit_addition(&executor, node)
                    }
                    _ => finish_addition(&ChannelHandlerContext::new(node)),
                },
                PendingCallback::Removed(node) => self.submit_removal(node),
            }
        }
    }

    /// 关闭后注销时由 head 调用：自 tail 向 head 逐个移除全部用户节点。
    pub(crate) fn destroy(&self) {
        let removed: Vec<Arc<ContextNode>> = {
            let mut state = self.state.write();
            let mut handles: Vec<Handle> = state
                .chain
                .iter()
                .map(|(handle, _, _)| handle)
                .filter(|handle| !handle.is_sentinel())
                .collect();
            handles.reverse();
            handles
                .into_iter()
                .filter_map(|handle| Self::unlink_locked(&mut state.chain, handle))
                .collect()
        };
        if !removed.is_empty() {
            debug!(channel = %self.channel_id, handlers = removed.len(), "destroying pipeline");
        }
        for node in removed {
            self.submit_removal(node);
        }
    }

    /// 从 `from` 出发按方向寻找下一个掩码匹配的节点。
    ///
    /// `from` 已被移除时沿其摘除时刻的邻居继续，直到回到链上的存活节点。
    pub(crate) fn find(
        &self,
        from: &Arc<ContextNode>,
        mask: EventMask,
        direction: Direction,
    ) -> Option<Arc<ContextNode>> {
        let state = self.state.read();
        let chain = &state.chain;
        let mut cursor = Arc::clone(from);
        loop {
            let live = chain
                .get(cursor.handle)
                .is_some_and(|current| Arc::ptr_eq(current, &cursor));
            let step = if live {
                let handle = match direction {
                    Direction::Inbound => chain.next(cursor.handle),
                    Direction::Outbound => chain.prev(cursor.handle),
                }?;
                Arc::clone(chain.get(handle)?)
            } else {
                cursor.retired_neighbour(direction)?
            };
            if step.mask.intersects(mask) {
                return Some(step);
            }
            cursor = step;
        }
    }

    pub fn context(&self, name: &str) -> Option<ChannelHandlerContext> {
        let state = self.state.read();
        let handle = state.chain.handle_of(name)?;
        if handle.is_sentinel() {
            return None;
        }
        state
            .chain
            .get(handle)
            .map(|node| ChannelHandlerContext::new(Arc::clone(node)))
    }

    pub fn first_context(&self) -> Option<ChannelHandlerContext> {
        let state = self.state.read();
        let handle = state.chain.next(Handle::HEAD).filter(|h| *h != Handle::TAIL)?;
        state
            .chain
            .get(handle)
            .map(|node| ChannelHandlerContext::new(Arc::clone(node)))
    }

    pub fn last_context(&self) -> Option<ChannelHandlerContext> {
        let state = self.state.read();
        let handle = state.chain.prev(Handle::TAIL).filter(|h| *h != Handle::HEAD)?;
        state
            .chain
            .get(handle)
            .map(|node| ChannelHandlerContext::new(Arc::clone(node)))
    }

    /// 用户 Handler 名称，按 head→tail 顺序。
    pub fn names(&self) -> Vec<String> {
        self.state
            .read()
            .chain
            .iter()
            .filter(|(handle, _, _)| !handle.is_sentinel())
            .map(|(_, name, _)| name.to_owned())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().chain.contains_name(name)
    }

    pub fn len(&self) -> usize {
        self.state.read().chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn check_links(&self) -> Result<(), String> {
        self.state.read().chain.check_links()
    }

    /// 与本通道绑定的新 Promise，可用于 `*_with` 变体。
    pub fn new_promise(&self) -> ChannelPromise {
        self.tail_context().new_promise()
    }

    pub fn new_succeeded_future(&self) -> ChannelFuture {
        self.tail_context().new_succeeded_future()
    }

    pub fn new_failed_future(&self, cause: ChannelError) -> ChannelFuture {
        self.tail_context().new_failed_future(cause)
    }

    fn tail_context(&self) -> ChannelHandlerContext {
        ChannelHandlerContext::new(Arc::clone(&self.tail))
    }

    fn fire(&self, event: Inbound) -> &Self {
        invoke_inbound(Arc::clone(&self.head), event);
        self
    }

    pub fn fire_channel_registered(&self) -> &Self {
        self.fire(Inbound::Registered)
    }

    pub fn fire_channel_unregistered(&self) -> &Self {
        self.fire(Inbound::Unregistered)
    }

    pub fn fire_channel_active(&self) -> &Self {
        self.fire(Inbound::Active)
    }

    pub fn fire_channel_inactive(&self) -> &Self {
        self.fire(Inbound::Inactive)
    }

    pub fn fire_channel_read(&self, msg: PipelineMessage) -> &Self {
        self.fire(Inbound::Read(msg))
    }

    pub fn fire_channel_read_complete(&self) -> &Self {
        self.fire(Inbound::ReadComplete)
    }

    pub fn fire_user_event_triggered(&self, event: PipelineMessage) -> &Self {
        self.fire(Inbound::UserEvent(event))
    }

    pub fn fire_channel_writability_changed(&self) -> &Self {
        self.fire(Inbound::WritabilityChanged)
    }

    pub fn fire_exception_caught(&self, cause: ChannelError) -> &Self {
        self.fire(Inbound::Exception(cause))
    }

    pub fn bind(&self, local: SocketAddr) -> ChannelFuture {
        self.tail_context().bind(local)
    }

    pub fn bind_with(
        &self,
        local: SocketAddr,
        promise: ChannelPromise,
    ) -> Result<ChannelFuture, ChannelError> {
        self.tail_context().bind_with(local, promise)
    }

    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> ChannelFuture {
        self.tail_context().connect(remote, local)
    }

    pub fn connect_with(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: ChannelPromise,
    ) -> Result<ChannelFuture, ChannelError> {
        self.tail_context().connect_with(remote, local, promise)
    }

    pub fn disconnect(&self) -> ChannelFuture {
        self.tail_context().disconnect()
    }

    pub fn disconnect_with(&self, promise: ChannelPromise) -> Result<ChannelFuture, ChannelError> {
        self.tail_context().disconnect_with(promise)
    }

    pub fn close(&self) -> ChannelFuture {
        self.tail_context().close()
    }

    pub fn close_with(&self, promise: ChannelPromise) -> Result<ChannelFuture, ChannelError> {
        self.tail_context().close_with(promise)
    }

    pub fn deregister(&self) -> ChannelFuture {
        self.tail_context().deregister()
    }

    pub fn deregister_with(&self, promise: ChannelPromise) -> Result<ChannelFuture, ChannelError> {
        self.tail_context().deregister_with(promise)
    }

    pub fn read(&self) -> ChannelFuture {
        self.tail_context().read()
    }

    pub fn read_with(&self, promise: ChannelPromise) -> Result<ChannelFuture, ChannelError> {
        self.tail_context().read_with(promise)
    }

    pub fn write(&self, msg: PipelineMessage) -> ChannelFuture {
        self.tail_context().write(msg)
    }

    pub fn write_with(
        &self,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> Result<ChannelFuture, ChannelError> {
        self.tail_context().write_with(msg, promise)
    }

    pub fn flush(&self) -> ChannelFuture {
        self.tail_context().flush()
    }

    pub fn flush_with(&self, promise: ChannelPromise) -> Result<ChannelFuture, ChannelError> {
        self.tail_context().flush_with(promise)
    }

    pub fn write_and_flush(&self, msg: PipelineMessage) -> ChannelFuture {
        self.tail_context().write_and_flush(msg)
    }

    pub fn write_and_flush_with(
        &self,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> Result<ChannelFuture, ChannelError> {
        self.tail_context().write_and_flush_with(msg, promise)
    }
}

impl fmt::Debug for ChannelPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        let handlers: Vec<(&str, &str)> = state
            .chain
            .iter()
            .map(|(_, name, node)| (name, node.type_name))
            .collect();
        f.debug_struct("ChannelPipeline")
            .field("channel", &self.channel_id)
            .field("handlers", &handlers)
            .finish()
    }
}

/// 完成添加；`handler_added` 失败时摘除节点并以 `HandlerAdded` 触发 `exception_caught`。
fn finish_addition(ctx: &ChannelHandlerContext) {
    let Err(cause) = ctx.call_handler_added() else {
        return;
    };
    let Some(channel) = ctx.channel() else {
        return;
    };
    let pipeline = channel.pipeline();
    pipeline.unlink_node(ctx.node());
    if let Err(err) = ctx.call_handler_removed() {
        warn!(
            channel = %ctx.channel_id(),
            handler = %ctx.name(),
            error = %err,
            "handler_removed failed after handler_added failed"
        );
    }
    pipeline.fire_exception_caught(ChannelError::HandlerAdded {
        handler: ctx.name().to_owned(),
        cause: Box::new(cause),
    });
}

fn finish_removal(ctx: &ChannelHandlerContext) {
    let Err(cause) = ctx.call_handler_removed() else {
        return;
    };
    if let Some(channel) = ctx.channel() {
        channel
            .pipeline()
            .fire_exception_caught(ChannelError::HandlerRemoved {
                handler: ctx.name().to_owned(),
                cause: Box::new(cause),
            });
    }
}
